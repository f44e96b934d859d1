//! `reagent run`: Run the agent once and print each protocol event as a
//! JSON line on stdout.

use std::path::Path;

use reagent_agent::AgentBuilder;
use reagent_core::protocol::ProtocolEventKind;
use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

use super::{load_config, require_api_key};

pub async fn run(
    config_path: Option<&Path>,
    message: String,
    thread: Option<String>,
    model: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    require_api_key(&config)?;
    let agent = AgentBuilder::new(config).build().await?;

    let input = run_input(&message, thread, model);
    let thread_id = input["threadId"].as_str().unwrap_or_default().to_string();
    let run_id = input["runId"].as_str().unwrap_or_default().to_string();
    let mut events = agent.runtime.run(&input);

    let mut failure = None;
    let mut interrupted = false;
    let mut interrupt = std::pin::pin!(tokio::signal::ctrl_c());
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                println!("{}", serde_json::to_string(&event)?);
                if event.is_terminal() {
                    if let ProtocolEventKind::RunError { message, .. } = &event.kind {
                        failure = Some(message.clone());
                    }
                }
            }
            _ = &mut interrupt, if !interrupted => {
                interrupted = true;
                info!(thread_id = %thread_id, run_id = %run_id, "Interrupted, cancelling run");
                agent.runtime.cancel(&thread_id, &run_id);
            }
        }
    }

    match failure {
        Some(message) => Err(message.into()),
        None => Ok(()),
    }
}

/// A single-message run input.
fn run_input(message: &str, thread: Option<String>, model: Option<String>) -> Value {
    let mut input = json!({
        "threadId": thread.unwrap_or_else(|| format!("cli-{}", Uuid::new_v4())),
        "runId": Uuid::new_v4().to_string(),
        "messages": [{
            "id": Uuid::new_v4().to_string(),
            "role": "user",
            "content": message,
        }],
        "tools": [],
        "context": [],
        "state": {},
    });
    if let Some(model) = model {
        input["forwardedProps"] = json!({ "modelId": model });
    }
    input
}
