//! Shared fixtures for loop, adapter and runtime tests.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reagent_config::{RetryConfig, ToolsConfig};
use reagent_core::error::ToolError;
use reagent_core::event::AgentEvent;
use reagent_core::model::InferenceConfig;
use reagent_core::tool::{ToolCall, ToolCallContext, ToolDeclaration, ToolOrigin, ToolOutput, ToolProvider};
use reagent_providers::{ModelClient, ScriptedBackend, ScriptedTurn};
use reagent_telemetry::MetricsRegistry;
use reagent_tools::ToolExecutor;
use tokio::sync::mpsc;

use crate::prompt::PromptAssembler;
use crate::react::{LoopSettings, ReasoningLoop};

/// A provider named `search` offering `logs` (requires `query`) and
/// `fail` (always errors). Records every call it receives.
#[derive(Default)]
pub struct SearchProvider {
    calls: Mutex<Vec<(String, serde_json::Value, ToolCallContext)>>,
}

impl SearchProvider {
    pub fn calls(&self) -> Vec<(String, serde_json::Value, ToolCallContext)> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl ToolProvider for SearchProvider {
    fn name(&self) -> &str {
        "search"
    }

    async fn list_tools(&self) -> Result<Vec<ToolDeclaration>, ToolError> {
        let declare = |name: &str, schema: serde_json::Value| ToolDeclaration {
            name: name.into(),
            description: format!("Search {name}"),
            input_schema: schema,
            origin: ToolOrigin::Server {
                provider: "search".into(),
            },
        };
        Ok(vec![
            declare(
                "logs",
                serde_json::json!({
                    "type": "object",
                    "properties": {"query": {"type": "string"}},
                    "required": ["query"]
                }),
            ),
            declare("fail", serde_json::json!({"type": "object"})),
        ])
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        context: &ToolCallContext,
    ) -> Result<ToolOutput, ToolError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name.to_string(), arguments.clone(), context.clone()));
        match name {
            "logs" => Ok(ToolOutput::json(serde_json::json!({
                "hits": 2,
                "query": arguments["query"],
            }))),
            _ => Err(ToolError::ExecutionFailed {
                tool_name: name.to_string(),
                reason: "index unavailable".into(),
            }),
        }
    }
}

/// Everything a loop test needs to inspect afterwards.
pub struct Harness {
    pub backend: Arc<ScriptedBackend>,
    pub provider: Arc<SearchProvider>,
    pub metrics: Arc<MetricsRegistry>,
    pub tools: Arc<ToolExecutor>,
    pub prompt: Arc<PromptAssembler>,
    pub client: Arc<ModelClient>,
}

impl Harness {
    pub async fn new(turns: Vec<ScriptedTurn>) -> Self {
        let backend = Arc::new(ScriptedBackend::new(turns));
        let provider = Arc::new(SearchProvider::default());
        let metrics = Arc::new(MetricsRegistry::new());

        let mut tools = ToolExecutor::new(ToolsConfig::default(), metrics.clone());
        tools
            .connect("search", provider.clone())
            .await
            .expect("search provider connects");
        let tools = Arc::new(tools);

        let prompt = Arc::new(PromptAssembler::new());
        prompt.set_tools(&tools.list_tools(false, &[]));

        let client = Arc::new(ModelClient::new(backend.clone(), RetryConfig::default(), metrics.clone()));

        Self {
            backend,
            provider,
            metrics,
            tools,
            prompt,
            client,
        }
    }

    /// A loop with no pacing delay.
    pub fn reasoning_loop(&self, max_iterations: u32) -> ReasoningLoop {
        ReasoningLoop::new(
            self.client.clone(),
            self.tools.clone(),
            self.prompt.clone(),
            self.metrics.clone(),
        )
        .with_settings(LoopSettings {
            max_iterations,
            pacing_step: Duration::ZERO,
            pacing_cap: Duration::ZERO,
            inference: InferenceConfig::default(),
        })
    }
}

pub fn tool_call(id: &str, name: &str, input: serde_json::Value) -> ToolCall {
    ToolCall {
        id: id.into(),
        name: name.into(),
        input,
    }
}

/// Collect everything left on a closed channel.
pub async fn drain<T>(mut rx: mpsc::Receiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Some(item) = rx.recv().await {
        out.push(item);
    }
    out
}

/// Short tag per event, for order assertions.
pub fn event_tags(events: &[AgentEvent]) -> Vec<&'static str> {
    events
        .iter()
        .map(|e| match e {
            AgentEvent::TextStart { .. } => "text_start",
            AgentEvent::TextDelta { .. } => "text_delta",
            AgentEvent::ToolInputStart { .. } => "tool_input_start",
            AgentEvent::ToolInputDelta { .. } => "tool_input_delta",
            AgentEvent::ToolUseStart { .. } => "tool_use_start",
            AgentEvent::ToolResult { .. } => "tool_result",
            AgentEvent::ToolError { .. } => "tool_error",
            AgentEvent::TurnComplete => "turn_complete",
            AgentEvent::Error { .. } => "error",
        })
        .collect()
}
