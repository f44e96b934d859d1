//! `reagent serve`: Start the HTTP gateway.

use std::path::Path;

use reagent_agent::AgentBuilder;

use super::{load_config, require_api_key};

pub async fn run(config_path: Option<&Path>, port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(config_path)?;
    if let Some(port) = port_override {
        config.gateway.port = port;
    }
    require_api_key(&config)?;

    let agent = AgentBuilder::new(config.clone()).build().await?;

    println!("Reagent gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {}", config.model.default_model);
    println!("   Tools:     {}", agent.tools.list_tools(false, &[]).len());

    reagent_gateway::serve(agent, config).await
}
