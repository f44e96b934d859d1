//! `reagent tools`: List the server tools the model can call.

use std::path::Path;

use reagent_agent::AgentBuilder;

use super::{load_config, require_api_key};

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    require_api_key(&config)?;
    let agent = AgentBuilder::new(config).build().await?;

    let tools = agent.tools.list_tools(false, &[]);
    println!("{} tools from {}", tools.len(), agent.tools.connection_names().join(", "));
    println!();
    for tool in &tools {
        println!("  {}", tool.qualified_name());
        println!("      {}", tool.description);
        let required = tool.required_parameters();
        if !required.is_empty() {
            println!("      required: {}", required.join(", "));
        }
    }
    Ok(())
}
