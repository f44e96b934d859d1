//! `reagent config`: Show the effective configuration.

use std::path::Path;

use reagent_config::AppConfig;

use super::load_config;

pub fn run(config_path: Option<&Path>, path_only: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path_only {
        let path = config_path.map_or_else(|| AppConfig::config_dir().join("config.toml"), Path::to_path_buf);
        println!("{}", path.display());
        return Ok(());
    }

    let config = load_config(config_path)?;
    println!("{}", config.redacted_toml());
    Ok(())
}
