//! Reagent CLI: the main entry point.
//!
//! Commands:
//! - `serve`: Start the HTTP gateway
//! - `run`: Run the agent once and print its events as JSON lines
//! - `tools`: List the server tools the model can call
//! - `config`: Show the effective configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "reagent", about = "Reagent: ReAct agent runtime", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ~/.reagent/config.toml)
    #[arg(short, long, global = true, env = "REAGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run the agent on a single message
    Run {
        #[arg(short, long)]
        message: String,

        /// Thread id (a new one is generated when omitted)
        #[arg(short, long)]
        thread: Option<String>,

        /// Model id for this run only
        #[arg(long)]
        model: Option<String>,
    },

    /// List available tools
    Tools,

    /// Show the effective configuration (secrets redacted)
    Config {
        /// Print the config file path instead
        #[arg(long)]
        path: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; `run` writes events to stdout.
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if cli.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Serve { port } => commands::serve::run(config_path, port).await?,
        Commands::Run { message, thread, model } => {
            commands::run::run(config_path, message, thread, model).await?
        }
        Commands::Tools => commands::tools::run(config_path).await?,
        Commands::Config { path } => commands::config_cmd::run(config_path, path)?,
    }

    Ok(())
}
