pub mod agent_engine;
pub mod cli;
pub mod commands;
pub mod config;
pub mod course_plan;
pub mod errors;
pub mod ingest;
pub mod llm;
pub mod rag;
pub mod repl;

#[cfg(test)]
pub(crate) mod testing;

use clap::Parser;

use crate::cli::{Cli, Command};
use crate::config::AppConfig;
use crate::errors::RagResult;

/// Parses the command line, loads configuration and runs the chosen subcommand.
pub async fn run() -> RagResult<()> {
    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ragbench=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();
    let cfg = match &cli.command {
        // Writing defaults must work before any file exists.
        Command::Config { write: true } => AppConfig::default(),
        _ => config::load_config(config_path)?,
    };
    commands::dispatch(cli.command, &cfg, config_path).await
}
