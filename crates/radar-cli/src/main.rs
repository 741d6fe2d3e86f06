mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config, port, bind, no_bus, rotate_token } => {
            commands::serve(config, port, bind, no_bus, rotate_token).await
        }
        Command::Backfill { dry_run, seed_kv_only, chunk_size } => {
            commands::backfill(dry_run, seed_kv_only, chunk_size, cli.remote, cli.token).await
        }
        Command::Status => commands::status(cli.remote, cli.token).await,
        Command::Packages { component_type, status } => {
            commands::packages(component_type, status, cli.remote, cli.token).await
        }
    }
}
