use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "radar-core",
    about = "ServiceRadar core: device identity, edge onboarding, ingest fan-out",
    version
)]
pub struct Cli {
    /// Connect to a running core server instead of acting locally.
    #[arg(long, env = "RADAR_URL", global = true)]
    pub remote: Option<String>,

    /// Bearer token for the API (falls back to ~/.radar/token).
    #[arg(long, env = "RADAR_TOKEN", global = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the core API server.
    Serve {
        /// Path to core.yml. Defaults apply when absent.
        #[arg(long, env = "RADAR_CONFIG")]
        config: Option<PathBuf>,

        #[arg(long, default_value_t = 8090)]
        port: u16,

        #[arg(long, default_value = "127.0.0.1")]
        bind: String,

        /// Skip the event bus connection (events are dropped).
        #[arg(long)]
        no_bus: bool,

        /// Rotate the API bearer token before starting.
        #[arg(long)]
        rotate_token: bool,
    },

    /// Run the identity backfill against a running server.
    Backfill {
        /// Count what would be emitted; publish nothing.
        #[arg(long)]
        dry_run: bool,

        /// Prime the identity KV mirror without publishing tombstones.
        #[arg(long)]
        seed_kv_only: bool,

        /// Tombstones per published batch (1..=1000).
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Show server status (allowed pollers, buffers, cache counters).
    Status,

    /// List onboarding packages.
    Packages {
        /// Filter by component type (poller|agent|checker).
        #[arg(long)]
        component_type: Option<String>,

        /// Filter by status (comma-separated).
        #[arg(long)]
        status: Option<String>,
    },
}
