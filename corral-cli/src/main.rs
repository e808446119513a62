//! Corral CLI
//!
//! Operator command-line interface for a corral runner daemon.

mod commands;
mod config;
mod id_resolver;
mod types;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "corral")]
#[command(about = "Corral runner fleet CLI", long_about = None)]
struct Cli {
    /// Runner daemon URL
    #[arg(
        long,
        env = "CORRAL_DAEMON_URL",
        default_value = "http://127.0.0.1:9090"
    )]
    daemon_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        daemon_url: cli.daemon_url,
    };

    handle_command(cli.command, &config).await
}
