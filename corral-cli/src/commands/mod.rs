//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod agent;
mod host;
mod status;

pub use agent::AgentCommands;
pub use host::HostCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Show aggregated fleet status
    Status,
    /// Agent inspection and intervention
    Agent {
        #[command(subcommand)]
        command: AgentCommands,
    },
    /// Host intervention
    Host {
        #[command(subcommand)]
        command: HostCommands,
    },
}

/// Routes the command to the appropriate handler module
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Status => status::show_status(config).await,
        Commands::Agent { command } => agent::handle_agent_command(command, config).await,
        Commands::Host { command } => host::handle_host_command(command, config).await,
    }
}
