//! Host command handlers

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use corral_client::FleetClient;

use crate::config::Config;

/// Host subcommands
#[derive(Subcommand)]
pub enum HostCommands {
    /// Bring a host taken offline by repeated crashes back into service
    Clear {
        /// Host ID
        id: String,
    },
}

pub async fn handle_host_command(command: HostCommands, config: &Config) -> Result<()> {
    let client = FleetClient::new(&config.daemon_url);

    match command {
        HostCommands::Clear { id } => {
            client.clear_host(&id).await?;
            println!("{} Cleared host {}", "✓".green(), id.bold());
            Ok(())
        }
    }
}
