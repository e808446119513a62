//! Fleet status command

use anyhow::Result;
use colored::*;
use corral_client::FleetClient;
use corral_core::dto::fleet::{FleetStatus, HostState, HostSummary};

use super::agent::{colorize_health, print_agent_summary};
use crate::config::Config;

pub async fn show_status(config: &Config) -> Result<()> {
    let client = FleetClient::new(&config.daemon_url);
    let status = client.status().await?;

    print_status(&status);
    Ok(())
}

fn print_status(status: &FleetStatus) {
    println!(
        "{} {}",
        "Fleet health:".bold(),
        colorize_health(status.health)
    );
    println!(
        "  Executing:    {}/{}",
        status.executing, status.max_concurrent_jobs
    );
    println!("  Crashes:      {}", status.crash_count);
    println!(
        "  As of:        {}",
        status
            .generated_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();

    println!("{}", format!("Hosts ({}):", status.hosts.len()).bold());
    for host in &status.hosts {
        print_host_line(host);
    }
    println!();

    if status.agents.is_empty() {
        println!("{}", "No agents running.".yellow());
        return;
    }
    println!("{}", format!("Agents ({}):", status.agents.len()).bold());
    for agent in &status.agents {
        print_agent_summary(agent);
    }
}

fn print_host_line(host: &HostSummary) {
    let state = match host.state {
        HostState::Online => host.state.to_string().green(),
        HostState::Offline => host.state.to_string().red().bold(),
    };

    println!(
        "  {} {} {} {}/{} agents, {} crash(es)",
        "▸".cyan(),
        host.host_id.bold(),
        state,
        host.running,
        host.capacity,
        host.crashes
    );
    if let Some(error) = &host.last_error {
        println!("    {}", error.red());
    }
}
