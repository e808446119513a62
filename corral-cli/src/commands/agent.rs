//! Agent command handlers
//!
//! Listing, inspecting, stopping and clearing runner agents.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use corral_client::FleetClient;
use corral_core::domain::agent::{AgentSnapshot, AgentState};
use corral_core::domain::health::HealthStatus;
use corral_core::domain::result::{ExecutionResult, Outcome};

use crate::config::Config;
use crate::id_resolver::resolve_agent_id;
use crate::types::IdOrPrefix;

/// Agent subcommands
#[derive(Subcommand)]
pub enum AgentCommands {
    /// List all agents
    List,
    /// Show one agent with its recent results
    Show {
        /// Runner ID or unambiguous prefix
        id: String,
    },
    /// Stop an agent; it stays stopped until cleared
    Stop {
        /// Runner ID or unambiguous prefix
        id: String,
    },
    /// Clear an offline or stopped agent so it registers again
    Clear {
        /// Runner ID or unambiguous prefix
        id: String,
    },
}

pub async fn handle_agent_command(command: AgentCommands, config: &Config) -> Result<()> {
    let client = FleetClient::new(&config.daemon_url);

    match command {
        AgentCommands::List => list_agents(&client).await,
        AgentCommands::Show { id } => show_agent(&client, &id).await,
        AgentCommands::Stop { id } => stop_agent(&client, &id).await,
        AgentCommands::Clear { id } => clear_agent(&client, &id).await,
    }
}

async fn list_agents(client: &FleetClient) -> Result<()> {
    let agents = client.list_agents().await?;

    if agents.is_empty() {
        println!("{}", "No agents running.".yellow());
        return Ok(());
    }

    println!("{}", format!("Found {} agent(s):", agents.len()).bold());
    println!();
    for agent in &agents {
        print_agent_summary(agent);
    }

    Ok(())
}

async fn show_agent(client: &FleetClient, id: &str) -> Result<()> {
    let runner_id = resolve_agent_id(client, &IdOrPrefix::parse(id)).await?;
    let agent = client.get_agent(runner_id).await?;

    print_agent_summary(&agent);

    if agent.recent_results.is_empty() {
        println!("    {}", "No finished jobs yet.".dimmed());
    } else {
        println!("    {}", "Recent results:".bold());
        for result in agent.recent_results.iter().rev() {
            print_result_line(result);
        }
    }
    println!();

    Ok(())
}

async fn stop_agent(client: &FleetClient, id: &str) -> Result<()> {
    let runner_id = resolve_agent_id(client, &IdOrPrefix::parse(id)).await?;
    client.stop_agent(runner_id).await?;

    println!(
        "{} Stopping agent {}",
        "✓".green(),
        runner_id.to_string().bold()
    );
    println!(
        "  {}",
        "It will not be restarted until cleared.".dimmed()
    );

    Ok(())
}

async fn clear_agent(client: &FleetClient, id: &str) -> Result<()> {
    let runner_id = resolve_agent_id(client, &IdOrPrefix::parse(id)).await?;
    client.clear_agent(runner_id).await?;

    println!(
        "{} Cleared agent {}",
        "✓".green(),
        runner_id.to_string().bold()
    );

    Ok(())
}

pub(crate) fn print_agent_summary(agent: &AgentSnapshot) {
    println!(
        "  {} Agent {} ({}/{})",
        "▸".cyan(),
        agent.runner_id.to_string().bold(),
        agent.host_id,
        agent.slot
    );
    println!("    State:        {}", colorize_state(agent.state));
    println!("    Health:       {}", colorize_health(agent.health));
    if let Some(job) = agent.current_job {
        println!("    Job:          {}", job.to_string().cyan());
    }
    println!("    Completed:    {}", agent.jobs_completed);
    if agent.pending_reports > 0 {
        println!(
            "    Unreported:   {}",
            agent.pending_reports.to_string().yellow()
        );
    }
    if let Some(error) = &agent.last_error {
        println!("    Last Error:   {}", error.red());
    }
    println!(
        "    Updated:      {}",
        agent
            .updated_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

fn print_result_line(result: &ExecutionResult) {
    let exit = result
        .exit_code
        .map(|code| code.to_string())
        .unwrap_or_else(|| "-".to_string());

    println!(
        "      {} {} exit={} {}ms {}",
        result.finished_at.format("%H:%M:%S").to_string().dimmed(),
        colorize_outcome(result.outcome),
        exit,
        result.duration_ms,
        result.job_id.to_string().dimmed()
    );
    if let Some(message) = &result.error_message {
        println!("        {}", message.dimmed());
    }
}

pub(crate) fn colorize_state(state: AgentState) -> ColoredString {
    let label = state.to_string();
    match state {
        AgentState::Idle => label.green(),
        AgentState::Claiming | AgentState::Executing | AgentState::Reporting => label.cyan(),
        AgentState::Registering | AgentState::Degraded => label.yellow(),
        AgentState::Offline => label.red(),
        AgentState::Terminated => label.dimmed(),
    }
}

pub(crate) fn colorize_health(health: HealthStatus) -> ColoredString {
    let label = health.to_string();
    match health {
        HealthStatus::Ok => label.green(),
        HealthStatus::Degraded => label.yellow(),
        HealthStatus::Critical => label.red().bold(),
    }
}

fn colorize_outcome(outcome: Outcome) -> ColoredString {
    let label = format!("{:<9}", outcome.to_string());
    match outcome {
        Outcome::Success => label.green(),
        Outcome::Failure => label.red(),
        Outcome::Timeout => label.magenta(),
        Outcome::Cancelled => label.yellow(),
    }
}
