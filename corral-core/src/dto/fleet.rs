//! Fleet status DTOs
//!
//! What the daemon exposes to operators about its hosts and agents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentSnapshot;
use crate::domain::health::HealthStatus;

/// Whether a host is still allowed to run agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostState {
    Online,
    Offline,
}

impl std::fmt::Display for HostState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostState::Online => write!(f, "online"),
            HostState::Offline => write!(f, "offline"),
        }
    }
}

/// Per-host view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSummary {
    pub host_id: String,
    /// Desired number of agents
    pub capacity: usize,
    /// Agents with a live task
    pub running: usize,
    pub state: HostState,
    pub last_error: Option<String>,
    pub crashes: u64,
}

/// Aggregated fleet view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetStatus {
    pub health: HealthStatus,
    pub hosts: Vec<HostSummary>,
    pub agents: Vec<AgentSnapshot>,
    pub executing: usize,
    pub max_concurrent_jobs: usize,
    /// Unexpected agent terminations since start
    pub crash_count: u64,
    pub generated_at: DateTime<Utc>,
}
