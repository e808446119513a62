//! Runner agent lifecycle
//!
//! The state vocabulary of a runner agent and the snapshot it publishes
//! for the fleet controller and operators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::health::HealthStatus;
use crate::domain::result::ExecutionResult;

/// Lifecycle state of a runner agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Registering,
    Idle,
    Claiming,
    Executing,
    Reporting,
    Degraded,
    Offline,
    Terminated,
}

impl AgentState {
    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(self, next: AgentState) -> bool {
        use AgentState::*;

        match (self, next) {
            (Terminated, _) => false,
            (_, Terminated) => true,
            (_, Offline) => self != Offline,
            (Offline, Degraded) => false,
            (_, Degraded) => self != Degraded,
            (Registering, Idle) => true,
            (Idle, Claiming) => true,
            (Claiming, Executing) | (Claiming, Idle) => true,
            (Executing, Reporting) => true,
            (Reporting, Idle) => true,
            (Degraded, Idle) => true,
            // operator clear re-registers, health recovery returns to idle
            (Offline, Registering) | (Offline, Idle) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == AgentState::Terminated
    }

    /// A job may be in flight in these states
    pub fn holds_job(self) -> bool {
        matches!(self, AgentState::Executing | AgentState::Reporting)
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AgentState::Registering => "registering",
            AgentState::Idle => "idle",
            AgentState::Claiming => "claiming",
            AgentState::Executing => "executing",
            AgentState::Reporting => "reporting",
            AgentState::Degraded => "degraded",
            AgentState::Offline => "offline",
            AgentState::Terminated => "terminated",
        };
        write!(f, "{}", name)
    }
}

/// Read-only view of an agent, published on every transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub runner_id: Uuid,
    pub host_id: String,
    /// Slot on the host this agent occupies
    pub slot: usize,
    pub state: AgentState,
    pub health: HealthStatus,
    pub current_job: Option<Uuid>,
    /// Reason for the last failure, kept until cleared or recovered
    pub last_error: Option<String>,
    pub jobs_completed: u64,
    pub pending_reports: usize,
    /// Most recent results, newest last
    pub recent_results: Vec<ExecutionResult>,
    pub updated_at: DateTime<Utc>,
}

impl AgentSnapshot {
    pub fn new(runner_id: Uuid, host_id: impl Into<String>, slot: usize) -> Self {
        Self {
            runner_id,
            host_id: host_id.into(),
            slot,
            state: AgentState::Registering,
            health: HealthStatus::Ok,
            current_job: None,
            last_error: None,
            jobs_completed: 0,
            pending_reports: 0,
            recent_results: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}
