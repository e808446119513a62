//! Runner DTOs
//!
//! Bodies for registration and heartbeats.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::agent::AgentState;
use crate::domain::health::HealthStatus;
use crate::domain::runner::RunnerIdentity;

/// Request to register a runner with the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRunner {
    pub identity: RunnerIdentity,
}

/// Coordinator acknowledgement of a registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAck {
    pub runner_id: Uuid,
    pub accepted_at: DateTime<Utc>,
}

/// Periodic liveness report from a runner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub state: AgentState,
    pub health: HealthStatus,
    pub current_job: Option<Uuid>,
}

/// Coordinator reply to a heartbeat
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatAck {
    /// Leases the coordinator has taken back from this runner
    #[serde(default)]
    pub revoked_jobs: Vec<Uuid>,
}
