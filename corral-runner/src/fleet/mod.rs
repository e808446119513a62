//! Fleet Controller
//!
//! Owns every agent on the host. Reconciles the desired agent count per
//! host against the agents actually running, restarts crashed agents under
//! a restart policy and keeps the number of live agents under the global
//! concurrency cap. Everything else talks to it through a FleetHandle.

mod controller;
mod factory;
mod restart;

pub use controller::{FleetConfig, FleetController};
pub use factory::{AgentFactory, LocalAgentFactory};
pub use restart::{RestartDecision, RestartTracker};

use corral_core::domain::agent::AgentSnapshot;
use corral_core::dto::fleet::FleetStatus;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// How crashed agents are restarted
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Restarts allowed per slot within `window` before the host goes offline
    pub max_restarts: u32,
    pub window: Duration,
    /// Delay before the second restart in a window; doubles after that
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            window: Duration::from_secs(600),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FleetError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Fleet controller is not running")]
    Unavailable,
}

/// Message types for the controller loop
#[derive(Debug)]
pub enum FleetCommand {
    Status {
        reply: oneshot::Sender<FleetStatus>,
    },
    Agents {
        reply: oneshot::Sender<Vec<AgentSnapshot>>,
    },
    Agent {
        runner_id: Uuid,
        reply: oneshot::Sender<Option<AgentSnapshot>>,
    },
    StopAgent {
        runner_id: Uuid,
        reply: oneshot::Sender<Result<(), FleetError>>,
    },
    ClearAgent {
        runner_id: Uuid,
        reply: oneshot::Sender<Result<(), FleetError>>,
    },
    ClearHost {
        host_id: String,
        reply: oneshot::Sender<Result<(), FleetError>>,
    },
}

/// Cloneable entry point to a running FleetController
#[derive(Debug, Clone)]
pub struct FleetHandle {
    commands: mpsc::Sender<FleetCommand>,
}

impl FleetHandle {
    pub(crate) fn new(commands: mpsc::Sender<FleetCommand>) -> Self {
        Self { commands }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> FleetCommand,
    ) -> Result<T, FleetError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| FleetError::Unavailable)?;
        response.await.map_err(|_| FleetError::Unavailable)
    }

    pub async fn status(&self) -> Result<FleetStatus, FleetError> {
        self.request(|reply| FleetCommand::Status { reply }).await
    }

    pub async fn agents(&self) -> Result<Vec<AgentSnapshot>, FleetError> {
        self.request(|reply| FleetCommand::Agents { reply }).await
    }

    pub async fn agent(&self, runner_id: Uuid) -> Result<AgentSnapshot, FleetError> {
        self.request(|reply| FleetCommand::Agent { runner_id, reply })
            .await?
            .ok_or_else(|| FleetError::NotFound(format!("agent {}", runner_id)))
    }

    pub async fn stop_agent(&self, runner_id: Uuid) -> Result<(), FleetError> {
        self.request(|reply| FleetCommand::StopAgent { runner_id, reply })
            .await?
    }

    pub async fn clear_agent(&self, runner_id: Uuid) -> Result<(), FleetError> {
        self.request(|reply| FleetCommand::ClearAgent { runner_id, reply })
            .await?
    }

    pub async fn clear_host(&self, host_id: &str) -> Result<(), FleetError> {
        let host_id = host_id.to_string();
        self.request(|reply| FleetCommand::ClearHost { host_id, reply })
            .await?
    }
}
