//! Runner Agent
//!
//! One agent per logical runner. Each runs its own sequential control
//! loop (register, poll, execute, report) and publishes an AgentSnapshot
//! on every change. The fleet controller talks to it through an
//! AgentHandle only.

mod heartbeat;
mod runner;

pub use runner::RunnerAgent;

use corral_core::domain::agent::{AgentSnapshot, AgentState};
use corral_core::domain::health::HealthStatus;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backoff::RetryPolicy;
use crate::config::{Config, OfflinePolicy};
use crate::credentials::CredentialStore;
use crate::error::Result;
use crate::repository::{Coordinator, StateStore};
use crate::sandbox::ResourceLimits;
use crate::service::JobExecutor;

/// Results kept in the snapshot for diagnostics
pub const RECENT_RESULTS: usize = 8;

/// Per-agent settings
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub host_id: String,
    pub slot: usize,
    pub labels: Vec<String>,
    pub capabilities: BTreeSet<String>,
    pub poll_interval: Duration,
    pub poll_max_interval: Duration,
    pub heartbeat_interval: Duration,
    pub report_retry: RetryPolicy,
    pub limits: ResourceLimits,
    pub offline_policy: OfflinePolicy,
    /// Time an in-flight job gets on shutdown before it is cancelled
    pub shutdown_grace: Duration,
    /// Consecutive non-transient coordinator errors before going offline
    pub max_coordinator_errors: u32,
}

impl AgentConfig {
    pub fn from_config(
        config: &Config,
        host_id: &str,
        slot: usize,
        capabilities: BTreeSet<String>,
    ) -> Self {
        Self {
            host_id: host_id.to_string(),
            slot,
            labels: config.labels.clone(),
            capabilities,
            poll_interval: config.poll_interval,
            poll_max_interval: config.poll_max_interval,
            heartbeat_interval: config.heartbeat_interval,
            report_retry: config.report_retry.clone(),
            limits: config.sandbox_limits.clone(),
            offline_policy: config.offline_policy,
            shutdown_grace: config.shutdown_grace,
            max_coordinator_errors: 5,
        }
    }
}

/// Shared collaborators every agent on the host uses
#[derive(Clone)]
pub struct AgentDeps {
    pub coordinator: Arc<dyn Coordinator>,
    pub credentials: Arc<CredentialStore>,
    /// Health status events from the host's monitor
    pub health: watch::Receiver<HealthStatus>,
    pub executor: Arc<JobExecutor>,
    pub state_store: Arc<dyn StateStore>,
    /// Permits for executing agents, fleet-wide
    pub job_slots: Arc<Semaphore>,
}

/// Out-of-band instructions to a running agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentCommand {
    /// Operator cleared the agent: leave offline and register again
    Clear,
    /// The coordinator revoked the lease on this job
    Revoke(Uuid),
}

/// How an agent task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentExit {
    Stopped,
    Crashed(String),
}

/// Controller-side view of a spawned agent
pub struct AgentHandle {
    runner_id: Uuid,
    snapshot: watch::Receiver<AgentSnapshot>,
    commands: mpsc::Sender<AgentCommand>,
    stop: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl AgentHandle {
    pub(crate) fn new(
        runner_id: Uuid,
        snapshot: watch::Receiver<AgentSnapshot>,
        commands: mpsc::Sender<AgentCommand>,
        stop: CancellationToken,
        task: JoinHandle<Result<()>>,
    ) -> Self {
        Self {
            runner_id,
            snapshot,
            commands,
            stop,
            task,
        }
    }

    pub fn runner_id(&self) -> Uuid {
        self.runner_id
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> AgentState {
        self.snapshot.borrow().state
    }

    /// Queues a command; false if the agent is gone or its queue is full
    pub fn command(&self, command: AgentCommand) -> bool {
        self.commands.try_send(command).is_ok()
    }

    /// Requests a graceful terminate
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Lets the caller abort the task after handing the handle to `join`
    pub fn abort_handle(&self) -> AbortHandle {
        self.task.abort_handle()
    }

    /// Waits for the agent task and classifies how it ended
    pub async fn join(self) -> AgentExit {
        match self.task.await {
            Ok(Ok(())) => AgentExit::Stopped,
            Ok(Err(e)) => AgentExit::Crashed(e.to_string()),
            Err(e) if e.is_panic() => AgentExit::Crashed("agent task panicked".to_string()),
            Err(_) => AgentExit::Crashed("agent task aborted".to_string()),
        }
    }
}
