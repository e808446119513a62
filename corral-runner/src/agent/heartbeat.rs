//! Heartbeat loop
//!
//! Tells the coordinator what the agent is doing and relays lease
//! revocations from the ack back into the agent.

use corral_core::domain::agent::{AgentSnapshot, AgentState};
use corral_core::dto::runner::HeartbeatRequest;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::AgentCommand;
use crate::credentials::CredentialStore;
use crate::repository::Coordinator;

pub(super) struct Heartbeat {
    pub coordinator: Arc<dyn Coordinator>,
    pub credentials: Arc<CredentialStore>,
    pub snapshot: watch::Receiver<AgentSnapshot>,
    pub commands: mpsc::Sender<AgentCommand>,
    pub interval: Duration,
    pub stop: CancellationToken,
}

impl Heartbeat {
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.stop.cancelled() => break,
            }

            let snapshot = self.snapshot.borrow().clone();

            // Not known to the coordinator (yet, or any more)
            if snapshot.state == AgentState::Registering || snapshot.state.is_terminal() {
                continue;
            }

            let Ok(token) = self.credentials.get_token() else {
                continue;
            };

            let request = HeartbeatRequest {
                state: snapshot.state,
                health: snapshot.health,
                current_job: snapshot.current_job,
            };

            match self
                .coordinator
                .heartbeat(snapshot.runner_id, &token, &request)
                .await
            {
                Ok(ack) => {
                    for job_id in ack.revoked_jobs {
                        warn!(runner_id = %snapshot.runner_id, job_id = %job_id, "Coordinator revoked lease");
                        if self.commands.send(AgentCommand::Revoke(job_id)).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => debug!(runner_id = %snapshot.runner_id, "Heartbeat failed: {}", e),
            }
        }
    }
}
