//! Agent control loop
//!
//! Drives one runner through register → idle → claim → execute → report,
//! with degraded/offline branches forced by host health and credential
//! validity. Health and credential changes arrive as watch events and are
//! checked at every transition point. While a job is executing they are
//! recorded and applied once the result has been reported.

use chrono::Utc;
use corral_core::domain::agent::{AgentSnapshot, AgentState};
use corral_core::domain::health::HealthStatus;
use corral_core::domain::lease::JobLease;
use corral_core::domain::result::ExecutionResult;
use corral_core::domain::runner::RunnerIdentity;
use corral_core::dto::job::{PollRequest, ReportStatus};
use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::heartbeat::Heartbeat;
use super::{AgentCommand, AgentConfig, AgentDeps, AgentHandle, RECENT_RESULTS};
use crate::backoff::{Backoff, retry};
use crate::config::OfflinePolicy;
use crate::error::{Result, RunnerError};
use crate::repository::{PersistedAgent, slot_key};

const COMMAND_QUEUE: usize = 16;

/// Why an agent is offline; decides whether it may leave on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OfflineCause {
    /// Host health critical; recovers when health is ok again
    Health,
    /// Credential store invalid; recovers when it holds a valid token
    Credentials,
    /// Coordinator rejected our token; needs an operator clear
    Rejected,
    /// Repeated unrecoverable coordinator errors; needs an operator clear
    CoordinatorErrors,
}

impl OfflineCause {
    fn recovers_by_itself(self) -> bool {
        matches!(self, OfflineCause::Health | OfflineCause::Credentials)
    }
}

enum Wake {
    Timer,
    Stop,
    Health,
    Credentials,
    Command(AgentCommand),
}

pub struct RunnerAgent {
    config: AgentConfig,
    deps: AgentDeps,
    slot_key: String,
    record: PersistedAgent,

    snapshot_tx: watch::Sender<AgentSnapshot>,
    commands: mpsc::Receiver<AgentCommand>,
    commands_tx: mpsc::Sender<AgentCommand>,
    stop: CancellationToken,

    health_rx: watch::Receiver<HealthStatus>,
    health_open: bool,
    valid_rx: watch::Receiver<bool>,
    valid_open: bool,
    health: HealthStatus,

    poll_backoff: Backoff,
    register_backoff: Backoff,
    offline_cause: Option<OfflineCause>,
    last_error: Option<String>,
    coordinator_errors: u32,
    registered: bool,
    jobs_completed: u64,
    recent: VecDeque<ExecutionResult>,
}

impl RunnerAgent {
    /// Loads the slot's persisted record (or creates a fresh identity) and
    /// queues a cancelled result for any job a previous process left in
    /// flight.
    pub async fn load(config: AgentConfig, deps: AgentDeps) -> Result<Self> {
        let slot_key = slot_key(&config.host_id, config.slot);

        let mut record = match deps.state_store.load(&slot_key).await? {
            Some(record) => {
                let configured: BTreeSet<String> = config.labels.iter().cloned().collect();
                if record.identity.labels != configured {
                    warn!(
                        runner_id = %record.identity.runner_id,
                        "Configured labels differ from the registered identity; keeping the identity"
                    );
                }
                record
            }
            None => {
                let identity = RunnerIdentity::new(
                    config.host_id.clone(),
                    config.labels.iter().cloned(),
                    config.capabilities.iter().cloned(),
                );
                info!(runner_id = %identity.runner_id, slot = %slot_key, "Created runner identity");
                PersistedAgent::new(identity)
            }
        };

        if let Some(job_id) = record.recover_in_flight() {
            warn!(
                runner_id = %record.identity.runner_id,
                job_id = %job_id,
                "Job was executing when the runner went down; it will be reported cancelled"
            );
        }

        record.state = AgentState::Registering;
        record.updated_at = Utc::now();
        deps.state_store.save(&slot_key, &record).await?;

        let snapshot = AgentSnapshot::new(record.identity.runner_id, &config.host_id, config.slot);
        let (snapshot_tx, _) = watch::channel(snapshot);
        let (commands_tx, commands) = mpsc::channel(COMMAND_QUEUE);

        let health_rx = deps.health.clone();
        let health = *health_rx.borrow();
        let valid_rx = deps.credentials.subscribe();

        let agent = Self {
            poll_backoff: Backoff::new(config.poll_interval, config.poll_max_interval),
            register_backoff: Backoff::new(config.poll_interval, config.poll_max_interval)
                .with_jitter(),
            config,
            deps,
            slot_key,
            record,
            snapshot_tx,
            commands,
            commands_tx,
            stop: CancellationToken::new(),
            health_rx,
            health_open: true,
            valid_rx,
            valid_open: true,
            health,
            offline_cause: None,
            last_error: None,
            coordinator_errors: 0,
            registered: false,
            jobs_completed: 0,
            recent: VecDeque::with_capacity(RECENT_RESULTS),
        };
        agent.publish();
        Ok(agent)
    }

    pub fn runner_id(&self) -> Uuid {
        self.record.identity.runner_id
    }

    /// Starts the control loop on the runtime
    pub fn spawn(self) -> AgentHandle {
        let runner_id = self.runner_id();
        let snapshot = self.snapshot_tx.subscribe();
        let commands = self.commands_tx.clone();
        let stop = self.stop.clone();

        let task = tokio::spawn(self.run());
        AgentHandle::new(runner_id, snapshot, commands, stop, task)
    }

    /// Runs until stopped (Ok) or until an unrecoverable local failure (Err)
    pub async fn run(mut self) -> Result<()> {
        let runner_id = self.runner_id();
        info!(runner_id = %runner_id, slot = %self.slot_key, "Runner agent started");

        // Independent of `stop`: heartbeats continue through the shutdown grace
        let heartbeat_stop = CancellationToken::new();
        let heartbeat = tokio::spawn(
            Heartbeat {
                coordinator: self.deps.coordinator.clone(),
                credentials: self.deps.credentials.clone(),
                snapshot: self.snapshot_tx.subscribe(),
                commands: self.commands_tx.clone(),
                interval: self.config.heartbeat_interval,
                stop: heartbeat_stop.clone(),
            }
            .run(),
        );

        let outcome = self.drive().await;

        heartbeat_stop.cancel();
        let _ = heartbeat.await;

        match &outcome {
            Ok(()) => info!(runner_id = %runner_id, "Runner agent stopped"),
            Err(e) => error!(runner_id = %runner_id, "Runner agent failed: {}", e),
        }
        outcome
    }

    async fn drive(&mut self) -> Result<()> {
        loop {
            if self.stop.is_cancelled() {
                break;
            }

            match self.record.state {
                AgentState::Registering => self.register_step().await?,
                AgentState::Idle => self.idle_step().await?,
                AgentState::Degraded => self.degraded_step().await?,
                AgentState::Offline => self.offline_step().await?,
                AgentState::Terminated => return Ok(()),
                other => {
                    // Claiming, executing and reporting complete inside idle_step
                    self.go_offline(
                        OfflineCause::CoordinatorErrors,
                        format!("agent loop resumed in unexpected state {}", other),
                    );
                }
            }
        }

        self.transition(AgentState::Terminated);
        self.persist().await
    }

    // =========================================================================
    // States
    // =========================================================================

    async fn register_step(&mut self) -> Result<()> {
        if let Some((cause, reason)) = self.offline_gate() {
            self.go_offline(cause, reason);
            return Ok(());
        }

        let token = match self.deps.credentials.get_token() {
            Ok(token) => token,
            Err(e) => {
                self.go_offline(OfflineCause::Credentials, e.to_string());
                return Ok(());
            }
        };

        match self
            .deps
            .coordinator
            .register(&self.record.identity, &token)
            .await
        {
            Ok(ack) => {
                info!(runner_id = %self.runner_id(), "Registered at {}", ack.accepted_at);
                self.registered = true;
                self.register_backoff.reset();
                self.coordinator_errors = 0;
                self.last_error = None;
                self.transition(AgentState::Idle);
            }
            Err(RunnerError::Auth(msg)) => self.auth_failed("registration", msg),
            Err(e) => {
                if self.note_coordinator_error(&e) {
                    return Ok(());
                }
                let delay = self.register_backoff.next_delay();
                warn!(runner_id = %self.runner_id(), "Registration failed: {}; retrying in {:?}", e, delay);
                let wake = self.wait(Some(delay)).await;
                self.handle_wake(wake);
            }
        }

        Ok(())
    }

    async fn idle_step(&mut self) -> Result<()> {
        if let Some((cause, reason)) = self.offline_gate() {
            self.go_offline(cause, reason);
            return Ok(());
        }
        if self.health == HealthStatus::Degraded {
            self.transition(AgentState::Degraded);
            return Ok(());
        }

        // Older results go out before a new job is claimed
        if !self.record.pending_reports.is_empty() {
            match self.flush_reports().await {
                Ok(()) => {}
                Err(e @ RunnerError::Storage(_)) => return Err(e),
                Err(RunnerError::Auth(msg)) => {
                    self.auth_failed("report", msg);
                    return Ok(());
                }
                Err(e) => {
                    let delay = self.poll_backoff.next_delay();
                    warn!(
                        runner_id = %self.runner_id(),
                        "{} result(s) still queued: {}; retrying in {:?}",
                        self.record.pending_reports.len(), e, delay
                    );
                    let wake = self.wait(Some(delay)).await;
                    self.handle_wake(wake);
                    return Ok(());
                }
            }
        }

        // Only claim once we may execute: keeps the fleet under its cap
        let slots = self.deps.job_slots.clone();
        let permit = tokio::select! {
            permit = slots.acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    // Closed only when the fleet is going away
                    self.stop.cancel();
                    return Ok(());
                }
            },
            wake = self.wait(None) => {
                self.handle_wake(wake);
                return Ok(());
            }
        };

        self.claim(permit).await
    }

    async fn claim(&mut self, permit: OwnedSemaphorePermit) -> Result<()> {
        let token = match self.deps.credentials.get_token() {
            Ok(token) => token,
            Err(e) => {
                self.go_offline(OfflineCause::Credentials, e.to_string());
                return Ok(());
            }
        };

        self.transition(AgentState::Claiming);

        let request = PollRequest {
            labels: self.record.identity.labels.iter().cloned().collect(),
            capabilities: self.record.identity.capabilities.iter().cloned().collect(),
        };

        let polled = self
            .deps
            .coordinator
            .poll(self.runner_id(), &token, &request)
            .await;

        let delay = match polled {
            Ok(Some(lease)) => {
                self.poll_backoff.reset();
                self.coordinator_errors = 0;
                return self.execute(lease, permit).await;
            }
            Ok(None) => {
                let delay = self.poll_backoff.next_delay();
                debug!(runner_id = %self.runner_id(), "No job available, next poll in {:?}", delay);
                delay
            }
            Err(RunnerError::LeaseConflict(_)) => {
                // Someone else got it; there is work around, so poll again soon
                debug!(runner_id = %self.runner_id(), "Lost claim race");
                self.poll_backoff.reset();
                self.poll_backoff.current()
            }
            Err(RunnerError::Auth(msg)) => {
                self.auth_failed("poll", msg);
                return Ok(());
            }
            Err(e) => {
                if self.note_coordinator_error(&e) {
                    return Ok(());
                }
                let delay = self.poll_backoff.next_delay();
                warn!(runner_id = %self.runner_id(), "Poll failed: {}; next poll in {:?}", e, delay);
                delay
            }
        };

        drop(permit);
        self.transition(AgentState::Idle);

        let wake = self.wait(Some(delay)).await;
        self.handle_wake(wake);
        Ok(())
    }

    async fn execute(&mut self, lease: JobLease, permit: OwnedSemaphorePermit) -> Result<()> {
        let job_id = lease.job_id;
        let runner_id = self.runner_id();

        // Persisted before anything runs, so a crash is always reported
        self.record.in_flight = Some(lease.clone());
        self.transition(AgentState::Executing);
        self.persist().await?;
        info!(runner_id = %runner_id, job_id = %job_id, "Claimed job {}", lease.payload_ref);

        let executor = self.deps.executor.clone();
        let limits = self.config.limits.clone();
        let job_cancel = CancellationToken::new();
        let execution = executor.execute(&lease, &limits, &job_cancel);
        tokio::pin!(execution);

        let mut grace_deadline: Option<Instant> = None;

        let result = loop {
            let grace = async move {
                match grace_deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                result = &mut execution => break result,

                _ = self.stop.cancelled(), if grace_deadline.is_none() => {
                    info!(
                        runner_id = %runner_id, job_id = %job_id,
                        "Shutdown requested, job has {:?} to finish", self.config.shutdown_grace
                    );
                    grace_deadline = Some(Instant::now() + self.config.shutdown_grace);
                }

                _ = grace, if !job_cancel.is_cancelled() => {
                    warn!(runner_id = %runner_id, job_id = %job_id, "Shutdown grace elapsed, cancelling job");
                    job_cancel.cancel();
                }

                changed = self.health_rx.changed(), if self.health_open => {
                    if changed.is_err() {
                        self.health_open = false;
                    }
                    self.refresh_health();
                    if self.health != HealthStatus::Ok {
                        info!(
                            runner_id = %runner_id, job_id = %job_id,
                            "Health is {}, applying after the job is reported", self.health
                        );
                    }
                    if self.health == HealthStatus::Critical
                        && self.config.offline_policy == OfflinePolicy::CancelInFlight
                    {
                        job_cancel.cancel();
                    }
                }

                changed = self.valid_rx.changed(), if self.valid_open => {
                    if changed.is_err() {
                        self.valid_open = false;
                    }
                    let valid = *self.valid_rx.borrow_and_update();
                    if !valid && self.config.offline_policy == OfflinePolicy::CancelInFlight {
                        job_cancel.cancel();
                    }
                }

                Some(command) = self.commands.recv() => match command {
                    AgentCommand::Revoke(revoked) if revoked == job_id => {
                        warn!(runner_id = %runner_id, job_id = %job_id, "Lease revoked, cancelling job");
                        job_cancel.cancel();
                    }
                    AgentCommand::Revoke(other) => {
                        debug!(runner_id = %runner_id, "Ignoring revocation of job {} we do not hold", other);
                    }
                    AgentCommand::Clear => {
                        self.last_error = None;
                        self.publish();
                    }
                },
            }
        };

        drop(permit);

        // The lease is done; its result takes its place in one write
        self.jobs_completed += 1;
        self.remember(result.clone());
        self.record.in_flight = None;
        self.record.pending_reports.push(result);
        self.transition(AgentState::Reporting);
        self.persist().await?;

        self.report_step().await
    }

    async fn report_step(&mut self) -> Result<()> {
        match self.flush_reports().await {
            Ok(()) => {}
            Err(e @ RunnerError::Storage(_)) => return Err(e),
            Err(RunnerError::Auth(msg)) => {
                self.auth_failed("report", msg);
                return Ok(());
            }
            Err(e) => warn!(
                runner_id = %self.runner_id(),
                "Report deferred, {} result(s) queued: {}",
                self.record.pending_reports.len(), e
            ),
        }

        // Loop top terminates
        if self.stop.is_cancelled() {
            return Ok(());
        }

        if let Some((cause, reason)) = self.offline_gate() {
            self.go_offline(cause, reason);
        } else if self.health == HealthStatus::Degraded {
            self.transition(AgentState::Degraded);
        } else {
            self.transition(AgentState::Idle);
        }
        Ok(())
    }

    async fn degraded_step(&mut self) -> Result<()> {
        if let Some((cause, reason)) = self.offline_gate() {
            self.go_offline(cause, reason);
            return Ok(());
        }
        if self.health == HealthStatus::Ok {
            info!(runner_id = %self.runner_id(), "Health recovered, accepting jobs again");
            self.transition(AgentState::Idle);
            return Ok(());
        }

        // Refuses claims, but still delivers what it owes
        if !self.record.pending_reports.is_empty() {
            match self.flush_reports().await {
                Ok(()) => {}
                Err(e @ RunnerError::Storage(_)) => return Err(e),
                Err(RunnerError::Auth(msg)) => {
                    self.auth_failed("report", msg);
                    return Ok(());
                }
                Err(e) => debug!(runner_id = %self.runner_id(), "Queued reports not delivered: {}", e),
            }
        }

        let wake = self.wait(None).await;
        self.handle_wake(wake);
        Ok(())
    }

    async fn offline_step(&mut self) -> Result<()> {
        if let Some(cause) = self.offline_cause.filter(|c| c.recovers_by_itself()) {
            match self.offline_gate() {
                None => {
                    info!(runner_id = %self.runner_id(), "Offline cause {:?} cleared, recovering", cause);
                    self.offline_cause = None;
                    self.last_error = None;
                    let next = if self.registered && cause == OfflineCause::Health {
                        AgentState::Idle
                    } else {
                        AgentState::Registering
                    };
                    self.transition(next);
                    return Ok(());
                }
                Some((still, reason)) if still != cause => {
                    self.offline_cause = Some(still);
                    self.last_error = Some(reason);
                    self.publish();
                }
                Some(_) => {}
            }

            // Token expiry raises no event, so self-healing causes are
            // also rechecked on the poll cadence
            let wake = self.wait(Some(self.config.poll_interval)).await;
            self.handle_wake(wake);
            return Ok(());
        }

        let wake = self.wait(None).await;
        self.handle_wake(wake);
        Ok(())
    }

    // =========================================================================
    // Reporting
    // =========================================================================

    /// Delivers queued results oldest first. Stops at the first result that
    /// cannot be delivered and returns why; refused results are dropped.
    async fn flush_reports(&mut self) -> Result<()> {
        let runner_id = self.runner_id();

        while let Some(result) = self.record.pending_reports.first().cloned() {
            let token = self.deps.credentials.get_token()?;
            let coordinator = self.deps.coordinator.clone();

            let delivered = retry(&self.config.report_retry, &self.stop, "report", || {
                let coordinator = coordinator.clone();
                let token = token.clone();
                let result = result.clone();
                async move {
                    match coordinator.report(runner_id, &token, &result).await? {
                        ReportStatus::Ack => Ok(()),
                        ReportStatus::RetryLater => Err(RunnerError::Network(
                            "coordinator asked to retry later".to_string(),
                        )),
                    }
                }
            })
            .await;

            match delivered {
                Ok(()) => {
                    info!(runner_id = %runner_id, job_id = %result.job_id, outcome = %result.outcome, "Result reported");
                }
                Err(e) if e.is_transient() || e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(runner_id = %runner_id, job_id = %result.job_id, "Coordinator refused result, dropping it: {}", e);
                }
            }

            self.record.pending_reports.remove(0);
            self.persist().await?;
            self.publish();
        }

        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Reasons the agent must be offline right now, if any
    fn offline_gate(&mut self) -> Option<(OfflineCause, String)> {
        self.refresh_health();

        // Covers expiry as well as an invalidated store
        if let Err(e) = self.deps.credentials.get_token() {
            return Some((OfflineCause::Credentials, e.to_string()));
        }
        if self.health == HealthStatus::Critical {
            let err = RunnerError::ResourceExhaustion("host health is critical".to_string());
            return Some((OfflineCause::Health, err.to_string()));
        }
        None
    }

    fn refresh_health(&mut self) {
        let health = *self.health_rx.borrow_and_update();
        if health != self.health {
            self.health = health;
            self.publish();
        }
    }

    /// Counts a non-transient coordinator error; true if that sent the
    /// agent offline
    fn note_coordinator_error(&mut self, err: &RunnerError) -> bool {
        self.last_error = Some(err.to_string());
        if err.is_transient() {
            return false;
        }

        self.coordinator_errors += 1;
        if self.coordinator_errors >= self.config.max_coordinator_errors {
            self.go_offline(
                OfflineCause::CoordinatorErrors,
                format!(
                    "{} consecutive coordinator errors, last: {}",
                    self.coordinator_errors, err
                ),
            );
            return true;
        }
        false
    }

    /// An `Auth` failure from the local store recovers once a token is
    /// rotated in; one from the coordinator needs an operator clear
    fn auth_failed(&mut self, action: &str, msg: String) {
        match self.offline_gate() {
            Some((OfflineCause::Credentials, reason)) => {
                self.go_offline(OfflineCause::Credentials, reason)
            }
            _ => self.go_offline(OfflineCause::Rejected, format!("{} rejected: {}", action, msg)),
        }
    }

    fn go_offline(&mut self, cause: OfflineCause, reason: String) {
        if cause.recovers_by_itself() {
            warn!(runner_id = %self.runner_id(), "Going offline: {}", reason);
        } else {
            error!(runner_id = %self.runner_id(), "Going offline until cleared: {}", reason);
        }
        self.offline_cause = Some(cause);
        self.last_error = Some(reason);
        if !self.transition(AgentState::Offline) {
            self.publish();
        }
    }

    /// Operator clear: forget the failure and start over from registration
    fn clear(&mut self) {
        info!(runner_id = %self.runner_id(), "Cleared by operator");
        self.last_error = None;
        self.coordinator_errors = 0;

        if self.record.state == AgentState::Offline {
            self.offline_cause = None;
            self.registered = false;
            self.transition(AgentState::Registering);
        } else {
            self.publish();
        }
    }

    async fn wait(&mut self, delay: Option<Duration>) -> Wake {
        let timer = async move {
            match delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = timer => Wake::Timer,
            _ = self.stop.cancelled() => Wake::Stop,
            changed = self.health_rx.changed(), if self.health_open => {
                if changed.is_err() {
                    self.health_open = false;
                }
                Wake::Health
            }
            changed = self.valid_rx.changed(), if self.valid_open => {
                if changed.is_err() {
                    self.valid_open = false;
                }
                Wake::Credentials
            }
            Some(command) = self.commands.recv() => Wake::Command(command),
        }
    }

    fn handle_wake(&mut self, wake: Wake) {
        match wake {
            Wake::Timer | Wake::Stop => {}
            Wake::Health => self.refresh_health(),
            Wake::Credentials => {
                let valid = *self.valid_rx.borrow_and_update();
                debug!(runner_id = %self.runner_id(), "Credential store valid: {}", valid);
            }
            Wake::Command(AgentCommand::Clear) => self.clear(),
            Wake::Command(AgentCommand::Revoke(job_id)) => {
                debug!(runner_id = %self.runner_id(), "Ignoring revocation of job {}, nothing executing", job_id);
            }
        }
    }

    /// Applies a legal transition and publishes it; false if refused
    fn transition(&mut self, next: AgentState) -> bool {
        let current = self.record.state;
        if current == next {
            return false;
        }
        if !current.can_transition_to(next) {
            error!(runner_id = %self.runner_id(), "Refusing illegal transition {} -> {}", current, next);
            return false;
        }

        info!(runner_id = %self.runner_id(), "{} -> {}", current, next);
        self.record.state = next;
        self.record.updated_at = Utc::now();
        self.publish();
        true
    }

    fn remember(&mut self, result: ExecutionResult) {
        if self.recent.len() == RECENT_RESULTS {
            self.recent.pop_front();
        }
        self.recent.push_back(result);
    }

    async fn persist(&mut self) -> Result<()> {
        self.record.updated_at = Utc::now();
        self.deps.state_store.save(&self.slot_key, &self.record).await
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(AgentSnapshot {
            runner_id: self.runner_id(),
            host_id: self.config.host_id.clone(),
            slot: self.config.slot,
            state: self.record.state,
            health: self.health,
            current_job: self.record.in_flight.as_ref().map(|lease| lease.job_id),
            last_error: self.last_error.clone(),
            jobs_completed: self.jobs_completed,
            pending_reports: self.record.pending_reports.len(),
            recent_results: self.recent.iter().cloned().collect(),
            updated_at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentExit;
    use crate::testkit::{
        CoordinatorEvent, HOST, Harness, PollReply, SandboxEvent, SandboxScript, lease, token,
        wait_for_state, wait_until,
    };
    use corral_core::domain::lease::JobPayload;
    use corral_core::domain::result::Outcome;

    async fn wait_for_polls(h: &Harness, count: usize) {
        for _ in 0..20_000 {
            if h.coordinator.poll_count() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("only {} polls, wanted {}", h.coordinator.poll_count(), count);
    }

    fn job_done(count: u64) -> impl Fn(&AgentSnapshot) -> bool {
        move |s| s.jobs_completed == count && s.pending_reports == 0 && s.state == AgentState::Idle
    }

    #[tokio::test(start_paused = true)]
    async fn test_claims_executes_and_reports() {
        let h = Harness::new();
        h.coordinator.push_job(JobPayload::command("make test"));
        h.sandbox.script(SandboxScript::exit_after(Duration::from_secs(10), 0).with_output(&["ok\n"]));

        let agent = h.spawn(0).await;
        let snapshot = wait_until(&agent, "job reported", job_done(1)).await;

        let jobs = h.coordinator.recorded_jobs();
        assert_eq!(jobs.len(), 1);
        let recorded = h.coordinator.recorded(jobs[0]);
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].outcome, Outcome::Success);
        assert!(recorded[0].log_ref.is_some());

        assert_eq!(snapshot.recent_results.len(), 1);
        assert_eq!(snapshot.current_job, None);

        let record = h.store.get(&slot_key(HOST, 0)).unwrap();
        assert!(record.in_flight.is_none());
        assert!(record.pending_reports.is_empty());
        // claim, result and delivery are each persisted
        assert!(h.store.saves() >= 3);

        agent.stop();
        assert_eq!(agent.join().await, AgentExit::Stopped);
        assert_eq!(h.store.get(&slot_key(HOST, 0)).unwrap().state, AgentState::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_polls_back_off_to_the_cap() {
        let h = Harness::new();
        let _agent = h.spawn(0).await;

        wait_for_polls(&h, 7).await;

        let times = h.coordinator.poll_times();
        let gaps: Vec<u64> = times
            .windows(2)
            .take(6)
            .map(|w| (w[1] - w[0]).as_secs())
            .collect();
        assert_eq!(gaps, vec![5, 10, 20, 40, 60, 60]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_lease_at_a_time() {
        let h = Harness::new();
        for i in 0..3 {
            h.coordinator.push_job(JobPayload::command(format!("job {}", i)));
            h.sandbox.script(SandboxScript::exit_after(Duration::from_secs(10), 0));
        }

        let agent = h.spawn(0).await;
        wait_until(&agent, "three jobs", job_done(3)).await;

        assert!(!h.coordinator.saw_double_lease());
        assert_eq!(h.coordinator.recorded_jobs().len(), 3);
        assert_eq!(h.sandbox.max_alive(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_claim_race_is_not_an_error() {
        let h = Harness::new();
        h.coordinator.push_poll(PollReply::Conflict);
        h.coordinator.push_job(JobPayload::command("make"));

        let agent = h.spawn(0).await;
        let snapshot = wait_until(&agent, "job after conflict", job_done(1)).await;

        assert_eq!(snapshot.last_error, None);
        assert_eq!(h.coordinator.recorded_jobs().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_job_is_killed_then_reported_once() {
        let h = Harness::new();
        let mut payload = JobPayload::command("sleep infinity");
        payload.timeout_secs = Some(60);
        h.coordinator.push_job(payload);
        h.sandbox.script(SandboxScript::hang().ignoring_terminate());

        let agent = h.spawn(0).await;
        wait_until(&agent, "timeout reported", job_done(1)).await;

        let job = h.coordinator.recorded_jobs()[0];
        let recorded = h.coordinator.recorded(job);
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].outcome, Outcome::Timeout);
        assert_eq!(
            h.sandbox.events(),
            vec![SandboxEvent::Started, SandboxEvent::Terminated, SandboxEvent::Killed]
        );
        assert!(h.sandbox.all_dead());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_reports_in_flight_job_cancelled_exactly_once() {
        let h = Harness::new();
        let orphan = lease(JobPayload::command("make"));

        let identity = RunnerIdentity::new(HOST, vec!["self-hosted".to_string()], vec!["arm64".to_string()]);
        let runner_id = identity.runner_id;
        let mut record = PersistedAgent::new(identity);
        record.state = AgentState::Executing;
        record.in_flight = Some(orphan.clone());
        h.store.insert(&slot_key(HOST, 0), record);

        let agent = h.spawn(0).await;
        assert_eq!(agent.runner_id(), runner_id);
        wait_until(&agent, "recovery report", |s| {
            s.state == AgentState::Idle && s.pending_reports == 0
        })
        .await;
        agent.stop();
        agent.join().await;

        // A second restart has nothing left to report
        let polls = h.coordinator.poll_count();
        let agent = h.spawn(0).await;
        wait_for_polls(&h, polls + 2).await;
        agent.stop();
        agent.join().await;

        let recorded = h.coordinator.recorded(orphan.job_id);
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].outcome, Outcome::Cancelled);

        let reports = h
            .coordinator
            .events()
            .into_iter()
            .filter(|e| *e == CoordinatorEvent::Report(orphan.job_id))
            .count();
        assert_eq!(reports, 1);
        assert_eq!(h.sandbox.runs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_critical_health_finishes_job_then_goes_offline() {
        let h = Harness::new();
        h.coordinator.push_job(JobPayload::command("make"));
        h.sandbox.script(SandboxScript::exit_after(Duration::from_secs(60), 0));

        let agent = h.spawn(0).await;
        wait_for_state(&agent, AgentState::Executing).await;
        h.set_health(HealthStatus::Critical);

        let snapshot = wait_for_state(&agent, AgentState::Offline).await;
        assert!(snapshot.last_error.unwrap().contains("critical"));
        assert_eq!(snapshot.jobs_completed, 1);

        // Finished normally and reported before going offline
        let job = h.coordinator.recorded_jobs()[0];
        assert_eq!(h.coordinator.recorded(job)[0].outcome, Outcome::Success);
        assert_eq!(h.sandbox.events(), vec![SandboxEvent::Started]);
        let last = h
            .coordinator
            .events()
            .into_iter()
            .filter(|e| !matches!(e, CoordinatorEvent::Heartbeat(_)))
            .last();
        assert_eq!(last, Some(CoordinatorEvent::Report(job)));

        // No polling while offline
        let polls = h.coordinator.poll_count();
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(h.coordinator.poll_count(), polls);
        assert_eq!(agent.state(), AgentState::Offline);

        // Recovers on its own once health is ok
        h.set_health(HealthStatus::Ok);
        wait_for_state(&agent, AgentState::Idle).await;
        wait_for_polls(&h, polls + 1).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_policy_aborts_job_on_critical() {
        let mut h = Harness::new();
        h.offline_policy = OfflinePolicy::CancelInFlight;
        h.coordinator.push_job(JobPayload::command("make"));
        h.sandbox.script(SandboxScript::hang());

        let agent = h.spawn(0).await;
        wait_for_state(&agent, AgentState::Executing).await;
        h.set_health(HealthStatus::Critical);

        wait_for_state(&agent, AgentState::Offline).await;
        let job = h.coordinator.recorded_jobs()[0];
        assert_eq!(h.coordinator.recorded(job)[0].outcome, Outcome::Cancelled);
        assert!(h.sandbox.all_dead());
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_retried_without_rerunning_job() {
        let h = Harness::new();
        h.coordinator.fail_next_reports([
            RunnerError::Network("connection reset".to_string()),
            RunnerError::Network("connection reset".to_string()),
        ]);
        h.coordinator.push_job(JobPayload::command("make"));

        let agent = h.spawn(0).await;
        wait_until(&agent, "report delivered", job_done(1)).await;

        let jobs = h.coordinator.recorded_jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(h.coordinator.recorded(jobs[0]).len(), 1);
        assert_eq!(h.coordinator.report_calls(), 3);
        assert_eq!(h.sandbox.runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undelivered_result_is_queued_and_sent_before_next_claim() {
        let h = Harness::new();
        h.coordinator
            .fail_next_reports((0..5).map(|_| RunnerError::Network("unreachable".to_string())));
        h.coordinator.push_job(JobPayload::command("first"));
        h.coordinator.push_job(JobPayload::command("second"));

        let agent = h.spawn(0).await;
        wait_until(&agent, "both jobs", job_done(2)).await;

        assert_eq!(h.coordinator.report_calls(), 7);
        assert_eq!(h.sandbox.runs(), 2);

        // First result went out before the second job was claimed
        let events = h.coordinator.events();
        let Some(CoordinatorEvent::Report(first_job)) = events
            .iter()
            .find(|e| matches!(e, CoordinatorEvent::Report(_)))
            .cloned()
        else {
            panic!("no report sent");
        };
        let first_delivered = events
            .iter()
            .rposition(|e| *e == CoordinatorEvent::Report(first_job))
            .unwrap();
        let second_poll = events
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, CoordinatorEvent::Poll(_)))
            .nth(1)
            .map(|(i, _)| i)
            .unwrap();
        assert!(first_delivered < second_poll);
    }

    #[tokio::test(start_paused = true)]
    async fn test_revoked_lease_cancels_job() {
        let h = Harness::new();
        h.coordinator.push_job(JobPayload::command("make"));
        h.sandbox.script(SandboxScript::hang());

        let agent = h.spawn(0).await;
        let snapshot = wait_for_state(&agent, AgentState::Executing).await;
        let job = snapshot.current_job.unwrap();
        h.coordinator.revoke(job);

        wait_until(&agent, "revoked job reported", job_done(1)).await;
        assert_eq!(h.coordinator.recorded(job)[0].outcome, Outcome::Cancelled);
        assert!(h.sandbox.events().contains(&SandboxEvent::Terminated));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_job_after_grace() {
        let h = Harness::new();
        h.coordinator.push_job(JobPayload::command("make"));
        h.sandbox.script(SandboxScript::hang());

        let agent = h.spawn(0).await;
        let job = wait_for_state(&agent, AgentState::Executing).await.current_job.unwrap();

        let started = tokio::time::Instant::now();
        agent.stop();
        assert_eq!(agent.join().await, AgentExit::Stopped);
        assert!(started.elapsed() >= Duration::from_secs(30));

        assert_eq!(h.coordinator.recorded(job)[0].outcome, Outcome::Cancelled);
        let record = h.store.get(&slot_key(HOST, 0)).unwrap();
        assert_eq!(record.state, AgentState::Terminated);
        assert!(record.in_flight.is_none());
        assert!(record.pending_reports.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_lets_short_job_finish() {
        let h = Harness::new();
        h.coordinator.push_job(JobPayload::command("make"));
        h.sandbox.script(SandboxScript::exit_after(Duration::from_secs(10), 0));

        let agent = h.spawn(0).await;
        let job = wait_for_state(&agent, AgentState::Executing).await.current_job.unwrap();
        agent.stop();
        agent.join().await;

        assert_eq!(h.coordinator.recorded(job)[0].outcome, Outcome::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_registration_needs_clear() {
        let h = Harness::new();
        h.coordinator.reject_registration(true);

        let agent = h.spawn(0).await;
        let snapshot = wait_for_state(&agent, AgentState::Offline).await;
        assert!(snapshot.last_error.unwrap().contains("rejected"));

        h.coordinator.reject_registration(false);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(agent.state(), AgentState::Offline);
        assert_eq!(h.coordinator.poll_count(), 0);

        assert!(agent.command(AgentCommand::Clear));
        let snapshot = wait_for_state(&agent, AgentState::Idle).await;
        assert_eq!(snapshot.last_error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_credentials_go_offline_until_rotated() {
        let h = Harness::new();
        let agent = h.spawn(0).await;
        wait_for_state(&agent, AgentState::Idle).await;

        h.credentials.mark_invalid("refresh failed");
        wait_for_state(&agent, AgentState::Offline).await;
        let polls = h.coordinator.poll_count();

        h.credentials.rotate(token("token-2", 3600)).unwrap();
        wait_for_state(&agent, AgentState::Idle).await;
        wait_for_polls(&h, polls + 1).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_token_holds_agent_offline_until_rotated() {
        let h = Harness::new();
        h.credentials.rotate(token("stale", 0)).unwrap();

        let agent = h.spawn(0).await;
        let snapshot = wait_for_state(&agent, AgentState::Offline).await;
        assert!(snapshot.last_error.unwrap().contains("expired"));

        // Settles instead of bouncing back through registration
        let settled = agent.snapshot().updated_at;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(agent.state(), AgentState::Offline);
        assert_eq!(agent.snapshot().updated_at, settled);
        assert!(
            !h.coordinator
                .events()
                .iter()
                .any(|e| matches!(e, CoordinatorEvent::Register(_)))
        );

        h.credentials.rotate(token("token-2", 3600)).unwrap();
        wait_for_state(&agent, AgentState::Idle).await;
        wait_for_polls(&h, 1).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_held_while_store_invalid_is_delivered_after_rotation() {
        let h = Harness::new();
        h.coordinator.push_job(JobPayload::command("make test"));
        h.sandbox.script(SandboxScript::exit_after(Duration::from_secs(60), 0));

        let agent = h.spawn(0).await;
        wait_for_state(&agent, AgentState::Executing).await;
        h.credentials.mark_invalid("refresh failed");

        // The job finishes, its result waits for a usable token
        let snapshot = wait_for_state(&agent, AgentState::Offline).await;
        assert_eq!(snapshot.pending_reports, 1);
        assert!(snapshot.last_error.unwrap().contains("credential store is invalid"));
        assert!(h.coordinator.recorded_jobs().is_empty());

        h.credentials.rotate(token("token-2", 3600)).unwrap();
        wait_until(&agent, "queued result delivered", job_done(1)).await;

        let jobs = h.coordinator.recorded_jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(h.coordinator.recorded(jobs[0]).len(), 1);
        assert_eq!(h.sandbox.runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotated_token_is_used_without_auth_errors() {
        let h = Harness::new();
        h.coordinator.accept_only(&["token-1"]);

        let agent = h.spawn(0).await;
        wait_for_polls(&h, 2).await;

        h.credentials.rotate(token("token-2", 3600)).unwrap();
        h.coordinator.accept_only(&["token-2"]);
        let polls = h.coordinator.poll_count();
        wait_for_polls(&h, polls + 3).await;

        assert_eq!(h.coordinator.auth_failures(), 0);
        assert_ne!(agent.state(), AgentState::Offline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_refuses_claims_until_recovered() {
        let h = Harness::new();
        let agent = h.spawn(0).await;
        wait_for_polls(&h, 1).await;

        h.set_health(HealthStatus::Degraded);
        wait_for_state(&agent, AgentState::Degraded).await;
        let polls = h.coordinator.poll_count();
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(h.coordinator.poll_count(), polls);

        h.set_health(HealthStatus::Ok);
        wait_for_state(&agent, AgentState::Idle).await;
        wait_for_polls(&h, polls + 1).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_job_slots_bound_concurrent_execution() {
        let h = Harness::with_job_slots(1);
        for _ in 0..2 {
            h.coordinator.push_job(JobPayload::command("make"));
            h.sandbox.script(SandboxScript::exit_after(Duration::from_secs(30), 0));
        }

        let first = h.spawn(0).await;
        let second = h.spawn(1).await;
        assert_ne!(first.runner_id(), second.runner_id());

        for _ in 0..20_000 {
            if h.coordinator.recorded_jobs().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        assert_eq!(h.coordinator.recorded_jobs().len(), 2);
        assert_eq!(h.sandbox.max_alive(), 1);
    }
}
