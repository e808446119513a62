//! Fleet reconciliation loop
//!
//! The controller keeps an arena of agents keyed by runner_id plus one
//! entry per registered host with its desired slot count. A reconcile pass
//! reaps agents whose task ended, applies the restart policy to the ones
//! that ended unexpectedly and starts missing agents. Agents share one
//! job-slot semaphore sized to `max_concurrent_jobs`, so any number of them
//! may be idle but only that many execute at once.

use chrono::Utc;
use corral_core::domain::agent::{AgentSnapshot, AgentState};
use corral_core::domain::health::HealthStatus;
use corral_core::dto::fleet::{FleetStatus, HostState, HostSummary};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::restart::{RestartDecision, RestartTracker};
use super::{AgentFactory, FleetCommand, FleetError, FleetHandle, RestartPolicy};
use crate::agent::{AgentCommand, AgentExit, AgentHandle};

const COMMAND_QUEUE: usize = 64;

#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Global cap on simultaneously executing agents, reported in status
    pub max_concurrent_jobs: usize,
    pub restart: RestartPolicy,
    pub reconcile_interval: Duration,
    /// How long shutdown waits for agents before aborting them
    pub shutdown_timeout: Duration,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 1,
            restart: RestartPolicy::default(),
            reconcile_interval: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(70),
        }
    }
}

struct AgentEntry {
    host_id: String,
    slot: usize,
    handle: Option<AgentHandle>,
    /// Last published snapshot; kept after the task ends
    snapshot: AgentSnapshot,
}

#[derive(Default)]
struct SlotEntry {
    runner_id: Option<Uuid>,
    restarts: RestartTracker,
    not_before: Option<Instant>,
    /// Stopped by an operator; not restarted until cleared
    parked: bool,
}

struct HostEntry {
    capacity: usize,
    state: HostState,
    last_error: Option<String>,
    crashes: u64,
    slots: Vec<SlotEntry>,
}

pub struct FleetController {
    config: FleetConfig,
    factory: Arc<dyn AgentFactory>,
    agents: HashMap<Uuid, AgentEntry>,
    hosts: BTreeMap<String, HostEntry>,
    crash_count: u64,
    shutting_down: bool,
    commands: mpsc::Receiver<FleetCommand>,
}

impl FleetController {
    pub fn new(config: FleetConfig, factory: Arc<dyn AgentFactory>) -> (Self, FleetHandle) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_QUEUE);

        let controller = Self {
            config,
            factory,
            agents: HashMap::new(),
            hosts: BTreeMap::new(),
            crash_count: 0,
            shutting_down: false,
            commands,
        };

        (controller, FleetHandle::new(commands_tx))
    }

    /// Declares `capacity` agents on `host_id`; re-registering resizes
    pub fn register_host(&mut self, host_id: &str, capacity: usize) {
        let host = self
            .hosts
            .entry(host_id.to_string())
            .or_insert_with(|| HostEntry {
                capacity: 0,
                state: HostState::Online,
                last_error: None,
                crashes: 0,
                slots: Vec::new(),
            });

        host.capacity = capacity;
        while host.slots.len() < capacity {
            host.slots.push(SlotEntry::default());
        }

        // Shrinking stops the agents in the slots that went away
        for slot in host.slots.iter_mut().skip(capacity) {
            slot.parked = true;
            if let Some(handle) = slot
                .runner_id
                .and_then(|id| self.agents.get(&id))
                .and_then(|entry| entry.handle.as_ref())
            {
                handle.stop();
            }
        }

        info!(host_id = %host_id, capacity = capacity, "Host registered");
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// One reconciliation pass
    pub async fn reconcile(&mut self) {
        self.reap().await;

        if self.shutting_down {
            return;
        }

        let now = Instant::now();

        let host_ids: Vec<String> = self.hosts.keys().cloned().collect();
        for host_id in host_ids {
            for slot in 0..self.hosts[&host_id].capacity {
                if self.hosts[&host_id].state == HostState::Offline {
                    break;
                }
                if !self.slot_wants_agent(&host_id, slot, now) {
                    continue;
                }

                match self.factory.start(&host_id, slot).await {
                    Ok(handle) => self.adopt(&host_id, slot, handle),
                    Err(e) => {
                        let runner_id = self.hosts[&host_id].slots[slot].runner_id;
                        self.record_crash(&host_id, slot, runner_id, format!("agent failed to start: {}", e), now);
                    }
                }
            }
        }
    }

    /// Collects agents whose task ended and applies the restart policy
    async fn reap(&mut self) {
        let finished: Vec<Uuid> = self
            .agents
            .iter()
            .filter(|(_, entry)| entry.handle.as_ref().is_some_and(AgentHandle::is_finished))
            .map(|(id, _)| *id)
            .collect();

        let now = Instant::now();
        for runner_id in finished {
            let Some(entry) = self.agents.get_mut(&runner_id) else {
                continue;
            };
            let Some(handle) = entry.handle.take() else {
                continue;
            };
            entry.snapshot = handle.snapshot();
            let host_id = entry.host_id.clone();
            let slot = entry.slot;

            let exit = handle.join().await;
            let expected = self.shutting_down
                || self
                    .hosts
                    .get(&host_id)
                    .and_then(|h| h.slots.get(slot))
                    .is_none_or(|s| s.parked);

            match exit {
                AgentExit::Stopped if expected => {
                    info!(runner_id = %runner_id, host_id = %host_id, slot = slot, "Agent stopped");
                    if let Some(entry) = self.agents.get_mut(&runner_id) {
                        entry.snapshot.state = AgentState::Terminated;
                    }
                }
                AgentExit::Stopped => {
                    self.record_crash(&host_id, slot, Some(runner_id), "agent exited unexpectedly".to_string(), now);
                }
                AgentExit::Crashed(reason) => {
                    self.record_crash(&host_id, slot, Some(runner_id), reason, now);
                }
            }
        }
    }

    fn record_crash(
        &mut self,
        host_id: &str,
        slot: usize,
        runner_id: Option<Uuid>,
        reason: String,
        now: Instant,
    ) {
        self.crash_count += 1;

        if let Some(entry) = runner_id.and_then(|id| self.agents.get_mut(&id)) {
            entry.snapshot.state = AgentState::Terminated;
            entry.snapshot.last_error = Some(reason.clone());
            entry.snapshot.updated_at = Utc::now();
        }

        let policy = self.config.restart.clone();
        let Some(host) = self.hosts.get_mut(host_id) else {
            return;
        };
        host.crashes += 1;
        let Some(slot_entry) = host.slots.get_mut(slot) else {
            return;
        };

        error!(
            host_id = %host_id, slot = slot, crash_count = self.crash_count,
            "Agent crashed: {}", reason
        );

        match slot_entry.restarts.record(now, &policy) {
            RestartDecision::Restart { delay } => {
                slot_entry.not_before = Some(now + delay);
                if !delay.is_zero() {
                    warn!(host_id = %host_id, slot = slot, "Restarting agent in {:?}", delay);
                }
            }
            RestartDecision::GiveUp => {
                let message = format!(
                    "slot {} crashed {} times within {:?}: {}",
                    slot,
                    slot_entry.restarts.recent(),
                    policy.window,
                    reason
                );
                error!(host_id = %host_id, "ALERT: host marked offline, {}", message);
                host.state = HostState::Offline;
                host.last_error = Some(message);
            }
        }
    }

    fn slot_wants_agent(&self, host_id: &str, slot: usize, now: Instant) -> bool {
        let Some(entry) = self.hosts.get(host_id).and_then(|h| h.slots.get(slot)) else {
            return false;
        };
        if entry.parked || entry.not_before.is_some_and(|at| at > now) {
            return false;
        }
        let running = entry
            .runner_id
            .and_then(|id| self.agents.get(&id))
            .is_some_and(|agent| agent.handle.is_some());
        !running
    }

    fn adopt(&mut self, host_id: &str, slot: usize, handle: AgentHandle) {
        let runner_id = handle.runner_id();
        info!(runner_id = %runner_id, host_id = %host_id, slot = slot, "Agent started");

        if let Some(entry) = self.hosts.get_mut(host_id).and_then(|h| h.slots.get_mut(slot)) {
            entry.runner_id = Some(runner_id);
            entry.not_before = None;
        }

        let snapshot = handle.snapshot();
        self.agents.insert(
            runner_id,
            AgentEntry {
                host_id: host_id.to_string(),
                slot,
                handle: Some(handle),
                snapshot,
            },
        );
    }

    fn live_agents(&self) -> usize {
        self.agents.values().filter(|a| a.handle.is_some()).count()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    fn refresh_snapshots(&mut self) {
        for entry in self.agents.values_mut() {
            if let Some(handle) = &entry.handle {
                entry.snapshot = handle.snapshot();
            }
        }
    }

    /// Every known agent, ordered by host and slot
    pub fn agents(&mut self) -> Vec<AgentSnapshot> {
        self.refresh_snapshots();
        let mut agents: Vec<AgentSnapshot> =
            self.agents.values().map(|entry| entry.snapshot.clone()).collect();
        agents.sort_by(|a, b| (&a.host_id, a.slot).cmp(&(&b.host_id, b.slot)));
        agents
    }

    pub fn agent(&mut self, runner_id: Uuid) -> Option<AgentSnapshot> {
        let entry = self.agents.get_mut(&runner_id)?;
        if let Some(handle) = &entry.handle {
            entry.snapshot = handle.snapshot();
        }
        Some(entry.snapshot.clone())
    }

    pub fn status(&mut self) -> FleetStatus {
        let agents = self.agents();

        let hosts = self
            .hosts
            .iter()
            .map(|(host_id, host)| HostSummary {
                host_id: host_id.clone(),
                capacity: host.capacity,
                running: self
                    .agents
                    .values()
                    .filter(|a| &a.host_id == host_id && a.handle.is_some())
                    .count(),
                state: host.state,
                last_error: host.last_error.clone(),
                crashes: host.crashes,
            })
            .collect();

        FleetStatus {
            health: HealthStatus::worst(
                self.agents
                    .values()
                    .filter(|a| a.handle.is_some())
                    .map(|a| a.snapshot.health),
            ),
            executing: agents
                .iter()
                .filter(|a| a.state.holds_job())
                .count(),
            hosts,
            agents,
            max_concurrent_jobs: self.config.max_concurrent_jobs,
            crash_count: self.crash_count,
            generated_at: Utc::now(),
        }
    }

    // =========================================================================
    // Operator intervention
    // =========================================================================

    /// Stops an agent gracefully; its slot stays empty until cleared
    pub fn stop_agent(&mut self, runner_id: Uuid) -> Result<(), FleetError> {
        let entry = self
            .agents
            .get(&runner_id)
            .ok_or_else(|| FleetError::NotFound(format!("agent {}", runner_id)))?;

        if let Some(slot) = self
            .hosts
            .get_mut(&entry.host_id)
            .and_then(|h| h.slots.get_mut(entry.slot))
        {
            slot.parked = true;
        }
        if let Some(handle) = &entry.handle {
            info!(runner_id = %runner_id, "Stopping agent on operator request");
            handle.stop();
        }
        Ok(())
    }

    /// Clears an agent's failure: a live agent leaves offline and
    /// registers again, a stopped or crashed slot may start again
    pub fn clear_agent(&mut self, runner_id: Uuid) -> Result<(), FleetError> {
        let entry = self
            .agents
            .get_mut(&runner_id)
            .ok_or_else(|| FleetError::NotFound(format!("agent {}", runner_id)))?;

        match &entry.handle {
            Some(handle) => {
                if !handle.command(AgentCommand::Clear) {
                    warn!(runner_id = %runner_id, "Agent did not accept clear command");
                }
            }
            None => entry.snapshot.last_error = None,
        }

        if let Some(slot) = self
            .hosts
            .get_mut(&entry.host_id)
            .and_then(|h| h.slots.get_mut(entry.slot))
        {
            slot.parked = false;
            slot.not_before = None;
            slot.restarts.reset();
        }

        info!(runner_id = %runner_id, "Agent cleared");
        Ok(())
    }

    /// Brings an offline host back into reconciliation
    pub fn clear_host(&mut self, host_id: &str) -> Result<(), FleetError> {
        let host = self
            .hosts
            .get_mut(host_id)
            .ok_or_else(|| FleetError::NotFound(format!("host {}", host_id)))?;

        host.state = HostState::Online;
        host.last_error = None;
        for slot in host.slots.iter_mut() {
            slot.restarts.reset();
            slot.not_before = None;
        }

        info!(host_id = %host_id, "Host cleared");
        Ok(())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Stops every agent and waits for them, aborting stragglers after the
    /// shutdown timeout
    pub async fn shutdown(&mut self) {
        self.shutting_down = true;
        info!("Stopping {} agent(s)", self.live_agents());

        let handles: Vec<(Uuid, AgentHandle)> = self
            .agents
            .iter_mut()
            .filter_map(|(id, entry)| entry.handle.take().map(|h| (*id, h)))
            .collect();

        for (_, handle) in &handles {
            handle.stop();
        }

        let deadline = Instant::now() + self.config.shutdown_timeout;
        for (runner_id, handle) in handles {
            let snapshot_source = handle.snapshot();
            let abort = handle.abort_handle();

            match tokio::time::timeout_at(deadline, handle.join()).await {
                Ok(AgentExit::Stopped) => debug!(runner_id = %runner_id, "Agent stopped"),
                Ok(AgentExit::Crashed(reason)) => {
                    warn!(runner_id = %runner_id, "Agent failed during shutdown: {}", reason)
                }
                Err(_) => {
                    error!(runner_id = %runner_id, "Agent did not stop in time, aborting");
                    abort.abort();
                }
            }

            if let Some(entry) = self.agents.get_mut(&runner_id) {
                entry.snapshot = snapshot_source;
                entry.snapshot.state = AgentState::Terminated;
            }
        }
    }

    /// Reconciles on an interval and serves commands until `shutdown`
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.reconcile_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            hosts = self.hosts.len(),
            max_concurrent_jobs = self.config.max_concurrent_jobs,
            "Fleet controller started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.reconcile().await,
                Some(command) = self.commands.recv() => self.handle_command(command),
            }
        }

        self.shutdown().await;
        info!(crash_count = self.crash_count, "Fleet controller stopped");
    }

    fn handle_command(&mut self, command: FleetCommand) {
        // A dropped reply only means the caller went away
        match command {
            FleetCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
            FleetCommand::Agents { reply } => {
                let _ = reply.send(self.agents());
            }
            FleetCommand::Agent { runner_id, reply } => {
                let _ = reply.send(self.agent(runner_id));
            }
            FleetCommand::StopAgent { runner_id, reply } => {
                let _ = reply.send(self.stop_agent(runner_id));
            }
            FleetCommand::ClearAgent { runner_id, reply } => {
                let _ = reply.send(self.clear_agent(runner_id));
            }
            FleetCommand::ClearHost { host_id, reply } => {
                let _ = reply.send(self.clear_host(&host_id));
            }
        }
    }
}
