//! Test doubles
//!
//! In-memory stand-ins for the coordinator, the sandbox runtime, local
//! persistence, resource probes and the token issuer, plus a harness that
//! wires a runner agent to them.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use corral_core::domain::agent::{AgentSnapshot, AgentState};
use corral_core::domain::health::{HealthSample, HealthStatus};
use corral_core::domain::lease::{JobLease, JobPayload};
use corral_core::domain::result::ExecutionResult;
use corral_core::domain::runner::RunnerIdentity;
use corral_core::domain::token::RegistrationToken;
use corral_core::dto::job::{PollRequest, ReportStatus};
use corral_core::dto::runner::{HeartbeatAck, HeartbeatRequest, RegisterAck};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::{AgentCommand, AgentConfig, AgentDeps, AgentHandle, RunnerAgent};
use crate::backoff::RetryPolicy;
use crate::config::OfflinePolicy;
use crate::credentials::{CredentialConfig, CredentialStore, TokenSource};
use crate::error::{Result, RunnerError};
use crate::fleet::AgentFactory;
use crate::health::HealthProbe;
use crate::repository::{Coordinator, PersistedAgent, StateStore};
use crate::sandbox::{
    LogChunk, LogStream, ResourceLimits, Sandbox, SandboxHandle, SandboxSpec, WaitOutcome,
};
use crate::service::{ExecutorConfig, JobExecutor, LogStore, LogStoreConfig};

// =============================================================================
// Fixtures
// =============================================================================

/// A healthy sample at `temp_c`
pub fn sample(temp_c: f32) -> HealthSample {
    HealthSample {
        timestamp: Utc::now(),
        cpu_load: 0.5,
        temp_c: Some(temp_c),
        mem_available: 2 * 1024 * 1024 * 1024,
        disk_available: 20 * 1024 * 1024 * 1024,
    }
}

/// A fresh lease on a new job
pub fn lease(payload: JobPayload) -> JobLease {
    let job_id = Uuid::new_v4();
    JobLease {
        job_id,
        runner_id: Uuid::new_v4(),
        claimed_at: Utc::now(),
        ttl_secs: 3600,
        payload_ref: format!("jobs/{}", job_id),
        payload,
    }
}

pub fn token(value: &str, ttl_secs: i64) -> RegistrationToken {
    RegistrationToken::issued_now(value, ChronoDuration::seconds(ttl_secs))
}

// =============================================================================
// Coordinator
// =============================================================================

pub enum PollReply {
    Job(JobPayload),
    Empty,
    Conflict,
    Fail(RunnerError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    Register(Uuid),
    Poll(Uuid),
    Report(Uuid),
    Heartbeat(Uuid),
}

#[derive(Default)]
struct CoordinatorState {
    reject_registration: bool,
    accepted_tokens: Option<HashSet<String>>,
    polls: VecDeque<PollReply>,
    report_failures: VecDeque<RunnerError>,
    revocations: Vec<Uuid>,

    events: Vec<CoordinatorEvent>,
    poll_times: Vec<Instant>,
    report_calls: usize,
    auth_failures: usize,
    /// Results by job, as the coordinator recorded them
    recorded: BTreeMap<Uuid, Vec<ExecutionResult>>,
    live: HashMap<Uuid, Uuid>,
    max_live_violation: bool,
}

/// Coordinator that hands out scripted replies and records every call
#[derive(Default)]
pub struct MockCoordinator {
    state: Mutex<CoordinatorState>,
}

impl MockCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap()
    }

    pub fn push_poll(&self, reply: PollReply) {
        self.lock().polls.push_back(reply);
    }

    pub fn push_job(&self, payload: JobPayload) {
        self.push_poll(PollReply::Job(payload));
    }

    pub fn fail_next_reports(&self, errors: impl IntoIterator<Item = RunnerError>) {
        self.lock().report_failures.extend(errors);
    }

    pub fn reject_registration(&self, reject: bool) {
        self.lock().reject_registration = reject;
    }

    /// Only these token values authenticate from now on
    pub fn accept_only(&self, tokens: &[&str]) {
        self.lock().accepted_tokens = Some(tokens.iter().map(|t| t.to_string()).collect());
    }

    /// The next heartbeat ack revokes `job_id`
    pub fn revoke(&self, job_id: Uuid) {
        self.lock().revocations.push(job_id);
    }

    pub fn events(&self) -> Vec<CoordinatorEvent> {
        self.lock().events.clone()
    }

    pub fn poll_count(&self) -> usize {
        self.lock().poll_times.len()
    }

    pub fn poll_times(&self) -> Vec<Instant> {
        self.lock().poll_times.clone()
    }

    pub fn report_calls(&self) -> usize {
        self.lock().report_calls
    }

    pub fn auth_failures(&self) -> usize {
        self.lock().auth_failures
    }

    /// Every result recorded for `job_id`
    pub fn recorded(&self, job_id: Uuid) -> Vec<ExecutionResult> {
        self.lock().recorded.get(&job_id).cloned().unwrap_or_default()
    }

    pub fn recorded_jobs(&self) -> Vec<Uuid> {
        self.lock().recorded.keys().copied().collect()
    }

    /// Whether any runner ever held two live leases at once
    pub fn saw_double_lease(&self) -> bool {
        self.lock().max_live_violation
    }

    fn check_token(state: &mut CoordinatorState, token: &str) -> Result<()> {
        if let Some(accepted) = &state.accepted_tokens {
            if !accepted.contains(token) {
                state.auth_failures += 1;
                return Err(RunnerError::Auth("401 Unauthorized".to_string()));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Coordinator for MockCoordinator {
    async fn register(&self, identity: &RunnerIdentity, token: &str) -> Result<RegisterAck> {
        let mut state = self.lock();
        state.events.push(CoordinatorEvent::Register(identity.runner_id));
        Self::check_token(&mut state, token)?;

        if state.reject_registration {
            state.auth_failures += 1;
            return Err(RunnerError::Auth("403 Forbidden".to_string()));
        }

        Ok(RegisterAck {
            runner_id: identity.runner_id,
            accepted_at: Utc::now(),
        })
    }

    async fn poll(
        &self,
        runner_id: Uuid,
        token: &str,
        _request: &PollRequest,
    ) -> Result<Option<JobLease>> {
        let mut state = self.lock();
        state.events.push(CoordinatorEvent::Poll(runner_id));
        state.poll_times.push(Instant::now());
        Self::check_token(&mut state, token)?;

        match state.polls.pop_front().unwrap_or(PollReply::Empty) {
            PollReply::Empty => Ok(None),
            PollReply::Conflict => Err(RunnerError::LeaseConflict("409 Conflict".to_string())),
            PollReply::Fail(e) => Err(e),
            PollReply::Job(payload) => {
                if state.live.contains_key(&runner_id) {
                    state.max_live_violation = true;
                }
                let mut lease = lease(payload);
                lease.runner_id = runner_id;
                state.live.insert(runner_id, lease.job_id);
                Ok(Some(lease))
            }
        }
    }

    async fn report(
        &self,
        runner_id: Uuid,
        token: &str,
        result: &ExecutionResult,
    ) -> Result<ReportStatus> {
        let mut state = self.lock();
        state.events.push(CoordinatorEvent::Report(result.job_id));
        state.report_calls += 1;
        Self::check_token(&mut state, token)?;

        if let Some(err) = state.report_failures.pop_front() {
            return Err(err);
        }

        // Idempotent on job_id
        let recorded = state.recorded.entry(result.job_id).or_default();
        if recorded.is_empty() {
            recorded.push(result.clone());
        }
        if state.live.get(&runner_id) == Some(&result.job_id) {
            state.live.remove(&runner_id);
        }
        Ok(ReportStatus::Ack)
    }

    async fn heartbeat(
        &self,
        runner_id: Uuid,
        token: &str,
        _request: &HeartbeatRequest,
    ) -> Result<HeartbeatAck> {
        let mut state = self.lock();
        state.events.push(CoordinatorEvent::Heartbeat(runner_id));
        Self::check_token(&mut state, token)?;

        Ok(HeartbeatAck {
            revoked_jobs: std::mem::take(&mut state.revocations),
        })
    }
}

// =============================================================================
// Sandbox
// =============================================================================

/// How one sandboxed process behaves
#[derive(Debug, Clone)]
pub struct SandboxScript {
    start_error: Option<String>,
    exit: Option<(Duration, i32)>,
    ignore_terminate: bool,
    output: Vec<String>,
}

impl SandboxScript {
    pub fn exit_after(after: Duration, code: i32) -> Self {
        Self {
            start_error: None,
            exit: Some((after, code)),
            ignore_terminate: false,
            output: Vec::new(),
        }
    }

    /// Never exits by itself
    pub fn hang() -> Self {
        Self {
            start_error: None,
            exit: None,
            ignore_terminate: false,
            output: Vec::new(),
        }
    }

    pub fn fail_to_start(message: &str) -> Self {
        Self {
            start_error: Some(message.to_string()),
            ..Self::hang()
        }
    }

    pub fn ignoring_terminate(mut self) -> Self {
        self.ignore_terminate = true;
        self
    }

    pub fn with_output(mut self, chunks: &[&str]) -> Self {
        self.output = chunks.iter().map(|c| c.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxEvent {
    Started,
    Terminated,
    Killed,
}

/// Sandbox runtime double; runs scripts in order, then `exit_after(1s, 0)`
#[derive(Default)]
pub struct MockSandbox {
    scripts: Mutex<VecDeque<SandboxScript>>,
    specs: Mutex<Vec<SandboxSpec>>,
    events: Arc<Mutex<Vec<SandboxEvent>>>,
    alive: Arc<AtomicUsize>,
    max_alive: Arc<AtomicUsize>,
}

impl MockSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, script: SandboxScript) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn last_spec(&self) -> Option<SandboxSpec> {
        self.specs.lock().unwrap().last().cloned()
    }

    pub fn runs(&self) -> usize {
        self.specs.lock().unwrap().len()
    }

    pub fn events(&self) -> Vec<SandboxEvent> {
        self.events.lock().unwrap().clone()
    }

    /// No sandboxed process is left running
    pub fn all_dead(&self) -> bool {
        self.alive.load(Ordering::SeqCst) == 0
    }

    /// Most processes ever running at once
    pub fn max_alive(&self) -> usize {
        self.max_alive.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sandbox for MockSandbox {
    async fn run(&self, spec: SandboxSpec) -> Result<Box<dyn SandboxHandle>> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| SandboxScript::exit_after(Duration::from_secs(1), 0));

        if let Some(message) = &script.start_error {
            return Err(RunnerError::Sandbox(message.clone()));
        }

        self.specs.lock().unwrap().push(spec);
        self.events.lock().unwrap().push(SandboxEvent::Started);
        let alive = self.alive.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_alive.fetch_max(alive, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(script.output.len() + 1);
        for chunk in &script.output {
            let _ = tx.try_send(LogChunk {
                stream: LogStream::Stdout,
                data: chunk.as_bytes().to_vec(),
            });
        }

        Ok(Box::new(MockHandle {
            exit_at: script.exit.map(|(after, code)| (Instant::now() + after, code)),
            script,
            exit_code: None,
            log_tx: Some(tx),
            logs: Some(rx),
            events: self.events.clone(),
            alive: self.alive.clone(),
        }))
    }
}

struct MockHandle {
    script: SandboxScript,
    exit_at: Option<(Instant, i32)>,
    exit_code: Option<i32>,
    log_tx: Option<mpsc::Sender<LogChunk>>,
    logs: Option<mpsc::Receiver<LogChunk>>,
    events: Arc<Mutex<Vec<SandboxEvent>>>,
    alive: Arc<AtomicUsize>,
}

impl MockHandle {
    fn finish(&mut self, code: i32) {
        if self.exit_code.is_none() {
            self.exit_code = Some(code);
            self.log_tx = None;
            self.alive.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl SandboxHandle for MockHandle {
    async fn wait(&mut self, timeout: Duration) -> Result<WaitOutcome> {
        if let Some(code) = self.exit_code {
            return Ok(WaitOutcome::Exited(code));
        }

        match self.exit_at {
            Some((at, code)) if at <= Instant::now() + timeout => {
                tokio::time::sleep_until(at).await;
                self.finish(code);
                Ok(WaitOutcome::Exited(code))
            }
            _ => {
                tokio::time::sleep(timeout).await;
                Ok(WaitOutcome::TimedOut)
            }
        }
    }

    async fn terminate(&mut self) -> Result<()> {
        self.events.lock().unwrap().push(SandboxEvent::Terminated);
        if !self.script.ignore_terminate {
            self.finish(143);
        }
        Ok(())
    }

    async fn kill(&mut self) -> Result<()> {
        self.events.lock().unwrap().push(SandboxEvent::Killed);
        self.finish(137);
        Ok(())
    }

    fn logs(&mut self) -> Option<mpsc::Receiver<LogChunk>> {
        self.logs.take()
    }
}

// =============================================================================
// Persistence, probes, tokens
// =============================================================================

#[derive(Default)]
pub struct MemoryStateStore {
    records: Mutex<HashMap<String, PersistedAgent>>,
    saves: AtomicUsize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, slot: &str, record: PersistedAgent) {
        self.records.lock().unwrap().insert(slot.to_string(), record);
    }

    pub fn get(&self, slot: &str) -> Option<PersistedAgent> {
        self.records.lock().unwrap().get(slot).cloned()
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, slot: &str) -> Result<Option<PersistedAgent>> {
        Ok(self.get(slot))
    }

    async fn save(&self, slot: &str, record: &PersistedAgent) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.insert(slot, record.clone());
        Ok(())
    }

    async fn remove(&self, slot: &str) -> Result<()> {
        self.records.lock().unwrap().remove(slot);
        Ok(())
    }
}

/// Probe that replays queued samples, then reports a cool, idle host
#[derive(Default)]
pub struct ScriptedProbe {
    samples: Mutex<VecDeque<Option<HealthSample>>>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, sample: Option<HealthSample>) {
        self.samples.lock().unwrap().push_back(sample);
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn sample(&self) -> Option<HealthSample> {
        self.samples
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Some(sample(40.0)))
    }
}

#[derive(Default)]
pub struct MockTokenSource {
    replies: Mutex<VecDeque<Result<RegistrationToken>>>,
    seen: Mutex<Vec<String>>,
}

impl MockTokenSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, token: RegistrationToken) {
        self.replies.lock().unwrap().push_back(Ok(token));
    }

    pub fn push_err(&self, err: RunnerError) {
        self.replies.lock().unwrap().push_back(Err(err));
    }

    /// Token values presented for refresh
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenSource for MockTokenSource {
    async fn refresh(&self, current: &str) -> Result<RegistrationToken> {
        self.seen.lock().unwrap().push(current.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(RunnerError::Network("no scripted token".to_string())))
    }
}

// =============================================================================
// Agent harness
// =============================================================================

pub const HOST: &str = "pi-01";

/// A runner agent's collaborators, all in memory
pub struct Harness {
    pub coordinator: Arc<MockCoordinator>,
    pub sandbox: Arc<MockSandbox>,
    pub store: Arc<MemoryStateStore>,
    pub credentials: Arc<CredentialStore>,
    pub health: watch::Sender<HealthStatus>,
    pub job_slots: Arc<Semaphore>,
    pub offline_policy: OfflinePolicy,
    logs: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_job_slots(1)
    }

    pub fn with_job_slots(slots: usize) -> Self {
        let credentials = CredentialStore::new(CredentialConfig::default(), None);
        credentials
            .rotate(token("token-1", 3600 * 24))
            .expect("rotate without cache");

        let (health, _) = watch::channel(HealthStatus::Ok);

        Self {
            coordinator: Arc::new(MockCoordinator::new()),
            sandbox: Arc::new(MockSandbox::new()),
            store: Arc::new(MemoryStateStore::new()),
            credentials: Arc::new(credentials),
            health,
            job_slots: Arc::new(Semaphore::new(slots)),
            offline_policy: OfflinePolicy::FinishInFlight,
            logs: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn agent_config(&self, slot: usize) -> AgentConfig {
        AgentConfig {
            host_id: HOST.to_string(),
            slot,
            labels: vec!["self-hosted".to_string()],
            capabilities: ["arm64".to_string()].into_iter().collect(),
            poll_interval: Duration::from_secs(5),
            poll_max_interval: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(30),
            report_retry: RetryPolicy::default(),
            limits: ResourceLimits::default(),
            offline_policy: self.offline_policy,
            shutdown_grace: Duration::from_secs(30),
            max_coordinator_errors: 5,
        }
    }

    pub fn deps(&self) -> AgentDeps {
        let executor = JobExecutor::new(
            self.sandbox.clone(),
            Arc::new(LogStore::new(self.logs.path(), LogStoreConfig::default())),
            ExecutorConfig {
                job_timeout: Duration::from_secs(3600),
                kill_grace: Duration::from_secs(30),
                default_image: "alpine:3".to_string(),
            },
        );

        AgentDeps {
            coordinator: self.coordinator.clone(),
            credentials: self.credentials.clone(),
            health: self.health.subscribe(),
            executor: Arc::new(executor),
            state_store: self.store.clone(),
            job_slots: self.job_slots.clone(),
        }
    }

    pub async fn spawn(&self, slot: usize) -> AgentHandle {
        RunnerAgent::load(self.agent_config(slot), self.deps())
            .await
            .expect("load agent")
            .spawn()
    }

    pub fn set_health(&self, status: HealthStatus) {
        self.health.send_replace(status);
    }
}

/// Starts real agents over the harness collaborators
#[async_trait]
impl AgentFactory for Harness {
    async fn start(&self, _host_id: &str, slot: usize) -> Result<AgentHandle> {
        let agent = RunnerAgent::load(self.agent_config(slot), self.deps()).await?;
        Ok(agent.spawn())
    }
}

/// Sleeps in 100ms steps (virtual time) until `pred` holds
pub async fn wait_until(
    handle: &AgentHandle,
    what: &str,
    pred: impl Fn(&AgentSnapshot) -> bool,
) -> AgentSnapshot {
    for _ in 0..20_000 {
        let snapshot = handle.snapshot();
        if pred(&snapshot) {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("timed out waiting for {}: {:?}", what, handle.snapshot());
}

pub async fn wait_for_state(handle: &AgentHandle, state: AgentState) -> AgentSnapshot {
    wait_until(handle, &state.to_string(), |s| s.state == state).await
}

// =============================================================================
// Agent factory
// =============================================================================

/// How a fake agent behaves once started
#[derive(Debug, Clone, Copy)]
pub enum AgentBehavior {
    /// Runs until stopped
    Run,
    /// Returns an error after the delay
    CrashAfter(Duration),
    /// Panics after the delay
    PanicAfter(Duration),
}

/// Factory handing out fake agents with scripted behavior per slot
#[derive(Default)]
pub struct MockAgentFactory {
    behaviors: Mutex<HashMap<(String, usize), VecDeque<AgentBehavior>>>,
    ids: Mutex<HashMap<(String, usize), Uuid>>,
    starts: Mutex<Vec<(String, usize)>>,
    fail_starts: Mutex<HashSet<(String, usize)>>,
}

impl MockAgentFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, host_id: &str, slot: usize, behaviors: &[AgentBehavior]) {
        self.behaviors
            .lock()
            .unwrap()
            .entry((host_id.to_string(), slot))
            .or_default()
            .extend(behaviors.iter().copied());
    }

    pub fn fail_start(&self, host_id: &str, slot: usize) {
        self.fail_starts
            .lock()
            .unwrap()
            .insert((host_id.to_string(), slot));
    }

    pub fn starts(&self) -> Vec<(String, usize)> {
        self.starts.lock().unwrap().clone()
    }

    pub fn start_count(&self, host_id: &str, slot: usize) -> usize {
        self.starts
            .lock()
            .unwrap()
            .iter()
            .filter(|(h, s)| h == host_id && *s == slot)
            .count()
    }
}

#[async_trait]
impl AgentFactory for MockAgentFactory {
    async fn start(&self, host_id: &str, slot: usize) -> Result<AgentHandle> {
        let key = (host_id.to_string(), slot);

        if self.fail_starts.lock().unwrap().contains(&key) {
            return Err(RunnerError::Storage("state store unavailable".to_string()));
        }

        self.starts.lock().unwrap().push(key.clone());

        let runner_id = *self
            .ids
            .lock()
            .unwrap()
            .entry(key.clone())
            .or_insert_with(Uuid::new_v4);

        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
            .unwrap_or(AgentBehavior::Run);

        let mut snapshot = AgentSnapshot::new(runner_id, host_id, slot);
        snapshot.state = AgentState::Idle;
        let (snapshot_tx, snapshot_rx) = watch::channel(snapshot);
        let (commands_tx, mut commands_rx) = mpsc::channel::<AgentCommand>(8);
        let stop = CancellationToken::new();
        let agent_stop = stop.clone();

        let task = tokio::spawn(async move {
            let crash_after = match behavior {
                AgentBehavior::Run => None,
                AgentBehavior::CrashAfter(d) | AgentBehavior::PanicAfter(d) => Some(d),
            };
            let crash = async move {
                match crash_after {
                    Some(d) => tokio::time::sleep(d).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::pin!(crash);

            loop {
                tokio::select! {
                    _ = agent_stop.cancelled() => {
                        snapshot_tx.send_modify(|s| s.state = AgentState::Terminated);
                        return Ok(());
                    }
                    _ = &mut crash => {
                        if matches!(behavior, AgentBehavior::PanicAfter(_)) {
                            panic!("scripted agent panic");
                        }
                        return Err(RunnerError::Storage("scripted crash".to_string()));
                    }
                    Some(command) = commands_rx.recv() => {
                        if command == AgentCommand::Clear {
                            snapshot_tx.send_modify(|s| {
                                s.state = AgentState::Idle;
                                s.last_error = None;
                            });
                        }
                    }
                }
            }
        });

        Ok(AgentHandle::new(
            runner_id,
            snapshot_rx,
            commands_tx,
            stop,
            task,
        ))
    }
}
