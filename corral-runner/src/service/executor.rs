//! Job Executor
//!
//! Runs one job in a sandbox and turns whatever happens into exactly one
//! ExecutionResult. Owns the hard wall-clock bound and the
//! terminate-then-kill escalation; output is streamed to the log store
//! while the job runs.

use corral_core::domain::lease::JobLease;
use corral_core::domain::result::{ExecutionResult, Outcome};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::sandbox::{ResourceLimits, Sandbox, SandboxHandle, SandboxSpec, WaitOutcome};
use crate::service::log_store::LogStore;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Hard bound, regardless of what the payload asks for
    pub job_timeout: Duration,
    /// Between terminate and kill
    pub kill_grace: Duration,
    /// Used when the payload names no image
    pub default_image: String,
}

pub struct JobExecutor {
    sandbox: Arc<dyn Sandbox>,
    logs: Arc<LogStore>,
    config: ExecutorConfig,
}

enum Stop {
    Exited(i32),
    TimedOut,
    Cancelled,
    Failed(String),
}

impl JobExecutor {
    pub fn new(sandbox: Arc<dyn Sandbox>, logs: Arc<LogStore>, config: ExecutorConfig) -> Self {
        Self {
            sandbox,
            logs,
            config,
        }
    }

    /// Effective wall-clock bound for `lease`
    pub fn timeout_for(&self, lease: &JobLease) -> Duration {
        lease
            .payload
            .timeout_secs
            .map(Duration::from_secs)
            .map_or(self.config.job_timeout, |t| t.min(self.config.job_timeout))
    }

    /// Runs the leased job to completion. Never fails: sandbox errors
    /// become `failure` results, the bound becomes `timeout`, and `cancel`
    /// becomes `cancelled`.
    pub async fn execute(
        &self,
        lease: &JobLease,
        limits: &ResourceLimits,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let job_id = lease.job_id;
        let started = Instant::now();
        let timeout = self.timeout_for(lease);

        info!(job_id = %job_id, payload = %lease.payload_ref, "Executing job (timeout {:?})", timeout);

        let spec = SandboxSpec {
            name: format!("corral-{}", job_id),
            image: lease
                .payload
                .image
                .clone()
                .unwrap_or_else(|| self.config.default_image.clone()),
            command: lease.payload.command.clone(),
            env: lease.payload.env.clone(),
            network: lease.payload.network,
            limits: limits.clone(),
        };

        let mut handle = match self.sandbox.run(spec).await {
            Ok(handle) => handle,
            Err(e) => {
                error!(job_id = %job_id, "Sandbox failed to start: {}", e);
                return ExecutionResult::aborted(
                    job_id,
                    Outcome::Failure,
                    e.to_string(),
                    elapsed_ms(started),
                    None,
                );
            }
        };

        let log_task = self.spawn_log_task(job_id, handle.as_mut());

        let stop = tokio::select! {
            waited = handle.wait(timeout) => match waited {
                Ok(WaitOutcome::Exited(code)) => Stop::Exited(code),
                Ok(WaitOutcome::TimedOut) => Stop::TimedOut,
                Err(e) => Stop::Failed(e.to_string()),
            },
            _ = cancel.cancelled() => Stop::Cancelled,
        };

        if !matches!(stop, Stop::Exited(_)) {
            self.stop_sandbox(job_id, handle.as_mut()).await;
        }

        let log_ref = self.collect_log_ref(job_id, log_task).await;
        let duration_ms = elapsed_ms(started);

        let result = match stop {
            Stop::Exited(code) => ExecutionResult::exited(job_id, code, duration_ms, log_ref),
            Stop::TimedOut => ExecutionResult::aborted(
                job_id,
                Outcome::Timeout,
                format!("Job exceeded its {:?} time limit", timeout),
                duration_ms,
                log_ref,
            ),
            Stop::Cancelled => ExecutionResult::aborted(
                job_id,
                Outcome::Cancelled,
                "Job cancelled",
                duration_ms,
                log_ref,
            ),
            Stop::Failed(message) => {
                ExecutionResult::aborted(job_id, Outcome::Failure, message, duration_ms, log_ref)
            }
        };

        info!(job_id = %job_id, outcome = %result.outcome, "Job finished in {}ms", duration_ms);
        result
    }

    /// Terminate, give it `kill_grace`, then kill. Returns once the
    /// sandbox is confirmed gone (or the kill itself failed).
    async fn stop_sandbox(&self, job_id: uuid::Uuid, handle: &mut dyn SandboxHandle) {
        if let Err(e) = handle.terminate().await {
            warn!(job_id = %job_id, "Terminate failed: {}", e);
        }

        match handle.wait(self.config.kill_grace).await {
            Ok(WaitOutcome::Exited(_)) => return,
            Ok(WaitOutcome::TimedOut) => {
                warn!(job_id = %job_id, "Sandbox ignored terminate for {:?}, killing", self.config.kill_grace);
            }
            Err(e) => warn!(job_id = %job_id, "Waiting after terminate failed: {}", e),
        }

        if let Err(e) = handle.kill().await {
            error!(job_id = %job_id, "Failed to kill sandbox: {}", e);
        }
    }

    fn spawn_log_task(
        &self,
        job_id: uuid::Uuid,
        handle: &mut dyn SandboxHandle,
    ) -> Option<JoinHandle<Option<String>>> {
        let mut chunks = handle.logs()?;
        let logs = self.logs.clone();

        Some(tokio::spawn(async move {
            let mut writer = match logs.open(job_id).await {
                Ok(writer) => writer,
                Err(e) => {
                    warn!(job_id = %job_id, "Cannot open job log, output discarded: {}", e);
                    // keep draining so the sandbox never blocks on a full pipe
                    while chunks.recv().await.is_some() {}
                    return None;
                }
            };

            while let Some(chunk) = chunks.recv().await {
                if let Err(e) = writer.append(&chunk.data).await {
                    warn!(job_id = %job_id, "Failed to write job log: {}", e);
                }
            }

            match writer.finish().await {
                Ok(log_ref) => Some(log_ref),
                Err(e) => {
                    warn!(job_id = %job_id, "Failed to flush job log: {}", e);
                    None
                }
            }
        }))
    }

    async fn collect_log_ref(
        &self,
        job_id: uuid::Uuid,
        task: Option<JoinHandle<Option<String>>>,
    ) -> Option<String> {
        let mut task = task?;

        // Output pipes close with the process; bound the wait anyway
        match tokio::time::timeout(self.config.kill_grace, &mut task).await {
            Ok(Ok(log_ref)) => log_ref,
            Ok(Err(e)) => {
                warn!(job_id = %job_id, "Log task failed: {}", e);
                None
            }
            Err(_) => {
                warn!(job_id = %job_id, "Log stream did not close, detaching");
                task.abort();
                Some(self.logs.log_path(job_id).display().to_string())
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
