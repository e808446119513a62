//! Persisted agent state
//!
//! One record per agent slot: identity, last state, the lease in flight
//! and results not yet acknowledged. Written on every transition that
//! touches a job, so a crashed daemon can report what it was doing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use corral_core::domain::agent::AgentState;
use corral_core::domain::lease::JobLease;
use corral_core::domain::result::ExecutionResult;
use corral_core::domain::runner::RunnerIdentity;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedAgent {
    pub identity: RunnerIdentity,
    pub state: AgentState,
    /// Lease whose result has not been produced yet
    pub in_flight: Option<JobLease>,
    /// Results awaiting coordinator ack, oldest first
    #[serde(default)]
    pub pending_reports: Vec<ExecutionResult>,
    pub updated_at: DateTime<Utc>,
}

impl PersistedAgent {
    pub fn new(identity: RunnerIdentity) -> Self {
        Self {
            identity,
            state: AgentState::Registering,
            in_flight: None,
            pending_reports: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Turns a lease left in flight by a dead process into a cancelled
    /// result queued for reporting. Returns the job id when it did so.
    pub fn recover_in_flight(&mut self) -> Option<uuid::Uuid> {
        let lease = self.in_flight.take()?;
        let job_id = lease.job_id;

        if !self.pending_reports.iter().any(|r| r.job_id == job_id) {
            self.pending_reports
                .push(ExecutionResult::cancelled_on_recovery(job_id));
        }
        Some(job_id)
    }
}

/// Key of the agent slot `index` on `host_id`
pub fn slot_key(host_id: &str, index: usize) -> String {
    format!("{}/{}", host_id, index)
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, slot: &str) -> Result<Option<PersistedAgent>>;

    /// Replaces the slot's record atomically
    async fn save(&self, slot: &str, record: &PersistedAgent) -> Result<()>;

    async fn remove(&self, slot: &str) -> Result<()>;
}

/// One JSON file per slot
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, slot: &str) -> PathBuf {
        let name: String = slot
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, slot: &str) -> Result<Option<PersistedAgent>> {
        match tokio::fs::read(self.path(slot)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, slot: &str, record: &PersistedAgent) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path(slot);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(record)?;

        let mut file = tokio::fs::File::create(&tmp).await?;
        tokio::io::AsyncWriteExt::write_all(&mut file, &bytes).await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, slot: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path(slot)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
