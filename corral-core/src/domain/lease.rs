//! Job lease domain types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Exclusive, time-bounded right to execute one job
///
/// Handed out by the coordinator on a successful poll. A runner holds at
/// most one live lease at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLease {
    pub job_id: Uuid,
    pub runner_id: Uuid,
    pub claimed_at: DateTime<Utc>,
    pub ttl_secs: u64,
    /// Coordinator-side reference to the job definition
    pub payload_ref: String,
    pub payload: JobPayload,
}

impl JobLease {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.claimed_at + Duration::seconds(self.ttl_secs as i64)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

/// What to run for a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    /// Container image; the host default is used when absent
    pub image: Option<String>,
    /// Shell command executed with `sh -c`
    pub command: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Whether the sandbox gets network access
    #[serde(default)]
    pub network: bool,
    /// Per-job wall clock bound, never above the host's job timeout
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl JobPayload {
    pub fn command(command: impl Into<String>) -> Self {
        Self {
            image: None,
            command: command.into(),
            env: BTreeMap::new(),
            network: false,
            timeout_secs: None,
        }
    }
}
