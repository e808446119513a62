//! Execution result domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    Timeout,
    Cancelled,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Failure => write!(f, "failure"),
            Outcome::Timeout => write!(f, "timeout"),
            Outcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of one job execution
///
/// Immutable once produced. The agent owns it until the coordinator has
/// acknowledged the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub job_id: Uuid,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    /// Location of the job log in the local log store
    pub log_ref: Option<String>,
    pub outcome: Outcome,
    pub error_message: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
    /// Result for a job whose process exited with `exit_code`
    pub fn exited(job_id: Uuid, exit_code: i32, duration_ms: u64, log_ref: Option<String>) -> Self {
        let (outcome, error_message) = if exit_code == 0 {
            (Outcome::Success, None)
        } else {
            (
                Outcome::Failure,
                Some(format!("Process exited with code {}", exit_code)),
            )
        };

        Self {
            job_id,
            exit_code: Some(exit_code),
            duration_ms,
            log_ref,
            outcome,
            error_message,
            finished_at: Utc::now(),
        }
    }

    /// Result for a job that never produced an exit status
    pub fn aborted(
        job_id: Uuid,
        outcome: Outcome,
        message: impl Into<String>,
        duration_ms: u64,
        log_ref: Option<String>,
    ) -> Self {
        Self {
            job_id,
            exit_code: None,
            duration_ms,
            log_ref,
            outcome,
            error_message: Some(message.into()),
            finished_at: Utc::now(),
        }
    }

    /// Result reported for a job found in flight after a restart
    pub fn cancelled_on_recovery(job_id: Uuid) -> Self {
        Self::aborted(
            job_id,
            Outcome::Cancelled,
            "Runner restarted while the job was executing",
            0,
            None,
        )
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}
