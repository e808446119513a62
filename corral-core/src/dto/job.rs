//! Job DTOs
//!
//! Bodies for polling and result reporting.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::result::ExecutionResult;

/// Ask the coordinator for a job matching these labels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollRequest {
    pub labels: Vec<String>,
    pub capabilities: Vec<String>,
}

/// Report a finished job; safe to resend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRequest {
    pub runner_id: Uuid,
    pub result: ExecutionResult,
}

/// Coordinator verdict on a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Ack,
    RetryLater,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportResponse {
    pub status: ReportStatus,
}
