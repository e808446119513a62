//! Host health domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One reading of local resource state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    pub timestamp: DateTime<Utc>,
    /// One minute load average
    pub cpu_load: f64,
    /// Hottest thermal sensor, absent when the host exposes none
    pub temp_c: Option<f32>,
    /// Available memory in bytes
    pub mem_available: u64,
    /// Available disk space in bytes on the state volume
    pub disk_available: u64,
}

/// Health derived from the recent sample window
///
/// Ordered from best to worst so the fleet can aggregate with `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Critical,
}

impl HealthStatus {
    /// Worst status of a set, `Ok` for an empty set
    pub fn worst(statuses: impl IntoIterator<Item = HealthStatus>) -> HealthStatus {
        statuses.into_iter().max().unwrap_or(HealthStatus::Ok)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Ok => write!(f, "ok"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Critical => write!(f, "critical"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worst() {
        assert_eq!(HealthStatus::worst(vec![]), HealthStatus::Ok);
        assert_eq!(
            HealthStatus::worst(vec![HealthStatus::Ok, HealthStatus::Critical, HealthStatus::Degraded]),
            HealthStatus::Critical
        );
    }
}
