//! Health Monitor
//!
//! Samples local resources on a fixed period and derives a HealthStatus
//! from the recent window. Status changes are published on a watch
//! channel that every agent listens to.

pub mod monitor;
pub mod probe;

pub use monitor::HealthMonitor;
pub use probe::{HealthProbe, SystemProbe};

use std::time::Duration;

/// Limits the sample window is checked against
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthThresholds {
    pub temp_degraded_c: f32,
    pub temp_critical_c: f32,
    pub mem_min_bytes: u64,
    pub disk_min_bytes: u64,
    pub disk_critical_bytes: u64,
    /// One-minute load average
    pub load_max: f64,
    /// Consecutive critical samples before status becomes critical
    pub critical_consecutive: usize,
    /// Consecutive missing samples before status becomes degraded
    pub unknown_escalation: usize,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            temp_degraded_c: 70.0,
            temp_critical_c: 80.0,
            mem_min_bytes: 256 * 1024 * 1024,
            disk_min_bytes: 1024 * 1024 * 1024,
            disk_critical_bytes: 256 * 1024 * 1024,
            load_max: 4.0,
            critical_consecutive: 2,
            unknown_escalation: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub interval: Duration,
    /// Samples retained
    pub window: usize,
    pub thresholds: HealthThresholds,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            window: 10,
            thresholds: HealthThresholds::default(),
        }
    }
}
