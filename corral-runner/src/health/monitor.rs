use corral_core::domain::health::{HealthSample, HealthStatus};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{HealthConfig, HealthProbe, HealthThresholds};

/// Sliding window of samples plus the status derived from it
pub struct HealthMonitor {
    config: HealthConfig,
    probe: Arc<dyn HealthProbe>,
    window: Mutex<VecDeque<Option<HealthSample>>>,
    status_tx: watch::Sender<HealthStatus>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig, probe: Arc<dyn HealthProbe>) -> Self {
        let (status_tx, _) = watch::channel(HealthStatus::Ok);
        Self {
            window: Mutex::new(VecDeque::with_capacity(config.window)),
            config,
            probe,
            status_tx,
        }
    }

    /// Takes one sample through the probe and folds it into the window
    pub async fn sample(&self) -> Option<HealthSample> {
        let sample = self.probe.sample().await;
        self.record(sample.clone());
        sample
    }

    /// Appends a sample (`None` for a failed read) and re-derives the status
    pub fn record(&self, sample: Option<HealthSample>) -> HealthStatus {
        let status = {
            let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
            if window.len() == self.config.window.max(1) {
                window.pop_front();
            }
            window.push_back(sample);
            evaluate(&window, &self.config.thresholds)
        };

        let previous = *self.status_tx.borrow();
        if self.status_tx.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        }) {
            match status {
                HealthStatus::Ok => info!("Health recovered: {} -> {}", previous, status),
                _ => warn!("Health changed: {} -> {}", previous, status),
            }
        }

        status
    }

    pub fn status(&self) -> HealthStatus {
        *self.status_tx.borrow()
    }

    /// Status-change events
    pub fn subscribe(&self) -> watch::Receiver<HealthStatus> {
        self.status_tx.subscribe()
    }

    /// Samples every `interval` until `shutdown` fires
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!("Health monitor started, sampling every {:?}", self.config.interval);

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sample().await {
                        Some(s) => debug!(
                            "Health sample: load={:.2} temp={:?} mem={} disk={}",
                            s.cpu_load, s.temp_c, s.mem_available, s.disk_available
                        ),
                        None => debug!("Health sample missing"),
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }

        info!("Health monitor stopped");
    }
}

fn is_critical(sample: &HealthSample, limits: &HealthThresholds) -> bool {
    sample.temp_c.is_some_and(|t| t > limits.temp_critical_c)
        || sample.disk_available < limits.disk_critical_bytes
}

fn is_degraded(sample: &HealthSample, limits: &HealthThresholds) -> bool {
    sample.temp_c.is_some_and(|t| t > limits.temp_degraded_c)
        || sample.mem_available < limits.mem_min_bytes
        || sample.disk_available < limits.disk_min_bytes
        || sample.cpu_load > limits.load_max
}

/// Status of a window, newest sample last
pub fn evaluate(window: &VecDeque<Option<HealthSample>>, limits: &HealthThresholds) -> HealthStatus {
    let needed = limits.critical_consecutive.max(1);
    let critical_run = window
        .iter()
        .rev()
        .take_while(|s| s.as_ref().is_some_and(|s| is_critical(s, limits)))
        .count();
    if critical_run >= needed {
        return HealthStatus::Critical;
    }

    let unknown_run = window.iter().rev().take_while(|s| s.is_none()).count();
    if unknown_run >= limits.unknown_escalation.max(1) {
        return HealthStatus::Degraded;
    }

    match window.iter().rev().flatten().next() {
        Some(latest) if is_degraded(latest, limits) || is_critical(latest, limits) => {
            HealthStatus::Degraded
        }
        _ => HealthStatus::Ok,
    }
}
