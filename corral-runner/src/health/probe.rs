//! Resource probes

use async_trait::async_trait;
use chrono::Utc;
use corral_core::domain::health::HealthSample;
use std::path::{Path, PathBuf};
use sysinfo::{Components, Disks, System};
use tracing::warn;

/// Source of health samples. `None` means the sample could not be taken.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn sample(&self) -> Option<HealthSample>;
}

/// Reads the local machine through sysinfo
pub struct SystemProbe {
    /// Disk checked for free space: the one holding this path
    disk_path: PathBuf,
}

impl SystemProbe {
    pub fn new(disk_path: impl Into<PathBuf>) -> Self {
        Self {
            disk_path: disk_path.into(),
        }
    }
}

#[async_trait]
impl HealthProbe for SystemProbe {
    async fn sample(&self) -> Option<HealthSample> {
        let disk_path = self.disk_path.clone();

        // sysinfo reads /proc and /sys synchronously
        match tokio::task::spawn_blocking(move || read_system(&disk_path)).await {
            Ok(sample) => sample,
            Err(e) => {
                warn!("Health sampling task failed: {}", e);
                None
            }
        }
    }
}

fn read_system(disk_path: &Path) -> Option<HealthSample> {
    let mut sys = System::new();
    sys.refresh_memory();

    let disks = Disks::new_with_refreshed_list();
    let disk_available = disks
        .list()
        .iter()
        .filter(|d| disk_path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| d.available_space());

    let Some(disk_available) = disk_available else {
        warn!("No disk found for {}", disk_path.display());
        return None;
    };

    let components = Components::new_with_refreshed_list();
    let temp_c = components
        .list()
        .iter()
        .map(|c| c.temperature())
        .filter(|t| t.is_finite() && *t > 0.0)
        .reduce(f32::max);

    Some(HealthSample {
        timestamp: Utc::now(),
        cpu_load: System::load_average().one,
        temp_c,
        mem_available: sys.available_memory(),
        disk_available,
    })
}
