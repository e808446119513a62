//! Capabilities service
//!
//! Discovers what this host can run (architecture, OS, container tools)
//! so the coordinator can match jobs on capabilities as well as labels.

use std::collections::BTreeSet;
use std::path::Path;
use tracing::info;

/// Tools whose presence on PATH is advertised as a capability
const TOOLS: &[&str] = &["podman", "docker", "git"];

pub trait CapabilitiesService: Send + Sync {
    /// Every capability this host offers
    fn discover(&self) -> BTreeSet<String>;
}

/// Discovers from the running system, plus configured extras
pub struct StandardCapabilitiesService {
    extra: Vec<String>,
}

impl StandardCapabilitiesService {
    pub fn new(extra: Vec<String>) -> Self {
        Self { extra }
    }
}

impl CapabilitiesService for StandardCapabilitiesService {
    fn discover(&self) -> BTreeSet<String> {
        let mut capabilities = BTreeSet::new();

        capabilities.insert(arch_name(std::env::consts::ARCH).to_string());
        capabilities.insert(std::env::consts::OS.to_string());

        let path = std::env::var_os("PATH").unwrap_or_default();
        for tool in TOOLS {
            if std::env::split_paths(&path).any(|dir| is_executable(&dir.join(tool))) {
                capabilities.insert((*tool).to_string());
            }
        }

        capabilities.extend(self.extra.iter().cloned());

        info!("Discovered {} capabilities: {:?}", capabilities.len(), capabilities);
        capabilities
    }
}

/// CI ecosystems say arm64, Rust says aarch64
fn arch_name(arch: &str) -> &str {
    match arch {
        "aarch64" => "arm64",
        "arm" => "armv7",
        other => other,
    }
}

fn is_executable(path: &Path) -> bool {
    path.is_file()
}
