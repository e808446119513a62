//! Runner identity
//!
//! A runner is one logical job-execution worker on a host.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Identity a runner registers with at the coordinator.
///
/// Created on first registration and immutable afterwards. The daemon
/// persists it per agent slot so a restarted agent keeps its runner_id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerIdentity {
    /// Stable identifier for the runner
    pub runner_id: Uuid,

    /// Labels used by the coordinator for job matching (e.g. "self-hosted", "pi4")
    pub labels: BTreeSet<String>,

    /// Host this runner lives on
    pub host_id: String,

    /// Capabilities of the host (e.g. "podman", "arm64")
    pub capabilities: BTreeSet<String>,
}

impl RunnerIdentity {
    /// Creates a fresh identity with a new runner_id
    pub fn new(
        host_id: impl Into<String>,
        labels: impl IntoIterator<Item = String>,
        capabilities: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            runner_id: Uuid::new_v4(),
            labels: labels.into_iter().collect(),
            host_id: host_id.into(),
            capabilities: capabilities.into_iter().collect(),
        }
    }

    /// Returns true if this runner carries every label in `required`
    pub fn satisfies(&self, required: &[String]) -> bool {
        required
            .iter()
            .all(|label| self.labels.contains(label) || self.capabilities.contains(label))
    }
}
