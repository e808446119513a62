//! Runner daemon status API

use crate::error::Result;
use crate::{handle_empty_response, handle_response};
use corral_core::domain::agent::AgentSnapshot;
use corral_core::dto::fleet::FleetStatus;
use reqwest::Client;
use uuid::Uuid;

/// HTTP client for a runner daemon's operator API
#[derive(Debug, Clone)]
pub struct FleetClient {
    base_url: String,
    client: Client,
}

impl FleetClient {
    /// Create a client for the daemon at `base_url` (e.g., "http://127.0.0.1:9090")
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =============================================================================
    // Fleet Query
    // =============================================================================

    /// Aggregated fleet status
    pub async fn status(&self) -> Result<FleetStatus> {
        let url = format!("{}/api/fleet/status", self.base_url);
        let response = self.client.get(&url).send().await?;

        handle_response(response).await
    }

    /// List all agents known to the controller
    pub async fn list_agents(&self) -> Result<Vec<AgentSnapshot>> {
        let url = format!("{}/api/agents", self.base_url);
        let response = self.client.get(&url).send().await?;

        handle_response(response).await
    }

    /// Get a single agent
    pub async fn get_agent(&self, runner_id: Uuid) -> Result<AgentSnapshot> {
        let url = format!("{}/api/agents/{}", self.base_url, runner_id);
        let response = self.client.get(&url).send().await?;

        handle_response(response).await
    }

    // =============================================================================
    // Operator Intervention
    // =============================================================================

    /// Ask an agent to terminate gracefully
    pub async fn stop_agent(&self, runner_id: Uuid) -> Result<()> {
        let url = format!("{}/api/agents/{}/stop", self.base_url, runner_id);
        let response = self.client.post(&url).send().await?;

        handle_empty_response(response).await
    }

    /// Clear an offline agent so it registers again
    pub async fn clear_agent(&self, runner_id: Uuid) -> Result<()> {
        let url = format!("{}/api/agents/{}/clear", self.base_url, runner_id);
        let response = self.client.post(&url).send().await?;

        handle_empty_response(response).await
    }

    /// Bring an offline host back into reconciliation
    pub async fn clear_host(&self, host_id: &str) -> Result<()> {
        let url = format!("{}/api/hosts/{}/clear", self.base_url, host_id);
        let response = self.client.post(&url).send().await?;

        handle_empty_response(response).await
    }
}
