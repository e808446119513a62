//! Runner-related coordinator endpoints

use crate::error::Result;
use crate::{CoordinatorClient, handle_response};
use corral_core::domain::runner::RunnerIdentity;
use corral_core::domain::token::RegistrationToken;
use corral_core::dto::runner::{HeartbeatAck, HeartbeatRequest, RegisterAck, RegisterRunner};
use uuid::Uuid;

impl CoordinatorClient {
    // =============================================================================
    // Runner Registration & Lifecycle
    // =============================================================================

    /// Register a runner with the coordinator
    ///
    /// The coordinator answers 401/403 when it rejects the token.
    ///
    /// # Example
    /// ```no_run
    /// # use corral_client::CoordinatorClient;
    /// # use corral_core::domain::runner::RunnerIdentity;
    /// # async fn example() -> anyhow::Result<()> {
    /// let client = CoordinatorClient::new("http://localhost:8080");
    /// let identity = RunnerIdentity::new("pi-01", vec!["self-hosted".to_string()], vec![]);
    /// let ack = client.register(&identity, "registration-token").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn register(&self, identity: &RunnerIdentity, token: &str) -> Result<RegisterAck> {
        let url = format!("{}/api/runners/register", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&RegisterRunner {
                identity: identity.clone(),
            })
            .send()
            .await?;

        handle_response(response).await
    }

    /// Send a heartbeat to the coordinator
    ///
    /// The reply lists leases the coordinator has revoked from this runner.
    pub async fn heartbeat(
        &self,
        runner_id: Uuid,
        token: &str,
        request: &HeartbeatRequest,
    ) -> Result<HeartbeatAck> {
        let url = format!("{}/api/runners/{}/heartbeat", self.base_url, runner_id);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(request)
            .send()
            .await?;

        handle_response(response).await
    }

    /// Exchange the current registration token for a fresh one
    pub async fn refresh_token(&self, token: &str) -> Result<RegistrationToken> {
        let url = format!("{}/api/tokens/refresh", self.base_url);
        let response = self.client.post(&url).bearer_auth(token).send().await?;

        handle_response(response).await
    }
}
