//! Coordinator repository
//!
//! The four protocol operations a runner needs, behind a trait so agents
//! can be driven against an in-memory coordinator in tests.

use async_trait::async_trait;
use corral_client::CoordinatorClient;
use corral_core::domain::lease::JobLease;
use corral_core::domain::result::ExecutionResult;
use corral_core::domain::runner::RunnerIdentity;
use corral_core::domain::token::RegistrationToken;
use corral_core::dto::job::{PollRequest, ReportStatus};
use corral_core::dto::runner::{HeartbeatAck, HeartbeatRequest, RegisterAck};
use std::time::Duration;
use uuid::Uuid;

use crate::credentials::TokenSource;
use crate::error::Result;

#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Registers `identity`; rejection surfaces as `Auth`
    async fn register(&self, identity: &RunnerIdentity, token: &str) -> Result<RegisterAck>;

    /// Claims a job; `None` when nothing matches, `LeaseConflict` on a lost race
    async fn poll(
        &self,
        runner_id: Uuid,
        token: &str,
        request: &PollRequest,
    ) -> Result<Option<JobLease>>;

    /// Delivers a result. Safe to resend.
    async fn report(
        &self,
        runner_id: Uuid,
        token: &str,
        result: &ExecutionResult,
    ) -> Result<ReportStatus>;

    async fn heartbeat(
        &self,
        runner_id: Uuid,
        token: &str,
        request: &HeartbeatRequest,
    ) -> Result<HeartbeatAck>;
}

/// Coordinator over HTTP
pub struct HttpCoordinator {
    client: CoordinatorClient,
}

impl HttpCoordinator {
    /// Every call is bounded by `request_timeout`
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: CoordinatorClient::with_timeout(base_url, request_timeout)?,
        })
    }

    pub fn base_url(&self) -> &str {
        self.client.base_url()
    }
}

#[async_trait]
impl Coordinator for HttpCoordinator {
    async fn register(&self, identity: &RunnerIdentity, token: &str) -> Result<RegisterAck> {
        Ok(self.client.register(identity, token).await?)
    }

    async fn poll(
        &self,
        runner_id: Uuid,
        token: &str,
        request: &PollRequest,
    ) -> Result<Option<JobLease>> {
        Ok(self.client.poll(runner_id, token, request).await?)
    }

    async fn report(
        &self,
        runner_id: Uuid,
        token: &str,
        result: &ExecutionResult,
    ) -> Result<ReportStatus> {
        Ok(self.client.report(runner_id, token, result).await?)
    }

    async fn heartbeat(
        &self,
        runner_id: Uuid,
        token: &str,
        request: &HeartbeatRequest,
    ) -> Result<HeartbeatAck> {
        Ok(self.client.heartbeat(runner_id, token, request).await?)
    }
}

#[async_trait]
impl TokenSource for HttpCoordinator {
    async fn refresh(&self, current: &str) -> Result<RegistrationToken> {
        Ok(self.client.refresh_token(current).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RunnerError;

    #[test]
    fn test_new_keeps_base_url() {
        let coordinator =
            HttpCoordinator::new("http://localhost:8080", Duration::from_secs(5)).unwrap();
        assert_eq!(coordinator.base_url(), "http://localhost:8080");
    }

    #[tokio::test]
    async fn test_unreachable_coordinator_is_transient() {
        // Port 9 (discard) is closed on any sane test machine
        let coordinator =
            HttpCoordinator::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let identity = RunnerIdentity::new("pi-01", Vec::new(), Vec::new());

        let err = coordinator.register(&identity, "t").await.unwrap_err();
        assert!(
            matches!(err, RunnerError::Network(_) | RunnerError::Timeout(_)),
            "got {:?}",
            err
        );
        assert!(err.is_transient());
    }
}
