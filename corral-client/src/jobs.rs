//! Job-related coordinator endpoints

use crate::error::Result;
use crate::{CoordinatorClient, handle_optional_response, handle_response};
use corral_core::domain::lease::JobLease;
use corral_core::domain::result::ExecutionResult;
use corral_core::dto::job::{PollRequest, ReportRequest, ReportStatus, ReportResponse};
use uuid::Uuid;

impl CoordinatorClient {
    // =============================================================================
    // Job Claims (Runner-specific)
    // =============================================================================

    /// Poll for a job matching the runner's labels
    ///
    /// # Returns
    /// `Some(lease)` when a job was claimed, `None` when nothing is queued.
    /// A lost claim race surfaces as an API error with status 409.
    pub async fn poll(
        &self,
        runner_id: Uuid,
        token: &str,
        request: &PollRequest,
    ) -> Result<Option<JobLease>> {
        let url = format!("{}/api/runners/{}/poll", self.base_url, runner_id);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(request)
            .send()
            .await?;

        handle_optional_response(response).await
    }

    /// Report the result of a job
    ///
    /// Reports are idempotent on `job_id`, so resending after a lost ack is safe.
    pub async fn report(
        &self,
        runner_id: Uuid,
        token: &str,
        result: &ExecutionResult,
    ) -> Result<ReportStatus> {
        let url = format!("{}/api/jobs/{}/report", self.base_url, result.job_id);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&ReportRequest {
                runner_id,
                result: result.clone(),
            })
            .send()
            .await?;

        let body: ReportResponse = handle_response(response).await?;
        Ok(body.status)
    }
}
