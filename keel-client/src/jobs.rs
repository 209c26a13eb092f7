//! Job-related API endpoints

use crate::CoordinatorClient;
use crate::error::Result;
use keel_core::domain::job::{Job, JobStatus};
use keel_core::domain::log::LogEntry;
use keel_core::dto::job::{StatusAck, StatusReport};
use uuid::Uuid;

impl CoordinatorClient {
    // =============================================================================
    // Job Query
    // =============================================================================

    /// Get a job by ID
    ///
    /// # Arguments
    /// * `job_id` - The job UUID
    pub async fn get_job(&self, job_id: Uuid) -> Result<Job> {
        let url = self.url(&format!("/api/jobs/{}", job_id));
        let response = self.client.get(url).send().await?;

        self.handle_response(response).await
    }

    /// List jobs, optionally filtered by status
    pub async fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<Job>> {
        let mut request = self.client.get(self.url("/api/jobs"));
        if let Some(status) = status {
            request = request.query(&[("status", status.as_str())]);
        }
        let response = request.send().await?;

        self.handle_response(response).await
    }

    /// Get the logs of a job in the order they were appended
    ///
    /// # Arguments
    /// * `job_id` - The job UUID
    pub async fn get_job_logs(&self, job_id: Uuid) -> Result<Vec<LogEntry>> {
        let url = self.url(&format!("/api/jobs/{}/logs", job_id));
        let response = self.client.get(url).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Job Execution (Agent-specific)
    // =============================================================================

    /// Report the status of a held job, with a chunk of logs
    ///
    /// Fails with a `not_owner` error when the agent no longer holds the claim.
    ///
    /// # Arguments
    /// * `token` - The agent token issued at registration
    /// * `job_id` - The held job
    /// * `report` - New status, log chunk and failure details
    ///
    /// # Returns
    /// Whether the coordinator wants the job canceled
    pub async fn report_status(
        &self,
        token: Uuid,
        job_id: Uuid,
        report: &StatusReport,
    ) -> Result<StatusAck> {
        let url = self.url(&format!("/api/jobs/{}/status", job_id));
        let request = self.authorized(self.client.post(url), token);
        let response = request.json(report).send().await?;

        self.handle_response(response).await
    }
}
