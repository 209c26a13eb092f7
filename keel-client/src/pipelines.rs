//! Pipeline-related API endpoints

use crate::CoordinatorClient;
use crate::error::Result;
use keel_core::domain::job::Job;
use keel_core::domain::pipeline::{Pipeline, PipelineStatus};
use keel_core::dto::pipeline::{Enqueued, EnqueuePipeline, PipelineDetail};
use uuid::Uuid;

impl CoordinatorClient {
    // =============================================================================
    // Pipeline Ingestion
    // =============================================================================

    /// Enqueue a pipeline for a repository event
    ///
    /// # Arguments
    /// * `req` - The definition and the trigger event
    ///
    /// # Returns
    /// The pipeline id and the ids of its jobs in definition order
    ///
    /// # Example
    /// ```no_run
    /// # use keel_client::CoordinatorClient;
    /// # use keel_core::domain::definition::{PipelineDefinition, TriggerEvent};
    /// # use keel_core::dto::pipeline::EnqueuePipeline;
    /// # async fn example(definition: PipelineDefinition) -> anyhow::Result<()> {
    /// let client = CoordinatorClient::new("http://localhost:8080");
    /// let enqueued = client.enqueue_pipeline(&EnqueuePipeline {
    ///     definition,
    ///     trigger: TriggerEvent {
    ///         repository: "team/service".to_string(),
    ///         git_ref: "refs/heads/main".to_string(),
    ///         commit_sha: None,
    ///         clone_url: None,
    ///         event: Some("push".to_string()),
    ///     },
    /// }).await?;
    /// println!("{}", enqueued.pipeline_id);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn enqueue_pipeline(&self, req: &EnqueuePipeline) -> Result<Enqueued> {
        let response = self
            .client
            .post(self.url("/api/pipelines"))
            .json(req)
            .send()
            .await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Pipeline Query
    // =============================================================================

    /// List pipelines, newest first, optionally filtered by status
    ///
    /// # Arguments
    /// * `status` - Only pipelines in this status, when given
    ///
    /// # Returns
    /// The matching pipelines
    pub async fn list_pipelines(&self, status: Option<PipelineStatus>) -> Result<Vec<Pipeline>> {
        let mut request = self.client.get(self.url("/api/pipelines"));
        if let Some(status) = status {
            request = request.query(&[("status", status.as_str())]);
        }
        let response = request.send().await?;

        self.handle_response(response).await
    }

    /// Get a pipeline with its jobs
    ///
    /// # Arguments
    /// * `pipeline_id` - The pipeline UUID
    ///
    /// # Returns
    /// The pipeline and its jobs
    pub async fn get_pipeline(&self, pipeline_id: Uuid) -> Result<PipelineDetail> {
        let url = self.url(&format!("/api/pipelines/{}", pipeline_id));
        let response = self.client.get(url).send().await?;

        self.handle_response(response).await
    }

    /// List the jobs of a pipeline in definition order
    ///
    /// # Arguments
    /// * `pipeline_id` - The pipeline UUID
    pub async fn list_pipeline_jobs(&self, pipeline_id: Uuid) -> Result<Vec<Job>> {
        let url = self.url(&format!("/api/pipelines/{}/jobs", pipeline_id));
        let response = self.client.get(url).send().await?;

        self.handle_response(response).await
    }

    /// Cancel a pipeline
    ///
    /// Pending jobs are canceled at once; running jobs are canceled through
    /// their agent's next heartbeat.
    ///
    /// # Arguments
    /// * `pipeline_id` - The pipeline UUID
    ///
    /// # Returns
    /// The pipeline after the cancellation was applied
    pub async fn cancel_pipeline(&self, pipeline_id: Uuid) -> Result<Pipeline> {
        let url = self.url(&format!("/api/pipelines/{}/cancel", pipeline_id));
        let response = self.client.post(url).send().await?;

        self.handle_response(response).await
    }
}
