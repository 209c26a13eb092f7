//! Pipeline DTOs for inter-service communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::definition::{PipelineDefinition, TriggerEvent};
use crate::domain::job::Job;
use crate::domain::pipeline::Pipeline;

/// Request to enqueue a pipeline for a repository event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueuePipeline {
    pub definition: PipelineDefinition,
    pub trigger: TriggerEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enqueued {
    pub pipeline_id: Uuid,
    pub job_ids: Vec<Uuid>,
}

/// A pipeline with its jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDetail {
    #[serde(flatten)]
    pub pipeline: Pipeline,
    pub jobs: Vec<Job>,
}
