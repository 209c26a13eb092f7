//! Job DTOs for inter-service communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::definition::TriggerEvent;
use crate::domain::job::{Job, JobFailure, JobStatus};
use crate::domain::log::LogEntry;

/// A claimed job together with what the agent needs to check out the sources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub job: Job,
    pub trigger: TriggerEvent,
}

/// Response to a claim request; `None` when no eligible job is queued
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub assignment: Option<Assignment>,
}

/// Status report from an agent for a job it holds
///
/// `Running -> Running` reports are job heartbeats carrying log chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: JobStatus,

    #[serde(default)]
    pub logs: Vec<LogEntry>,

    /// Set when `status` is Failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<JobFailure>,
}

impl StatusReport {
    pub fn new(status: JobStatus, logs: Vec<LogEntry>) -> Self {
        Self {
            status,
            logs,
            failure: None,
        }
    }

    pub fn failed(failure: JobFailure, logs: Vec<LogEntry>) -> Self {
        Self {
            status: JobStatus::Failed,
            logs,
            failure: Some(failure),
        }
    }
}

/// Coordinator answer to a status report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusAck {
    pub job_id: Uuid,
    pub status: JobStatus,

    /// The job should be abandoned and reported Canceled
    pub cancel_requested: bool,
}
