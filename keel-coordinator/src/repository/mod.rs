//! Repository Module
//!
//! Data access layer for the coordinator.
//!
//! The [`Store`] trait is the only access path to the job queue and the agent
//! registry. Two implementations exist: [`PgStore`] on Postgres and
//! [`MemoryStore`] for development and tests. Every job mutation outside
//! `claim_next_job` goes through [`Store::update_job_if`], a compare-and-set
//! on the job's status and holder so concurrent writers cannot clobber each
//! other.

pub mod agent;
pub mod job;
pub mod log;
pub mod memory;
pub mod pipeline;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_core::domain::agent::Agent;
use keel_core::domain::job::{Job, JobStatus};
use keel_core::domain::log::LogEntry;
use keel_core::domain::pipeline::{Pipeline, PipelineStatus};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to encode or decode a stored value: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Expected state of a job row for a conditional update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expected<'a> {
    pub status: JobStatus,
    pub agent_id: Option<&'a str>,
}

impl<'a> Expected<'a> {
    /// Matches the job as it was read
    pub fn from_job(job: &'a Job) -> Self {
        Self {
            status: job.status,
            agent_id: job.agent_id.as_deref(),
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Pipelines
    // =========================================================================

    /// Inserts a pipeline and all its jobs atomically
    async fn insert_pipeline(&self, pipeline: &Pipeline, jobs: &[Job]) -> StoreResult<()>;

    async fn get_pipeline(&self, id: Uuid) -> StoreResult<Option<Pipeline>>;

    /// Newest first
    async fn list_pipelines(&self, status: Option<PipelineStatus>) -> StoreResult<Vec<Pipeline>>;

    /// Writes the mutable pipeline fields (status, failed job, cancel flag, timestamps)
    async fn update_pipeline(&self, pipeline: &Pipeline) -> StoreResult<()>;

    // =========================================================================
    // Jobs
    // =========================================================================

    async fn get_job(&self, id: Uuid) -> StoreResult<Option<Job>>;

    /// Oldest first
    async fn list_jobs(&self, status: Option<JobStatus>) -> StoreResult<Vec<Job>>;

    /// Jobs of a pipeline in definition order
    async fn jobs_for_pipeline(&self, pipeline_id: Uuid) -> StoreResult<Vec<Job>>;

    /// Jobs the agent holds (Claimed or Running)
    async fn jobs_held_by(&self, agent_id: &str) -> StoreResult<Vec<Job>>;

    /// Atomically claims the oldest eligible Pending job for the agent.
    ///
    /// Eligible means: not marked for cancellation, required capabilities are
    /// a subset of the agent's, every job in `needs` has Succeeded. Nothing
    /// is claimed while the agent already holds `max_concurrent_jobs` jobs.
    async fn claim_next_job(&self, agent: &Agent, now: DateTime<Utc>) -> StoreResult<Option<Job>>;

    /// Replaces the job's mutable fields with `job`'s if the stored row still
    /// matches `expected`, appending `logs` in the same step.
    ///
    /// Returns false, without side effects, when the row moved on.
    async fn update_job_if(
        &self,
        job: &Job,
        expected: Expected<'_>,
        logs: &[LogEntry],
    ) -> StoreResult<bool>;

    // =========================================================================
    // Logs
    // =========================================================================

    async fn append_logs(&self, job_id: Uuid, logs: &[LogEntry]) -> StoreResult<()>;

    /// In append order
    async fn get_logs(&self, job_id: Uuid) -> StoreResult<Vec<LogEntry>>;

    // =========================================================================
    // Agents
    // =========================================================================

    /// Inserts or replaces the registration with the same id
    async fn upsert_agent(&self, agent: &Agent) -> StoreResult<()>;

    async fn get_agent(&self, id: &str) -> StoreResult<Option<Agent>>;

    async fn find_agent_by_token(&self, token: Uuid) -> StoreResult<Option<Agent>>;

    async fn list_agents(&self) -> StoreResult<Vec<Agent>>;

    async fn delete_agent(&self, id: &str) -> StoreResult<bool>;

    /// Records a heartbeat and marks the agent Online
    async fn touch_agent(&self, id: &str, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Marks Online agents silent since before `cutoff` as Unreachable and
    /// returns their ids
    async fn mark_stale_agents(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<String>>;

    /// Ids of Unreachable agents that still hold jobs
    async fn unreachable_holders(&self) -> StoreResult<Vec<String>>;

    /// Sets every agent's last heartbeat to `at`
    async fn refresh_heartbeats(&self, at: DateTime<Utc>) -> StoreResult<u64>;
}
