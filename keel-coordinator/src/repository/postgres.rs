//! Postgres store
//!
//! Implements [`Store`] on top of the per-entity repositories. Multi-statement
//! operations run inside a transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_core::domain::agent::Agent;
use keel_core::domain::job::{Job, JobStatus};
use keel_core::domain::log::LogEntry;
use keel_core::domain::pipeline::{Pipeline, PipelineStatus};
use sqlx::PgPool;
use uuid::Uuid;

use super::{Expected, Store, StoreResult};
use super::{agent as agent_repository, job as job_repository};
use super::{log as log_repository, pipeline as pipeline_repository};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_pipeline(&self, pipeline: &Pipeline, jobs: &[Job]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        pipeline_repository::insert(&mut tx, pipeline).await?;
        for job in jobs {
            job_repository::insert(&mut tx, job).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_pipeline(&self, id: Uuid) -> StoreResult<Option<Pipeline>> {
        pipeline_repository::find_by_id(&self.pool, id).await
    }

    async fn list_pipelines(&self, status: Option<PipelineStatus>) -> StoreResult<Vec<Pipeline>> {
        pipeline_repository::list(&self.pool, status).await
    }

    async fn update_pipeline(&self, pipeline: &Pipeline) -> StoreResult<()> {
        pipeline_repository::update(&self.pool, pipeline).await
    }

    async fn get_job(&self, id: Uuid) -> StoreResult<Option<Job>> {
        job_repository::find_by_id(&self.pool, id).await
    }

    async fn list_jobs(&self, status: Option<JobStatus>) -> StoreResult<Vec<Job>> {
        job_repository::list(&self.pool, status).await
    }

    async fn jobs_for_pipeline(&self, pipeline_id: Uuid) -> StoreResult<Vec<Job>> {
        job_repository::find_by_pipeline(&self.pool, pipeline_id).await
    }

    async fn jobs_held_by(&self, agent_id: &str) -> StoreResult<Vec<Job>> {
        job_repository::find_held_by(&self.pool, agent_id).await
    }

    async fn claim_next_job(&self, agent: &Agent, now: DateTime<Utc>) -> StoreResult<Option<Job>> {
        let mut tx = self.pool.begin().await?;

        // Serializes claims of one agent so the slot check below holds
        if !agent_repository::lock(&mut tx, &agent.id).await? {
            return Ok(None);
        }

        let held = job_repository::count_held_by(&mut tx, &agent.id).await?;
        if held >= i64::from(agent.max_concurrent_jobs) {
            return Ok(None);
        }

        let job = job_repository::claim_next(&mut tx, agent, now).await?;
        tx.commit().await?;
        Ok(job)
    }

    async fn update_job_if(
        &self,
        job: &Job,
        expected: Expected<'_>,
        logs: &[LogEntry],
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        if !job_repository::update_if(&mut tx, job, expected).await? {
            return Ok(false);
        }
        log_repository::add_entries(&mut tx, job.id, logs).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn append_logs(&self, job_id: Uuid, logs: &[LogEntry]) -> StoreResult<()> {
        if logs.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.acquire().await?;
        log_repository::add_entries(&mut conn, job_id, logs).await
    }

    async fn get_logs(&self, job_id: Uuid) -> StoreResult<Vec<LogEntry>> {
        log_repository::find_by_job(&self.pool, job_id).await
    }

    async fn upsert_agent(&self, agent: &Agent) -> StoreResult<()> {
        agent_repository::upsert(&self.pool, agent).await
    }

    async fn get_agent(&self, id: &str) -> StoreResult<Option<Agent>> {
        agent_repository::find_by_id(&self.pool, id).await
    }

    async fn find_agent_by_token(&self, token: Uuid) -> StoreResult<Option<Agent>> {
        agent_repository::find_by_token(&self.pool, token).await
    }

    async fn list_agents(&self) -> StoreResult<Vec<Agent>> {
        agent_repository::list_all(&self.pool).await
    }

    async fn delete_agent(&self, id: &str) -> StoreResult<bool> {
        agent_repository::delete(&self.pool, id).await
    }

    async fn touch_agent(&self, id: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        agent_repository::update_heartbeat(&self.pool, id, at).await
    }

    async fn mark_stale_agents(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<String>> {
        agent_repository::mark_stale(&self.pool, cutoff).await
    }

    async fn unreachable_holders(&self) -> StoreResult<Vec<String>> {
        agent_repository::unreachable_holders(&self.pool).await
    }

    async fn refresh_heartbeats(&self, at: DateTime<Utc>) -> StoreResult<u64> {
        agent_repository::refresh_all(&self.pool, at).await
    }
}
