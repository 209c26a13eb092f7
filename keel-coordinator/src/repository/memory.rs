//! In-memory store
//!
//! A single mutex guards the whole state, which makes every operation atomic.
//! Used when no database is configured, and by the test suites.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_core::domain::agent::{Agent, AgentStatus};
use keel_core::domain::capability;
use keel_core::domain::job::{Job, JobStatus};
use keel_core::domain::log::LogEntry;
use keel_core::domain::pipeline::{Pipeline, PipelineStatus};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Expected, Store, StoreError, StoreResult};

#[derive(Default)]
struct State {
    pipelines: HashMap<Uuid, Pipeline>,
    jobs: HashMap<Uuid, Job>,
    logs: HashMap<Uuid, Vec<LogEntry>>,
    agents: HashMap<String, Agent>,
}

impl State {
    fn active_count(&self, agent_id: &str) -> usize {
        self.jobs.values().filter(|j| j.is_held_by(agent_id)).count()
    }

    fn needs_satisfied(&self, job: &Job) -> bool {
        job.needs.iter().all(|need| {
            self.jobs
                .get(need)
                .is_some_and(|dep| dep.status == JobStatus::Succeeded)
        })
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_jobs<'a>(jobs: impl Iterator<Item = &'a Job>) -> Vec<Job> {
    let mut jobs: Vec<Job> = jobs.cloned().collect();
    jobs.sort_by_key(|j| (j.enqueued_at, j.position));
    jobs
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_pipeline(&self, pipeline: &Pipeline, jobs: &[Job]) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if state.pipelines.contains_key(&pipeline.id) {
            return Err(StoreError::Corrupt(format!(
                "pipeline {} already exists",
                pipeline.id
            )));
        }
        state.pipelines.insert(pipeline.id, pipeline.clone());
        for job in jobs {
            state.jobs.insert(job.id, job.clone());
        }
        Ok(())
    }

    async fn get_pipeline(&self, id: Uuid) -> StoreResult<Option<Pipeline>> {
        Ok(self.state.lock().await.pipelines.get(&id).cloned())
    }

    async fn list_pipelines(&self, status: Option<PipelineStatus>) -> StoreResult<Vec<Pipeline>> {
        let state = self.state.lock().await;
        let mut pipelines: Vec<Pipeline> = state
            .pipelines
            .values()
            .filter(|p| status.is_none_or(|s| p.status == s))
            .cloned()
            .collect();
        pipelines.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(pipelines)
    }

    async fn update_pipeline(&self, pipeline: &Pipeline) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        match state.pipelines.get_mut(&pipeline.id) {
            Some(stored) => {
                stored.status = pipeline.status;
                stored.failed_job_id = pipeline.failed_job_id;
                stored.cancel_requested = pipeline.cancel_requested;
                stored.updated_at = pipeline.updated_at;
                stored.completed_at = pipeline.completed_at;
                Ok(())
            }
            None => Err(StoreError::Corrupt(format!(
                "pipeline {} does not exist",
                pipeline.id
            ))),
        }
    }

    async fn get_job(&self, id: Uuid) -> StoreResult<Option<Job>> {
        Ok(self.state.lock().await.jobs.get(&id).cloned())
    }

    async fn list_jobs(&self, status: Option<JobStatus>) -> StoreResult<Vec<Job>> {
        let state = self.state.lock().await;
        Ok(sorted_jobs(
            state
                .jobs
                .values()
                .filter(|j| status.is_none_or(|s| j.status == s)),
        ))
    }

    async fn jobs_for_pipeline(&self, pipeline_id: Uuid) -> StoreResult<Vec<Job>> {
        let state = self.state.lock().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| j.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.position);
        Ok(jobs)
    }

    async fn jobs_held_by(&self, agent_id: &str) -> StoreResult<Vec<Job>> {
        let state = self.state.lock().await;
        Ok(sorted_jobs(
            state.jobs.values().filter(|j| j.is_held_by(agent_id)),
        ))
    }

    async fn claim_next_job(&self, agent: &Agent, now: DateTime<Utc>) -> StoreResult<Option<Job>> {
        let mut state = self.state.lock().await;

        if state.active_count(&agent.id) >= agent.max_concurrent_jobs as usize {
            return Ok(None);
        }

        let candidate = state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && j.cancel_requested_at.is_none())
            .filter(|j| capability::satisfies(&agent.capabilities, &j.required_capabilities))
            .filter(|j| state.needs_satisfied(j))
            .min_by_key(|j| (j.enqueued_at, j.position))
            .map(|j| j.id);

        let Some(job_id) = candidate else {
            return Ok(None);
        };

        let Some(job) = state.jobs.get_mut(&job_id) else {
            return Ok(None);
        };
        job.status = JobStatus::Claimed;
        job.agent_id = Some(agent.id.clone());
        job.claimed_at = Some(now);
        Ok(Some(job.clone()))
    }

    async fn update_job_if(
        &self,
        job: &Job,
        expected: Expected<'_>,
        logs: &[LogEntry],
    ) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let Some(stored) = state.jobs.get_mut(&job.id) else {
            return Ok(false);
        };
        if stored.status != expected.status || stored.agent_id.as_deref() != expected.agent_id {
            return Ok(false);
        }
        *stored = job.clone();
        if !logs.is_empty() {
            state
                .logs
                .entry(job.id)
                .or_default()
                .extend_from_slice(logs);
        }
        Ok(true)
    }

    async fn append_logs(&self, job_id: Uuid, logs: &[LogEntry]) -> StoreResult<()> {
        if logs.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        state.logs.entry(job_id).or_default().extend_from_slice(logs);
        Ok(())
    }

    async fn get_logs(&self, job_id: Uuid) -> StoreResult<Vec<LogEntry>> {
        let state = self.state.lock().await;
        Ok(state.logs.get(&job_id).cloned().unwrap_or_default())
    }

    async fn upsert_agent(&self, agent: &Agent) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.agents.insert(agent.id.clone(), agent.clone());
        Ok(())
    }

    async fn get_agent(&self, id: &str) -> StoreResult<Option<Agent>> {
        Ok(self.state.lock().await.agents.get(id).cloned())
    }

    async fn find_agent_by_token(&self, token: Uuid) -> StoreResult<Option<Agent>> {
        let state = self.state.lock().await;
        Ok(state.agents.values().find(|a| a.token == token).cloned())
    }

    async fn list_agents(&self) -> StoreResult<Vec<Agent>> {
        let state = self.state.lock().await;
        let mut agents: Vec<Agent> = state.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }

    async fn delete_agent(&self, id: &str) -> StoreResult<bool> {
        Ok(self.state.lock().await.agents.remove(id).is_some())
    }

    async fn touch_agent(&self, id: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        match state.agents.get_mut(id) {
            Some(agent) => {
                agent.last_heartbeat_at = at;
                agent.status = AgentStatus::Online;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_stale_agents(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<String>> {
        let mut state = self.state.lock().await;
        let mut marked = Vec::new();
        for agent in state.agents.values_mut() {
            if agent.status == AgentStatus::Online && agent.last_heartbeat_at < cutoff {
                agent.status = AgentStatus::Unreachable;
                marked.push(agent.id.clone());
            }
        }
        marked.sort();
        Ok(marked)
    }

    async fn unreachable_holders(&self) -> StoreResult<Vec<String>> {
        let state = self.state.lock().await;
        let mut holders: Vec<String> = state
            .agents
            .values()
            .filter(|a| a.status == AgentStatus::Unreachable && state.active_count(&a.id) > 0)
            .map(|a| a.id.clone())
            .collect();
        holders.sort();
        Ok(holders)
    }

    async fn refresh_heartbeats(&self, at: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        for agent in state.agents.values_mut() {
            agent.last_heartbeat_at = at;
        }
        Ok(state.agents.len() as u64)
    }
}
