//! Job Service
//!
//! Business logic for job dispatch and status reporting.

use chrono::Utc;
use keel_core::domain::agent::{Agent, AgentStatus};
use keel_core::domain::job::{Job, JobStatus};
use keel_core::domain::log::LogEntry;
use keel_core::dto::job::{Assignment, StatusAck, StatusReport};
use uuid::Uuid;

use super::{Result, ServiceError, pipeline_service};
use crate::repository::{Expected, Store};

/// Claim the next eligible job for an agent
///
/// An agent the sweep marked Unreachable gets nothing until it heartbeats again.
pub async fn claim(store: &dyn Store, agent: &Agent) -> Result<Option<Assignment>> {
    if agent.status == AgentStatus::Unreachable {
        tracing::debug!(agent_id = %agent.id, "Unreachable agent must heartbeat before claiming");
        return Ok(None);
    }

    let now = Utc::now();
    let Some(job) = store.claim_next_job(agent, now).await? else {
        return Ok(None);
    };

    tracing::info!(
        job_id = %job.id,
        agent_id = %agent.id,
        "Job '{}' claimed (attempt {})",
        job.name,
        job.attempt
    );

    let pipeline = store
        .get_pipeline(job.pipeline_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("pipeline {}", job.pipeline_id)))?;

    pipeline_service::reevaluate(store, pipeline.id, now).await?;

    Ok(Some(Assignment {
        job,
        trigger: pipeline.trigger,
    }))
}

/// Apply a status report from the agent holding the job.
///
/// A report for a job the agent no longer holds is rejected with
/// [`ServiceError::NotOwner`] and changes nothing, logs included.
pub async fn report_status(
    store: &dyn Store,
    agent: &Agent,
    job_id: Uuid,
    report: StatusReport,
) -> Result<StatusAck> {
    let job = get_job(store, job_id).await?;

    if !job.is_held_by(&agent.id) {
        tracing::warn!(
            job_id = %job_id,
            agent_id = %agent.id,
            "Rejected report for a job the agent does not hold (status {})",
            job.status
        );
        return Err(not_owner(job_id, agent));
    }

    if !job.status.accepts_report(report.status) {
        return Err(ServiceError::InvalidTransition {
            job_id,
            from: job.status,
            to: report.status,
        });
    }

    let now = Utc::now();
    let mut next = job.clone();
    next.status = report.status;
    next.last_progress_at = Some(now);
    if report.status == JobStatus::Running {
        next.started_at.get_or_insert(now);
    }
    if report.status.is_terminal() {
        next.completed_at = Some(now);
    }
    if report.status == JobStatus::Failed {
        next.failure = report.failure;
    }

    if !store
        .update_job_if(&next, Expected::from_job(&job), &report.logs)
        .await?
    {
        // Requeued or reassigned between the read and the write
        return Err(not_owner(job_id, agent));
    }

    if job.status != next.status {
        tracing::info!(
            job_id = %job_id,
            agent_id = %agent.id,
            "Job '{}' {} -> {}",
            job.name,
            job.status,
            next.status
        );
    }

    if next.status.is_terminal() || job.status == JobStatus::Claimed {
        pipeline_service::reevaluate(store, job.pipeline_id, now).await?;
    }

    Ok(StatusAck {
        job_id,
        status: next.status,
        cancel_requested: next.cancel_requested_at.is_some() && !next.status.is_terminal(),
    })
}

/// Get a job by ID
pub async fn get_job(store: &dyn Store, id: Uuid) -> Result<Job> {
    store
        .get_job(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("job {}", id)))
}

/// List jobs, optionally filtered by status
pub async fn list_jobs(store: &dyn Store, status: Option<JobStatus>) -> Result<Vec<Job>> {
    Ok(store.list_jobs(status).await?)
}

/// Get all logs for a job
pub async fn get_job_logs(store: &dyn Store, id: Uuid) -> Result<Vec<LogEntry>> {
    get_job(store, id).await?;
    Ok(store.get_logs(id).await?)
}

fn not_owner(job_id: Uuid, agent: &Agent) -> ServiceError {
    ServiceError::NotOwner {
        job_id,
        agent_id: agent.id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinatorConfig;
    use crate::repository::MemoryStore;
    use keel_core::domain::agent::{AgentAddress, AgentStatus};
    use keel_core::domain::definition::{JobDefinition, PipelineDefinition, TriggerEvent};
    use keel_core::domain::job::{JobFailure, Step};
    use keel_core::domain::pipeline::PipelineStatus;
    use keel_core::dto::pipeline::EnqueuePipeline;

    fn agent(id: &str) -> Agent {
        Agent {
            id: id.to_string(),
            token: Uuid::new_v4(),
            capabilities: vec![],
            address: AgentAddress::default(),
            max_concurrent_jobs: 1,
            registered_at: Utc::now(),
            last_heartbeat_at: Utc::now(),
            status: AgentStatus::Online,
        }
    }

    async fn enqueue_one(store: &MemoryStore) -> Uuid {
        let req = EnqueuePipeline {
            definition: PipelineDefinition {
                name: "ci".to_string(),
                description: None,
                jobs: vec![JobDefinition {
                    name: "build".to_string(),
                    needs: vec![],
                    required: true,
                    capabilities: vec![],
                    steps: vec![Step {
                        name: "make".to_string(),
                        run: "make".to_string(),
                    }],
                    image: None,
                    resources: Default::default(),
                    timeout_seconds: None,
                }],
            },
            trigger: TriggerEvent {
                repository: "acme/app".to_string(),
                git_ref: "main".to_string(),
                commit_sha: None,
                clone_url: Some("http://git.local/acme/app.git".to_string()),
                event: None,
            },
        };
        let enqueued = pipeline_service::enqueue(store, &CoordinatorConfig::default(), req)
            .await
            .unwrap();
        enqueued.pipeline_id
    }

    async fn register(store: &MemoryStore, id: &str) -> Agent {
        let agent = agent(id);
        store.upsert_agent(&agent).await.unwrap();
        agent
    }

    #[tokio::test]
    async fn test_claim_attaches_trigger() {
        let store = MemoryStore::new();
        let pipeline_id = enqueue_one(&store).await;
        let agent = register(&store, "a1").await;

        let assignment = claim(&store, &agent).await.unwrap().unwrap();
        assert_eq!(assignment.job.status, JobStatus::Claimed);
        assert_eq!(assignment.job.agent_id.as_deref(), Some("a1"));
        assert_eq!(
            assignment.trigger.clone_url.as_deref(),
            Some("http://git.local/acme/app.git")
        );

        let pipeline = store.get_pipeline(pipeline_id).await.unwrap().unwrap();
        assert_eq!(pipeline.status, PipelineStatus::Running);
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let store = MemoryStore::new();
        let pipeline_id = enqueue_one(&store).await;
        let agent = register(&store, "a1").await;
        let job_id = claim(&store, &agent).await.unwrap().unwrap().job.id;

        let ack = report_status(
            &store,
            &agent,
            job_id,
            StatusReport::new(JobStatus::Running, vec![LogEntry::info("starting")]),
        )
        .await
        .unwrap();
        assert_eq!(ack.status, JobStatus::Running);
        assert!(!ack.cancel_requested);

        report_status(
            &store,
            &agent,
            job_id,
            StatusReport::new(JobStatus::Succeeded, vec![LogEntry::info("done")]),
        )
        .await
        .unwrap();

        let job = get_job(&store, job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_some());

        let logs = get_job_logs(&store, job_id).await.unwrap();
        assert_eq!(logs.len(), 2);

        let pipeline = store.get_pipeline(pipeline_id).await.unwrap().unwrap();
        assert_eq!(pipeline.status, PipelineStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_failed_report_records_failure() {
        let store = MemoryStore::new();
        let pipeline_id = enqueue_one(&store).await;
        let agent = register(&store, "a1").await;
        let job_id = claim(&store, &agent).await.unwrap().unwrap().job.id;

        report_status(&store, &agent, job_id, StatusReport::new(JobStatus::Running, vec![]))
            .await
            .unwrap();
        report_status(
            &store,
            &agent,
            job_id,
            StatusReport::failed(JobFailure::step_failed(0, "make", 2), vec![]),
        )
        .await
        .unwrap();

        let job = get_job(&store, job_id).await.unwrap();
        let failure = job.failure.unwrap();
        assert_eq!(failure.step, Some(0));
        assert_eq!(failure.exit_code, Some(2));

        let pipeline = store.get_pipeline(pipeline_id).await.unwrap().unwrap();
        assert_eq!(pipeline.status, PipelineStatus::Failed);
        assert_eq!(pipeline.failed_job_id, Some(job_id));
    }

    #[tokio::test]
    async fn test_report_from_other_agent_is_not_owner() {
        let store = MemoryStore::new();
        enqueue_one(&store).await;
        let holder = register(&store, "a1").await;
        let intruder = register(&store, "a2").await;
        let job_id = claim(&store, &holder).await.unwrap().unwrap().job.id;

        let result = report_status(
            &store,
            &intruder,
            job_id,
            StatusReport::new(JobStatus::Running, vec![LogEntry::info("hi")]),
        )
        .await;

        assert!(matches!(result, Err(ServiceError::NotOwner { .. })));
        assert!(store.get_logs(job_id).await.unwrap().is_empty());
        assert_eq!(get_job(&store, job_id).await.unwrap().status, JobStatus::Claimed);
    }

    #[tokio::test]
    async fn test_regression_is_invalid_transition() {
        let store = MemoryStore::new();
        enqueue_one(&store).await;
        let agent = register(&store, "a1").await;
        let job_id = claim(&store, &agent).await.unwrap().unwrap().job.id;

        let result = report_status(
            &store,
            &agent,
            job_id,
            StatusReport::new(JobStatus::Succeeded, vec![]),
        )
        .await;

        assert!(matches!(
            result,
            Err(ServiceError::InvalidTransition {
                from: JobStatus::Claimed,
                to: JobStatus::Succeeded,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let store = MemoryStore::new();
        let agent = register(&store, "a1").await;
        let result = report_status(
            &store,
            &agent,
            Uuid::new_v4(),
            StatusReport::new(JobStatus::Running, vec![]),
        )
        .await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }
}
