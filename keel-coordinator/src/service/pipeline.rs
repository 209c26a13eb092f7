//! Pipeline Service
//!
//! Business logic for pipeline intake, cancellation and the pipeline state
//! machine.

use chrono::{DateTime, Utc};
use keel_core::domain::capability;
use keel_core::domain::job::{Job, JobStatus};
use keel_core::domain::log::LogEntry;
use keel_core::domain::network;
use keel_core::domain::pipeline::{Pipeline, PipelineStatus};
use keel_core::dto::pipeline::{EnqueuePipeline, Enqueued, PipelineDetail};
use std::collections::HashMap;
use uuid::Uuid;

use super::{Result, ServiceError};
use crate::config::CoordinatorConfig;
use crate::repository::{Expected, Store};

/// Validate a definition and expand it into Pending jobs
pub async fn enqueue(
    store: &dyn Store,
    config: &CoordinatorConfig,
    req: EnqueuePipeline,
) -> Result<Enqueued> {
    let EnqueuePipeline {
        definition,
        mut trigger,
    } = req;

    definition.validate()?;
    trigger.validate()?;

    if trigger.clone_url.is_none() {
        if let Some(base) = &config.network.clone_base_url {
            let url = network::clone_url_for(base, &trigger.repository)
                .map_err(|e| ServiceError::InvalidTrigger(e.to_string()))?;
            trigger.clone_url = Some(url);
        }
    }

    let now = Utc::now();
    let pipeline_id = Uuid::new_v4();

    let ids: HashMap<&str, Uuid> = definition
        .jobs
        .iter()
        .map(|job| (job.name.as_str(), Uuid::new_v4()))
        .collect();

    let mut jobs = Vec::with_capacity(definition.jobs.len());
    for (position, def) in definition.jobs.iter().enumerate() {
        let needs = def
            .needs
            .iter()
            .filter_map(|need| ids.get(need.as_str()).copied())
            .collect();

        jobs.push(Job {
            id: ids[def.name.as_str()],
            pipeline_id,
            name: def.name.clone(),
            position: position as u32,
            needs,
            required: def.required,
            required_capabilities: capability::normalize(&def.capabilities),
            steps: def.steps.clone(),
            image: def.image.clone(),
            resources: def.resources.clone(),
            timeout_seconds: def.timeout_seconds,
            status: JobStatus::Pending,
            agent_id: None,
            attempt: 1,
            enqueued_at: now,
            claimed_at: None,
            started_at: None,
            completed_at: None,
            last_progress_at: None,
            cancel_requested_at: None,
            failure: None,
        });
    }

    let pipeline = Pipeline {
        id: pipeline_id,
        name: definition.name,
        description: definition.description,
        trigger,
        status: PipelineStatus::Pending,
        failed_job_id: None,
        cancel_requested: false,
        created_at: now,
        updated_at: now,
        completed_at: None,
    };

    store.insert_pipeline(&pipeline, &jobs).await?;

    tracing::info!(
        pipeline_id = %pipeline.id,
        "Pipeline '{}' enqueued for {}@{} with {} job(s)",
        pipeline.name,
        pipeline.trigger.repository,
        pipeline.trigger.git_ref,
        jobs.len()
    );

    Ok(Enqueued {
        pipeline_id,
        job_ids: jobs.iter().map(|job| job.id).collect(),
    })
}

/// Get a pipeline with its jobs
pub async fn get_pipeline(store: &dyn Store, id: Uuid) -> Result<PipelineDetail> {
    let pipeline = find_pipeline(store, id).await?;
    let jobs = store.jobs_for_pipeline(id).await?;
    Ok(PipelineDetail { pipeline, jobs })
}

/// List pipelines, optionally filtered by status
pub async fn list_pipelines(
    store: &dyn Store,
    status: Option<PipelineStatus>,
) -> Result<Vec<Pipeline>> {
    Ok(store.list_pipelines(status).await?)
}

/// List the jobs of a pipeline in definition order
pub async fn list_pipeline_jobs(store: &dyn Store, id: Uuid) -> Result<Vec<Job>> {
    find_pipeline(store, id).await?;
    Ok(store.jobs_for_pipeline(id).await?)
}

/// Cancel a pipeline.
///
/// Pending jobs are canceled on the spot. Claimed and Running jobs get a
/// cancellation request that reaches their agent on its next heartbeat.
/// Canceling a finished pipeline is a no-op.
pub async fn cancel_pipeline(store: &dyn Store, id: Uuid) -> Result<Pipeline> {
    let mut pipeline = find_pipeline(store, id).await?;
    if pipeline.status.is_terminal() {
        return Ok(pipeline);
    }

    let now = Utc::now();
    if !pipeline.cancel_requested {
        pipeline.cancel_requested = true;
        pipeline.updated_at = now;
        store.update_pipeline(&pipeline).await?;
        tracing::info!(pipeline_id = %id, "Pipeline cancellation requested");
    }

    Ok(reevaluate(store, id, now).await?.unwrap_or(pipeline))
}

/// Advance the pipeline state machine after a job changed.
///
/// Applies fail-fast and cancellation to the remaining jobs, cancels
/// dependents that can no longer run, then recomputes the aggregate status.
/// Returns `None` if the pipeline does not exist.
pub async fn reevaluate(
    store: &dyn Store,
    pipeline_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<Pipeline>> {
    let Some(mut pipeline) = store.get_pipeline(pipeline_id).await? else {
        return Ok(None);
    };
    if pipeline.status.is_terminal() {
        return Ok(Some(pipeline));
    }

    // Each successful write moves a job forward, so this settles
    let jobs = loop {
        let jobs = store.jobs_for_pipeline(pipeline_id).await?;
        let halting = pipeline.cancel_requested || required_failure(&jobs).is_some();

        let mut acted = false;
        for job in &jobs {
            let action = if halting {
                halt_action(job, now)
            } else {
                unreachable_dependency(job, &jobs).map(|need| {
                    cancel_pending(
                        job,
                        now,
                        format!("Canceled: dependency '{}' did not succeed", need),
                    )
                })
            };

            if let Some((next, log)) = action {
                acted = true;
                if store
                    .update_job_if(&next, Expected::from_job(job), &[log])
                    .await?
                {
                    tracing::debug!(
                        job_id = %job.id,
                        "Job '{}' {} -> {}",
                        job.name,
                        job.status,
                        next.status
                    );
                }
            }
        }

        if !acted {
            break jobs;
        }
    };

    let status = PipelineStatus::aggregate(jobs.iter().map(|job| (job.required, job.status)));
    let failed_job_id = required_failure(&jobs).map(|job| job.id);

    if status == pipeline.status && failed_job_id == pipeline.failed_job_id {
        return Ok(Some(pipeline));
    }

    pipeline.status = status;
    pipeline.failed_job_id = failed_job_id;
    pipeline.updated_at = now;
    if status.is_terminal() {
        pipeline.completed_at = Some(now);
    }
    store.update_pipeline(&pipeline).await?;

    if status.is_terminal() {
        tracing::info!(pipeline_id = %pipeline_id, "Pipeline '{}' finished: {}", pipeline.name, status);
    } else {
        tracing::debug!(pipeline_id = %pipeline_id, "Pipeline '{}' is {}", pipeline.name, status);
    }

    Ok(Some(pipeline))
}

async fn find_pipeline(store: &dyn Store, id: Uuid) -> Result<Pipeline> {
    store
        .get_pipeline(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("pipeline {}", id)))
}

// =============================================================================
// State machine helpers
// =============================================================================

/// First failed required job in definition order
fn required_failure(jobs: &[Job]) -> Option<&Job> {
    jobs.iter()
        .find(|job| job.required && job.status == JobStatus::Failed)
}

/// How a non-terminal job is wound down once the pipeline is halting
fn halt_action(job: &Job, now: DateTime<Utc>) -> Option<(Job, LogEntry)> {
    match job.status {
        JobStatus::Pending => Some(cancel_pending(
            job,
            now,
            "Canceled before it was claimed".to_string(),
        )),
        JobStatus::Claimed | JobStatus::Running if job.cancel_requested_at.is_none() => {
            let mut next = job.clone();
            next.cancel_requested_at = Some(now);
            Some((next, LogEntry::warning("Cancellation requested")))
        }
        _ => None,
    }
}

/// Name of a need that ended without succeeding, for a Pending job
fn unreachable_dependency<'a>(job: &Job, jobs: &'a [Job]) -> Option<&'a str> {
    if job.status != JobStatus::Pending {
        return None;
    }
    jobs.iter()
        .filter(|other| job.needs.contains(&other.id))
        .find(|other| other.status.is_terminal() && other.status != JobStatus::Succeeded)
        .map(|other| other.name.as_str())
}

fn cancel_pending(job: &Job, now: DateTime<Utc>, message: String) -> (Job, LogEntry) {
    let mut next = job.clone();
    next.status = JobStatus::Canceled;
    next.completed_at = Some(now);
    next.cancel_requested_at.get_or_insert(now);
    (next, LogEntry::warning(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryStore;
    use keel_core::domain::definition::{JobDefinition, PipelineDefinition, TriggerEvent};
    use keel_core::domain::job::Step;

    fn job_def(name: &str, needs: &[&str]) -> JobDefinition {
        JobDefinition {
            name: name.to_string(),
            needs: needs.iter().map(|n| n.to_string()).collect(),
            required: true,
            capabilities: vec![],
            steps: vec![Step {
                name: "run".to_string(),
                run: "true".to_string(),
            }],
            image: None,
            resources: Default::default(),
            timeout_seconds: None,
        }
    }

    fn request(jobs: Vec<JobDefinition>) -> EnqueuePipeline {
        EnqueuePipeline {
            definition: PipelineDefinition {
                name: "ci".to_string(),
                description: None,
                jobs,
            },
            trigger: TriggerEvent {
                repository: "acme/app".to_string(),
                git_ref: "refs/heads/main".to_string(),
                commit_sha: Some("abc123".to_string()),
                clone_url: None,
                event: None,
            },
        }
    }

    async fn set_status(store: &MemoryStore, id: Uuid, status: JobStatus) {
        let job = store.get_job(id).await.unwrap().unwrap();
        let mut next = job.clone();
        next.status = status;
        assert!(
            store
                .update_job_if(&next, Expected::from_job(&job), &[])
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_enqueue_resolves_needs_and_clone_url() {
        let store = MemoryStore::new();
        let mut config = CoordinatorConfig::default();
        config.network.clone_base_url = Some("http://git.internal:3000".to_string());

        let enqueued = enqueue(
            &store,
            &config,
            request(vec![job_def("build", &[]), job_def("test", &["build"])]),
        )
        .await
        .unwrap();

        let detail = get_pipeline(&store, enqueued.pipeline_id).await.unwrap();
        assert_eq!(detail.pipeline.status, PipelineStatus::Pending);
        assert_eq!(
            detail.pipeline.trigger.clone_url.as_deref(),
            Some("http://git.internal:3000/acme/app.git")
        );
        assert_eq!(detail.jobs.len(), 2);
        assert_eq!(detail.jobs[1].needs, vec![detail.jobs[0].id]);
        assert!(detail.jobs.iter().all(|j| j.status == JobStatus::Pending));
    }

    #[tokio::test]
    async fn test_enqueue_rejects_invalid_definition() {
        let store = MemoryStore::new();
        let result = enqueue(
            &store,
            &CoordinatorConfig::default(),
            request(vec![job_def("a", &["missing"])]),
        )
        .await;

        assert!(matches!(result, Err(ServiceError::InvalidDefinition(_))));
        assert!(store.list_pipelines(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_required_failure_fails_fast() {
        let store = MemoryStore::new();
        let enqueued = enqueue(
            &store,
            &CoordinatorConfig::default(),
            request(vec![
                job_def("build", &[]),
                job_def("lint", &[]),
                job_def("deploy", &["build"]),
            ]),
        )
        .await
        .unwrap();
        let build = enqueued.job_ids[0];

        set_status(&store, build, JobStatus::Failed).await;
        let pipeline = reevaluate(&store, enqueued.pipeline_id, Utc::now())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(pipeline.status, PipelineStatus::Failed);
        assert_eq!(pipeline.failed_job_id, Some(build));
        assert!(pipeline.completed_at.is_some());

        let jobs = store.jobs_for_pipeline(enqueued.pipeline_id).await.unwrap();
        assert_eq!(jobs[1].status, JobStatus::Canceled);
        assert_eq!(jobs[2].status, JobStatus::Canceled);
    }

    #[tokio::test]
    async fn test_optional_failure_cancels_dependents_only() {
        let store = MemoryStore::new();
        let mut flaky = job_def("flaky", &[]);
        flaky.required = false;
        let mut report = job_def("report", &["flaky"]);
        report.required = false;

        let enqueued = enqueue(
            &store,
            &CoordinatorConfig::default(),
            request(vec![job_def("build", &[]), flaky, report]),
        )
        .await
        .unwrap();

        set_status(&store, enqueued.job_ids[1], JobStatus::Failed).await;
        let pipeline = reevaluate(&store, enqueued.pipeline_id, Utc::now())
            .await
            .unwrap()
            .unwrap();

        let jobs = store.jobs_for_pipeline(enqueued.pipeline_id).await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Pending);
        assert_eq!(jobs[2].status, JobStatus::Canceled);
        assert_eq!(pipeline.status, PipelineStatus::Running);

        set_status(&store, enqueued.job_ids[0], JobStatus::Succeeded).await;
        let pipeline = reevaluate(&store, enqueued.pipeline_id, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pipeline.status, PipelineStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_cancel_pending_pipeline() {
        let store = MemoryStore::new();
        let enqueued = enqueue(
            &store,
            &CoordinatorConfig::default(),
            request(vec![job_def("build", &[])]),
        )
        .await
        .unwrap();

        let pipeline = cancel_pipeline(&store, enqueued.pipeline_id).await.unwrap();
        assert_eq!(pipeline.status, PipelineStatus::Canceled);
        assert!(pipeline.cancel_requested);

        // Already finished: no-op
        let again = cancel_pipeline(&store, enqueued.pipeline_id).await.unwrap();
        assert_eq!(again.status, PipelineStatus::Canceled);
    }

    #[tokio::test]
    async fn test_cancel_unknown_pipeline() {
        let store = MemoryStore::new();
        let result = cancel_pipeline(&store, Uuid::new_v4()).await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }
}
