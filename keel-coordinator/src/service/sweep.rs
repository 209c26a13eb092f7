//! Sweep Service
//!
//! Periodic recovery: marks silent agents Unreachable, requeues what they
//! held, forces overdue cancellations and fails Running jobs that stopped
//! reporting progress.

use chrono::{DateTime, TimeDelta, Utc};
use keel_core::domain::job::{Job, JobFailure, JobStatus};
use keel_core::domain::log::LogEntry;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

use super::{Result, pipeline_service};
use crate::config::{ConfigHandle, CoordinatorConfig};
use crate::repository::{Expected, Store};

/// What a sweep pass changed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Agents newly marked Unreachable
    pub unreachable_agents: Vec<String>,
    pub requeued_jobs: usize,
    pub canceled_jobs: usize,
    pub timed_out_jobs: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.unreachable_agents.is_empty()
            && self.requeued_jobs == 0
            && self.canceled_jobs == 0
            && self.timed_out_jobs == 0
    }
}

/// Give back every job the agent holds.
///
/// Jobs with a pending cancellation are canceled outright; the rest return
/// to Pending with a bumped attempt counter. Returns the number of jobs
/// released.
pub async fn release_jobs(
    store: &dyn Store,
    agent_id: &str,
    now: DateTime<Utc>,
    reason: &str,
) -> Result<usize> {
    let held = store.jobs_held_by(agent_id).await?;
    let mut released = 0;
    let mut pipelines = BTreeSet::new();

    for job in &held {
        let (next, log) = if job.cancel_requested_at.is_some() {
            (
                finish(job, JobStatus::Canceled, now),
                LogEntry::warning(format!("Canceled: {}", reason)),
            )
        } else {
            let next = requeue(job);
            let log = LogEntry::warning(format!(
                "Requeued: {} (attempt {})",
                reason, next.attempt
            ));
            (next, log)
        };

        if store
            .update_job_if(&next, Expected::from_job(job), &[log])
            .await?
        {
            tracing::warn!(
                job_id = %job.id,
                agent_id = %agent_id,
                "Job '{}' released ({}): {} -> {}",
                job.name,
                reason,
                job.status,
                next.status
            );
            released += 1;
            pipelines.insert(job.pipeline_id);
        }
    }

    reevaluate_all(store, pipelines, now).await?;
    Ok(released)
}

/// Run one sweep pass at `now`
pub async fn run_sweep_once(
    store: &dyn Store,
    config: &CoordinatorConfig,
    now: DateTime<Utc>,
) -> Result<SweepReport> {
    let mut report = SweepReport::default();

    // ===== Agent staleness =====

    if let Some(cutoff) = cutoff(now, config.heartbeat_timeout_seconds) {
        report.unreachable_agents = store.mark_stale_agents(cutoff).await?;
        for agent_id in &report.unreachable_agents {
            tracing::warn!(agent_id = %agent_id, "Agent missed its heartbeat; marked Unreachable");
        }
    }

    for agent_id in store.unreachable_holders().await? {
        report.requeued_jobs += release_jobs(store, &agent_id, now, "agent unreachable").await?;
    }

    // ===== Overdue cancellations and stalled jobs =====

    let cancel_cutoff = cutoff(now, config.cancel_grace_seconds);
    let progress_cutoff = cutoff(now, config.job_progress_timeout_seconds);
    let mut pipelines = BTreeSet::new();

    let mut active = store.list_jobs(Some(JobStatus::Claimed)).await?;
    active.extend(store.list_jobs(Some(JobStatus::Running)).await?);

    for job in &active {
        let overdue_cancel = job
            .cancel_requested_at
            .zip(cancel_cutoff)
            .is_some_and(|(requested, cutoff)| requested < cutoff);

        let (next, log) = if overdue_cancel {
            (
                finish(job, JobStatus::Canceled, now),
                LogEntry::warning("Canceled: agent did not confirm within the grace period"),
            )
        } else if is_stalled(job, progress_cutoff) {
            let message = format!(
                "no progress reported for {}s",
                config.job_progress_timeout_seconds
            );
            let mut next = finish(job, JobStatus::Failed, now);
            next.failure = Some(JobFailure::timeout(message.clone(), None));
            (next, LogEntry::error(format!("Failed: {}", message)))
        } else {
            continue;
        };

        if store
            .update_job_if(&next, Expected::from_job(job), &[log])
            .await?
        {
            tracing::warn!(job_id = %job.id, "Job '{}' {} -> {}", job.name, job.status, next.status);
            if next.status == JobStatus::Failed {
                report.timed_out_jobs += 1;
            } else {
                report.canceled_jobs += 1;
            }
            pipelines.insert(job.pipeline_id);
        }
    }

    reevaluate_all(store, pipelines, now).await?;
    Ok(report)
}

/// Sweep forever, re-reading the interval from the active configuration
pub async fn run(store: Arc<dyn Store>, config: Arc<ConfigHandle>) {
    loop {
        let snapshot = config.snapshot().await;
        tokio::time::sleep(snapshot.sweep_interval()).await;

        match run_sweep_once(store.as_ref(), &snapshot, Utc::now()).await {
            Ok(report) if !report.is_empty() => {
                tracing::info!(
                    "Sweep: {} agent(s) unreachable, {} requeued, {} canceled, {} timed out",
                    report.unreachable_agents.len(),
                    report.requeued_jobs,
                    report.canceled_jobs,
                    report.timed_out_jobs
                );
            }
            Ok(_) => {}
            Err(e) => tracing::error!("Sweep failed: {}", e),
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn cutoff(now: DateTime<Utc>, seconds: u64) -> Option<DateTime<Utc>> {
    let delta = TimeDelta::try_seconds(i64::try_from(seconds).ok()?)?;
    now.checked_sub_signed(delta)
}

/// Running with no report since `cutoff` and no cancellation in flight
fn is_stalled(job: &Job, cutoff: Option<DateTime<Utc>>) -> bool {
    if job.status != JobStatus::Running || job.cancel_requested_at.is_some() {
        return false;
    }
    let last = job.last_progress_at.or(job.started_at).or(job.claimed_at);
    last.zip(cutoff).is_some_and(|(last, cutoff)| last < cutoff)
}

fn finish(job: &Job, status: JobStatus, now: DateTime<Utc>) -> Job {
    let mut next = job.clone();
    next.status = status;
    next.completed_at = Some(now);
    next
}

fn requeue(job: &Job) -> Job {
    let mut next = job.clone();
    next.status = JobStatus::Pending;
    next.agent_id = None;
    next.attempt += 1;
    next.claimed_at = None;
    next.started_at = None;
    next.last_progress_at = None;
    next.failure = None;
    next
}

async fn reevaluate_all(
    store: &dyn Store,
    pipelines: BTreeSet<Uuid>,
    now: DateTime<Utc>,
) -> Result<()> {
    for pipeline_id in pipelines {
        pipeline_service::reevaluate(store, pipeline_id, now).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_job(last_progress_at: DateTime<Utc>) -> Job {
        Job {
            id: Uuid::new_v4(),
            pipeline_id: Uuid::new_v4(),
            name: "build".to_string(),
            position: 0,
            needs: vec![],
            required: true,
            required_capabilities: vec![],
            steps: vec![],
            image: None,
            resources: Default::default(),
            timeout_seconds: None,
            status: JobStatus::Running,
            agent_id: Some("a1".to_string()),
            attempt: 1,
            enqueued_at: last_progress_at,
            claimed_at: Some(last_progress_at),
            started_at: Some(last_progress_at),
            completed_at: None,
            last_progress_at: Some(last_progress_at),
            cancel_requested_at: None,
            failure: None,
        }
    }

    #[test]
    fn test_cutoff() {
        let now = Utc::now();
        assert_eq!(cutoff(now, 30), Some(now - TimeDelta::seconds(30)));
        assert_eq!(cutoff(now, u64::MAX), None);
    }

    #[test]
    fn test_is_stalled() {
        let now = Utc::now();
        let cutoff = cutoff(now, 60);

        assert!(is_stalled(&running_job(now - TimeDelta::seconds(61)), cutoff));
        assert!(!is_stalled(&running_job(now - TimeDelta::seconds(10)), cutoff));

        let mut canceling = running_job(now - TimeDelta::seconds(61));
        canceling.cancel_requested_at = Some(now);
        assert!(!is_stalled(&canceling, cutoff));

        let mut claimed = running_job(now - TimeDelta::seconds(61));
        claimed.status = JobStatus::Claimed;
        assert!(!is_stalled(&claimed, cutoff));
    }

    #[test]
    fn test_requeue_resets_claim() {
        let job = running_job(Utc::now());
        let next = requeue(&job);
        assert_eq!(next.status, JobStatus::Pending);
        assert_eq!(next.agent_id, None);
        assert_eq!(next.attempt, 2);
        assert!(next.started_at.is_none());
        assert!(next.last_progress_at.is_none());
    }
}
