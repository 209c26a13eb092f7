//! Job runner
//!
//! Drives one claimed job from `Running` to its terminal report:
//! provision the sandbox, fetch the repository snapshot, run the steps
//! fail-fast, and report progress while they run. The sandbox is
//! destroyed exactly once whatever the outcome.

use keel_core::domain::definition::TriggerEvent;
use keel_core::domain::job::{JobFailure, JobStatus};
use keel_core::domain::log::LogEntry;
use keel_core::dto::job::{Assignment, StatusAck, StatusReport};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::repository::{Backoff, CoordinatorLink, with_retry};
use crate::sandbox::{Sandbox, SandboxProvider, SandboxSpec};
use crate::service::{InMemoryLogBuffer, LogBufferService};

/// How a job run ended on this agent
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded,
    Failed(JobFailure),
    Canceled,
    /// The agent is shutting down; nothing is reported
    Abandoned,
    /// The coordinator no longer considers this agent the holder
    Lost,
}

impl JobOutcome {
    /// Status of the final report, if one is sent
    pub fn report(&self, logs: Vec<LogEntry>) -> Option<StatusReport> {
        match self {
            JobOutcome::Succeeded => Some(StatusReport::new(JobStatus::Succeeded, logs)),
            JobOutcome::Failed(failure) => Some(StatusReport::failed(failure.clone(), logs)),
            JobOutcome::Canceled => Some(StatusReport::new(JobStatus::Canceled, logs)),
            JobOutcome::Abandoned | JobOutcome::Lost => None,
        }
    }
}

/// Executes assignments against a sandbox provider
pub struct JobRunner {
    config: Arc<Config>,
    link: Arc<dyn CoordinatorLink>,
    provider: Arc<dyn SandboxProvider>,
    backoff: Backoff,
}

impl JobRunner {
    pub fn new(
        config: Arc<Config>,
        link: Arc<dyn CoordinatorLink>,
        provider: Arc<dyn SandboxProvider>,
    ) -> Self {
        Self {
            config,
            link,
            provider,
            backoff: Backoff::default(),
        }
    }

    /// Overrides the retry schedule of status reports
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Runs one assignment to completion.
    ///
    /// `cancel` is triggered when the coordinator asks for cancellation;
    /// `shutdown` when the agent stops.
    pub async fn run(
        &self,
        assignment: Assignment,
        cancel: CancellationToken,
        shutdown: CancellationToken,
    ) -> JobOutcome {
        let job = &assignment.job;
        let job_id = job.id;
        let logs = InMemoryLogBuffer::new();

        info!(job_id = %job_id, "Starting job '{}' (attempt {})", job.name, job.attempt);
        logs.add_entry(LogEntry::info(format!(
            "Job '{}' started on agent {} (attempt {})",
            job.name, self.config.agent_id, job.attempt
        )));

        // Claimed -> Running must land before anything else is reported
        let link = &self.link;
        let report = StatusReport::new(JobStatus::Running, logs.drain());
        match with_retry("report job start", self.backoff, || link.report(job_id, &report)).await
        {
            Ok(ack) => {
                if ack.cancel_requested {
                    cancel.cancel();
                }
            }
            Err(e) if e.is_not_owner() => {
                warn!(job_id = %job_id, "Job was reassigned before it started: {}", e);
                return JobOutcome::Lost;
            }
            Err(e) => {
                error!(job_id = %job_id, "Failed to report job start: {}", e);
                return JobOutcome::Abandoned;
            }
        }

        let sandbox = match self.provision(&assignment).await {
            Ok(sandbox) => sandbox,
            Err(e) => {
                let message = format!("failed to provision sandbox: {:#}", e);
                error!(job_id = %job_id, "{}", message);
                logs.add_entry(LogEntry::error(message.clone()));
                let outcome = JobOutcome::Failed(JobFailure::sandbox(message));
                self.finish(job_id, &logs, &outcome).await;
                return outcome;
            }
        };

        let outcome = self
            .supervise(&assignment, sandbox.as_ref(), &logs, &cancel, &shutdown)
            .await;

        if let Err(e) = sandbox.destroy().await {
            warn!(job_id = %job_id, "Failed to destroy sandbox {}: {:#}", sandbox.id(), e);
            logs.add_entry(LogEntry::warning(format!("Failed to destroy sandbox: {}", e)));
        }

        self.finish(job_id, &logs, &outcome).await;
        info!(job_id = %job_id, "Job finished: {:?}", outcome);
        outcome
    }

    async fn provision(&self, assignment: &Assignment) -> anyhow::Result<Box<dyn Sandbox>> {
        let spec = SandboxSpec::for_job(assignment, &self.config)?;
        debug!(job_id = %spec.job_id, "Creating {} sandbox {}", self.provider.name(), spec.name);
        self.provider.create(&spec).await
    }

    /// Races the execution against cancellation, timeout, shutdown and loss of the claim
    async fn supervise(
        &self,
        assignment: &Assignment,
        sandbox: &dyn Sandbox,
        logs: &InMemoryLogBuffer,
        cancel: &CancellationToken,
        shutdown: &CancellationToken,
    ) -> JobOutcome {
        let job = &assignment.job;
        let progress_stop = CancellationToken::new();
        let lost = CancellationToken::new();

        let progress = tokio::spawn(report_progress(
            Arc::clone(&self.link),
            job.id,
            logs.clone(),
            self.config.progress_interval,
            cancel.clone(),
            lost.clone(),
            progress_stop.clone(),
        ));

        // Index + 1 of the step in flight, 0 before the first step
        let current_step = AtomicU32::new(0);
        let timeout = self.config.timeout_for(job.timeout_seconds);

        let outcome = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!(job_id = %job.id, "Agent shutting down, abandoning job");
                JobOutcome::Abandoned
            }
            _ = lost.cancelled() => JobOutcome::Lost,
            _ = cancel.cancelled() => {
                logs.add_entry(LogEntry::warning("Job canceled"));
                JobOutcome::Canceled
            }
            _ = tokio::time::sleep(timeout) => {
                let step = current_step.load(Ordering::SeqCst).checked_sub(1);
                let message = format!("job exceeded its timeout of {}s", timeout.as_secs());
                logs.add_entry(LogEntry::error(message.clone()));
                JobOutcome::Failed(JobFailure::timeout(message, step))
            }
            outcome = self.execute(assignment, sandbox, logs, &current_step) => outcome,
        };

        progress_stop.cancel();
        if let Err(e) = progress.await {
            warn!(job_id = %job.id, "Progress reporter panicked: {}", e);
        }

        if lost.is_cancelled() && outcome != JobOutcome::Abandoned {
            return JobOutcome::Lost;
        }
        outcome
    }

    async fn execute(
        &self,
        assignment: &Assignment,
        sandbox: &dyn Sandbox,
        logs: &InMemoryLogBuffer,
        current_step: &AtomicU32,
    ) -> JobOutcome {
        let trigger = &assignment.trigger;

        if let Some(clone_url) = &trigger.clone_url {
            let url = match self.config.host_aliases.rewrite_url(clone_url) {
                Ok(url) => url,
                Err(e) => {
                    let message = format!("invalid clone URL: {}", e);
                    logs.add_entry(LogEntry::error(message.clone()));
                    return JobOutcome::Failed(JobFailure::sandbox(message));
                }
            };

            logs.add_entry(LogEntry::info(format!(
                "Fetching {} at {}",
                trigger.repository,
                trigger.commit_sha.as_deref().unwrap_or(&trigger.git_ref)
            )));

            let sink = |line: String| logs.add_entry(LogEntry::info(line));
            let failure = match sandbox.exec(&checkout_command(&url, trigger), &sink).await {
                Ok(0) => None,
                Ok(code) => Some(format!("repository checkout exited with code {}", code)),
                Err(e) => Some(format!("repository checkout failed: {:#}", e)),
            };
            if let Some(message) = failure {
                logs.add_entry(LogEntry::error(message.clone()));
                return JobOutcome::Failed(JobFailure::sandbox(message));
            }
        }

        for (index, step) in assignment.job.steps.iter().enumerate() {
            let index = index as u32;
            current_step.store(index + 1, Ordering::SeqCst);

            logs.add_entry(LogEntry::info(format!("Running step '{}'", step.name)).for_step(index));

            let sink = |line: String| logs.add_entry(LogEntry::info(line).for_step(index));
            match sandbox.exec(&step.run, &sink).await {
                Ok(0) => {
                    logs.add_entry(
                        LogEntry::info(format!("Step '{}' succeeded", step.name)).for_step(index),
                    );
                }
                Ok(code) => {
                    let failure = JobFailure::step_failed(index, &step.name, code);
                    logs.add_entry(LogEntry::error(failure.message.clone()).for_step(index));
                    return JobOutcome::Failed(failure);
                }
                Err(e) => {
                    let mut failure =
                        JobFailure::sandbox(format!("step '{}' could not run: {:#}", step.name, e));
                    failure.step = Some(index);
                    logs.add_entry(LogEntry::error(failure.message.clone()).for_step(index));
                    return JobOutcome::Failed(failure);
                }
            }
        }

        JobOutcome::Succeeded
    }

    /// Sends the terminal report, if the outcome has one
    async fn finish(&self, job_id: Uuid, logs: &InMemoryLogBuffer, outcome: &JobOutcome) {
        let Some(report) = outcome.report(logs.drain()) else {
            return;
        };

        let link = &self.link;
        match with_retry("report job result", self.backoff, || link.report(job_id, &report)).await
        {
            Ok(_) => {}
            Err(e) if e.is_not_owner() => {
                warn!(job_id = %job_id, "Result rejected, job was reassigned: {}", e);
            }
            Err(e) => {
                error!(job_id = %job_id, "Failed to report {}: {}", report.status, e);
            }
        }
    }
}

/// Job heartbeat: drains buffered logs into `Running` reports until stopped
async fn report_progress(
    link: Arc<dyn CoordinatorLink>,
    job_id: Uuid,
    logs: InMemoryLogBuffer,
    interval: Duration,
    cancel: CancellationToken,
    lost: CancellationToken,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let entries = logs.drain();
        let report = StatusReport::new(JobStatus::Running, entries.clone());
        match link.report(job_id, &report).await {
            Ok(StatusAck { cancel_requested, .. }) => {
                if cancel_requested && !cancel.is_cancelled() {
                    info!(job_id = %job_id, "Coordinator requested cancellation");
                    cancel.cancel();
                }
            }
            // not_owner, or the agent itself is no longer known
            Err(e) if e.is_client_error() => {
                warn!(job_id = %job_id, "Coordinator rejected progress report: {}", e);
                lost.cancel();
                break;
            }
            Err(e) => {
                debug!(job_id = %job_id, "Progress report failed, keeping logs: {}", e);
                logs.restore(entries);
            }
        }
    }
}

/// Shell command fetching the snapshot into the workspace
fn checkout_command(url: &str, trigger: &TriggerEvent) -> String {
    let url = shell_quote(url);
    match &trigger.commit_sha {
        Some(sha) => format!(
            "git clone -q {} . && git checkout -q {}",
            url,
            shell_quote(sha)
        ),
        None => format!(
            "git init -q . && git fetch -q --depth 1 {} {} && git checkout -q FETCH_HEAD",
            url,
            shell_quote(&trigger.git_ref)
        ),
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
