//! Terminal formatting shared by the command handlers

use chrono::{DateTime, Utc};
use colored::*;
use keel_core::domain::agent::AgentStatus;
use keel_core::domain::job::{Job, JobFailure, JobStatus};
use keel_core::domain::log::{LogEntry, LogLevel};
use keel_core::domain::pipeline::PipelineStatus;

pub fn timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn rule() -> ColoredString {
    "─".repeat(80).dimmed()
}

/// Short form of an id for listings
pub fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// Colorize job status for display
pub fn job_status(status: JobStatus) -> ColoredString {
    let status_str = status.as_str();
    match status {
        JobStatus::Pending => status_str.yellow(),
        JobStatus::Claimed => status_str.blue(),
        JobStatus::Running => status_str.cyan(),
        JobStatus::Succeeded => status_str.green(),
        JobStatus::Failed => status_str.red(),
        JobStatus::Canceled => status_str.dimmed(),
    }
}

pub fn pipeline_status(status: PipelineStatus) -> ColoredString {
    let status_str = status.to_string();
    match status {
        PipelineStatus::Pending => status_str.yellow(),
        PipelineStatus::Running => status_str.cyan(),
        PipelineStatus::Succeeded => status_str.green(),
        PipelineStatus::Failed => status_str.red(),
        PipelineStatus::Canceled => status_str.dimmed(),
    }
}

pub fn agent_status(status: AgentStatus) -> ColoredString {
    let status_str = status.to_string();
    match status {
        AgentStatus::Online => status_str.green(),
        AgentStatus::Unreachable => status_str.red(),
    }
}

/// Names the jobs in `needs`, falling back to short ids for jobs not in `siblings`
pub fn needs_list(needs: &[uuid::Uuid], siblings: &[Job]) -> String {
    needs
        .iter()
        .map(|id| {
            siblings
                .iter()
                .find(|job| job.id == *id)
                .map(|job| job.name.clone())
                .unwrap_or_else(|| short_id(id))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// One line describing why a job failed
pub fn failure_line(failure: &JobFailure) -> String {
    let mut line = format!("{}: {}", failure.reason.as_str(), failure.message);
    if let Some(step) = failure.step {
        line.push_str(&format!(" (step {})", step + 1));
    }
    if let Some(code) = failure.exit_code {
        line.push_str(&format!(", exit code {}", code));
    }
    line
}

/// Print a job summary
pub fn print_job_summary(job: &Job) {
    println!(
        "  {} {} {}",
        "▸".cyan(),
        job.name.bold(),
        short_id(&job.id).dimmed()
    );
    println!("    Status:   {}", job_status(job.status));
    println!("    Pipeline: {}", job.pipeline_id.to_string().dimmed());
    if !job.needs.is_empty() {
        println!("    Needs:    {}", needs_list(&job.needs, &[]).dimmed());
    }
    if let Some(agent) = &job.agent_id {
        println!("    Agent:    {}", agent.dimmed());
    }
    println!();
}

/// Print a log entry
pub fn print_log_entry(log: &LogEntry) {
    let level_str = log.level.to_string().to_uppercase();
    let level_colored = match log.level {
        LogLevel::Debug => level_str.dimmed(),
        LogLevel::Info => level_str.cyan(),
        LogLevel::Warning => level_str.yellow(),
        LogLevel::Error => level_str.red(),
    };

    let step = log
        .step
        .map(|s| format!("[step {}] ", s + 1))
        .unwrap_or_default();

    println!(
        "{} [{}] {}{}",
        log.timestamp.format("%H:%M:%S").to_string().dimmed(),
        level_colored,
        step.dimmed(),
        log.message
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::domain::job::{FailureReason, ResourceLimits};

    fn job_named(id: uuid::Uuid, name: &str) -> Job {
        Job {
            id,
            pipeline_id: uuid::Uuid::new_v4(),
            name: name.to_string(),
            position: 0,
            needs: Vec::new(),
            required: true,
            required_capabilities: Vec::new(),
            steps: Vec::new(),
            image: None,
            resources: ResourceLimits::default(),
            timeout_seconds: None,
            status: JobStatus::Pending,
            agent_id: None,
            attempt: 1,
            enqueued_at: Utc::now(),
            claimed_at: None,
            started_at: None,
            completed_at: None,
            last_progress_at: None,
            cancel_requested_at: None,
            failure: None,
        }
    }

    #[test]
    fn test_failure_line_for_step_failure() {
        let failure = JobFailure {
            reason: FailureReason::StepFailure,
            message: "step 'test' exited with 2".to_string(),
            step: Some(1),
            exit_code: Some(2),
        };
        assert_eq!(
            failure_line(&failure),
            "StepFailure: step 'test' exited with 2 (step 2), exit code 2"
        );
    }

    #[test]
    fn test_failure_line_without_step() {
        let failure = JobFailure {
            reason: FailureReason::Sandbox,
            message: "image not found".to_string(),
            step: None,
            exit_code: None,
        };
        assert_eq!(failure_line(&failure), "Sandbox: image not found");
    }

    #[test]
    fn test_needs_list_prefers_job_names() {
        let build = uuid::Uuid::parse_str("11111111-0000-4000-8000-000000000000").unwrap();
        let lint = uuid::Uuid::parse_str("22222222-0000-4000-8000-000000000000").unwrap();

        let sibling = job_named(build, "build");

        assert_eq!(needs_list(&[build, lint], &[sibling]), "build, 22222222");
        assert_eq!(needs_list(&[lint], &[]), "22222222");
    }

    #[test]
    fn test_short_id() {
        let id = uuid::Uuid::parse_str("6f1c2a9e-0000-4000-8000-000000000000").unwrap();
        assert_eq!(short_id(&id), "6f1c2a9e");
    }
}
