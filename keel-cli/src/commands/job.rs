//! Job command handlers
//!
//! Handles listing jobs, viewing details and accessing logs.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use keel_client::CoordinatorClient;
use keel_core::domain::job::{Job, JobStatus};
use std::time::Duration;
use uuid::Uuid;

use super::pipeline::parse_status;
use crate::config::Config;
use crate::id_resolver::resolve_job_id;
use crate::output::{
    failure_line, job_status, needs_list, print_job_summary, print_log_entry, rule, timestamp,
};
use crate::types::IdOrPrefix;

const FOLLOW_INTERVAL: Duration = Duration::from_secs(2);

/// Job subcommands
#[derive(Subcommand)]
pub enum JobCommands {
    /// List jobs across all pipelines
    List {
        /// Only jobs in this status
        #[arg(short, long, value_parser = parse_status::<JobStatus>)]
        status: Option<JobStatus>,
    },
    /// Get job details
    Get {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Get job logs
    Logs {
        /// Job ID or unambiguous prefix
        id: String,

        /// Keep printing new log lines until the job finishes
        #[arg(short, long)]
        follow: bool,
    },
}

/// Routes job subcommands to their respective handlers
pub async fn handle_job_command(command: JobCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        JobCommands::List { status } => list_jobs(&client, status).await,
        JobCommands::Get { id } => get_job(&client, &id).await,
        JobCommands::Logs { id, follow } => get_job_logs(&client, &id, follow).await,
    }
}

async fn list_jobs(client: &CoordinatorClient, status: Option<JobStatus>) -> Result<()> {
    let jobs = client.list_jobs(status).await?;

    if jobs.is_empty() {
        println!("{}", "No jobs found.".yellow());
    } else {
        println!("{}", format!("Found {} job(s):", jobs.len()).bold());
        println!();
        for job in jobs {
            print_job_summary(&job);
        }
    }

    Ok(())
}

async fn get_job(client: &CoordinatorClient, id: &str) -> Result<()> {
    let uuid = resolve_job_id(client, &IdOrPrefix::parse(id)).await?;
    let job = client.get_job(uuid).await?;
    let siblings = client.list_pipeline_jobs(job.pipeline_id).await?;

    print_job_details(&job, &siblings);

    Ok(())
}

async fn get_job_logs(client: &CoordinatorClient, id: &str, follow: bool) -> Result<()> {
    let uuid = resolve_job_id(client, &IdOrPrefix::parse(id)).await?;

    let logs = client.get_job_logs(uuid).await?;

    if logs.is_empty() && !follow {
        println!("{}", "No logs found for this job.".yellow());
        return Ok(());
    }

    println!("{}", format!("Logs for job {}:", uuid).bold());
    println!("{}", rule());
    for log in &logs {
        print_log_entry(log);
    }

    if follow {
        let status = follow_logs(client, uuid, logs.len()).await?;
        println!("{}", rule());
        println!("Job finished: {}", job_status(status));
    } else {
        println!("{}", rule());
    }

    Ok(())
}

/// Polls for log lines past `printed` until the job reaches a terminal status
async fn follow_logs(
    client: &CoordinatorClient,
    job_id: Uuid,
    mut printed: usize,
) -> Result<JobStatus> {
    loop {
        let job = client.get_job(job_id).await?;
        let logs = client.get_job_logs(job_id).await?;
        for log in logs.iter().skip(printed) {
            print_log_entry(log);
        }
        printed = printed.max(logs.len());

        if job.status.is_terminal() {
            return Ok(job.status);
        }

        tokio::time::sleep(FOLLOW_INTERVAL).await;
    }
}

fn print_job_details(job: &Job, siblings: &[Job]) {
    println!("{}", "Job Details:".bold());
    println!("  ID:          {}", job.id.to_string().cyan());
    println!("  Name:        {}", job.name.bold());
    println!("  Pipeline ID: {}", job.pipeline_id.to_string().dimmed());
    println!("  Status:      {}", job_status(job.status));
    println!("  Required:    {}", if job.required { "yes" } else { "no" });
    if !job.needs.is_empty() {
        println!("  Needs:       {}", needs_list(&job.needs, siblings));
    }
    if !job.required_capabilities.is_empty() {
        println!("  Requires:    {}", job.required_capabilities.join(", "));
    }
    if let Some(image) = &job.image {
        println!("  Image:       {}", image);
    }
    if let Some(timeout) = job.timeout_seconds {
        println!("  Timeout:     {}s", timeout);
    }
    if let Some(agent) = &job.agent_id {
        println!("  Agent:       {} (attempt {})", agent, job.attempt);
    }

    println!("  Enqueued:    {}", timestamp(&job.enqueued_at));
    if let Some(claimed) = &job.claimed_at {
        println!("  Claimed:     {}", timestamp(claimed));
    }
    if let Some(started) = &job.started_at {
        println!("  Started:     {}", timestamp(started));
    }
    if let Some(completed) = &job.completed_at {
        println!("  Completed:   {}", timestamp(completed));

        if let Some(started) = job.started_at {
            let seconds = completed.signed_duration_since(started).num_seconds();
            println!("  Duration:    {}s", seconds);
        }
    }
    if job.cancel_requested_at.is_some() && !job.status.is_terminal() {
        println!("  {}", "Cancellation requested".yellow());
    }

    println!("\n{}", "Steps:".bold());
    let failed_step = job.failure.as_ref().and_then(|f| f.step);
    for (index, step) in job.steps.iter().enumerate() {
        let marker = if failed_step == Some(index as u32) {
            "✗".red()
        } else {
            "▸".cyan()
        };
        println!("  {} {} {}", marker, step.name, step.run.dimmed());
    }

    if let Some(failure) = &job.failure {
        println!("\n{}", "Failure:".bold());
        println!("  {}", failure_line(failure).red());
    }
}
