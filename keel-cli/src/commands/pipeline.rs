//! Pipeline command handlers
//!
//! Handles submitting pipeline definitions for a repository event, listing
//! and inspecting pipelines, and canceling them.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use keel_client::CoordinatorClient;
use keel_core::domain::definition::TriggerEvent;
use keel_core::domain::pipeline::{Pipeline, PipelineStatus};
use keel_core::dto::pipeline::{EnqueuePipeline, PipelineDetail};
use std::path::PathBuf;

use crate::config::Config;
use crate::definition::load_definition;
use crate::id_resolver::{resolve_job_id_in_pipeline, resolve_pipeline_id};
use crate::output::{
    failure_line, job_status, pipeline_status, print_job_summary, rule, short_id, timestamp,
};
use crate::types::IdOrPrefix;

/// Pipeline subcommands
#[derive(Subcommand)]
pub enum PipelineCommands {
    /// Submit a pipeline definition for a repository event
    Submit {
        /// Path to a YAML or JSON pipeline definition
        #[arg(short, long)]
        file: PathBuf,

        /// Repository path on the source-control server (e.g. team/service)
        #[arg(short, long)]
        repository: String,

        /// Git ref that triggered the pipeline
        #[arg(long = "ref", default_value = "refs/heads/main")]
        git_ref: String,

        /// Commit to check out
        #[arg(long)]
        sha: Option<String>,

        /// Clone URL; the coordinator derives one from its network config when absent
        #[arg(long)]
        clone_url: Option<String>,

        /// Event kind reported by the source-control server
        #[arg(long, default_value = "push")]
        event: String,
    },
    /// List pipelines
    List {
        /// Only pipelines in this status
        #[arg(short, long, value_parser = parse_status::<PipelineStatus>)]
        status: Option<PipelineStatus>,
    },
    /// Get pipeline details
    Get {
        /// Pipeline ID or unambiguous prefix
        id: String,
    },
    /// Cancel a pipeline and every job that has not finished
    Cancel {
        /// Pipeline ID or unambiguous prefix
        id: String,
    },
    /// List the jobs of a pipeline
    Jobs {
        /// Pipeline ID or unambiguous prefix
        id: String,

        /// Show only this job, resolved by prefix within the pipeline
        #[arg(long)]
        job: Option<String>,
    },
}

/// Parses a status name case-insensitively ("failed", "Failed")
pub fn parse_status<T>(s: &str) -> std::result::Result<T, String>
where
    T: std::str::FromStr<Err = String>,
{
    let mut chars = s.trim().chars();
    let normalized: String = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    };
    normalized.parse()
}

/// Routes pipeline subcommands to their respective handlers
pub async fn handle_pipeline_command(command: PipelineCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        PipelineCommands::Submit {
            file,
            repository,
            git_ref,
            sha,
            clone_url,
            event,
        } => {
            let trigger = TriggerEvent {
                repository,
                git_ref,
                commit_sha: sha,
                clone_url,
                event: Some(event),
            };
            submit_pipeline(&client, file, trigger).await
        }
        PipelineCommands::List { status } => list_pipelines(&client, status).await,
        PipelineCommands::Get { id } => get_pipeline(&client, &id).await,
        PipelineCommands::Cancel { id } => cancel_pipeline(&client, &id).await,
        PipelineCommands::Jobs { id, job } => list_pipeline_jobs(&client, &id, job).await,
    }
}

/// Validate a definition locally, then enqueue it
async fn submit_pipeline(
    client: &CoordinatorClient,
    file: PathBuf,
    trigger: TriggerEvent,
) -> Result<()> {
    let definition = load_definition(&file)?;
    trigger.validate()?;

    let name = definition.name.clone();
    let job_names: Vec<String> = definition.jobs.iter().map(|j| j.name.clone()).collect();

    let enqueued = client
        .enqueue_pipeline(&EnqueuePipeline {
            definition,
            trigger,
        })
        .await?;

    println!("{}", "✓ Pipeline enqueued successfully!".green().bold());
    println!("  ID:   {}", enqueued.pipeline_id.to_string().cyan());
    println!("  Name: {}", name.bold());
    println!("  Jobs: {}", enqueued.job_ids.len());
    for (name, id) in job_names.iter().zip(&enqueued.job_ids) {
        println!("    - {} {}", name.cyan(), short_id(id).dimmed());
    }

    Ok(())
}

async fn list_pipelines(client: &CoordinatorClient, status: Option<PipelineStatus>) -> Result<()> {
    let pipelines = client.list_pipelines(status).await?;

    if pipelines.is_empty() {
        println!("{}", "No pipelines found.".yellow());
    } else {
        println!(
            "{}",
            format!("Found {} pipeline(s):", pipelines.len()).bold()
        );
        println!();
        for pipeline in pipelines {
            print_pipeline_summary(&pipeline);
        }
    }

    Ok(())
}

async fn get_pipeline(client: &CoordinatorClient, id: &str) -> Result<()> {
    let uuid = resolve_pipeline_id(client, &IdOrPrefix::parse(id)).await?;
    let detail = client.get_pipeline(uuid).await?;

    print_pipeline_details(&detail);

    Ok(())
}

async fn cancel_pipeline(client: &CoordinatorClient, id: &str) -> Result<()> {
    let uuid = resolve_pipeline_id(client, &IdOrPrefix::parse(id)).await?;
    let pipeline = client.cancel_pipeline(uuid).await?;

    if pipeline.status.is_terminal() && pipeline.status != PipelineStatus::Canceled {
        println!(
            "{}",
            format!("Pipeline {} already finished as {}.", uuid, pipeline.status).yellow()
        );
    } else {
        println!(
            "{}",
            format!("✓ Cancellation requested for pipeline {}", uuid)
                .green()
                .bold()
        );
        println!("  Status: {}", pipeline_status(pipeline.status));
        println!(
            "  {}",
            "Running jobs stop when their agents next check in.".dimmed()
        );
    }

    Ok(())
}

async fn list_pipeline_jobs(
    client: &CoordinatorClient,
    id: &str,
    job: Option<String>,
) -> Result<()> {
    let pipeline_id = resolve_pipeline_id(client, &IdOrPrefix::parse(id)).await?;

    if let Some(job) = job {
        let job_id =
            resolve_job_id_in_pipeline(client, pipeline_id, &IdOrPrefix::parse(&job)).await?;
        let job = client.get_job(job_id).await?;
        print_job_summary(&job);
        return Ok(());
    }

    let jobs = client.list_pipeline_jobs(pipeline_id).await?;

    if jobs.is_empty() {
        println!(
            "{}",
            format!("No jobs found for pipeline {}.", pipeline_id).yellow()
        );
    } else {
        println!(
            "{}",
            format!("Found {} job(s) for pipeline {}:", jobs.len(), pipeline_id).bold()
        );
        println!();
        for job in jobs {
            print_job_summary(&job);
        }
    }

    Ok(())
}

fn print_pipeline_summary(pipeline: &Pipeline) {
    println!("  {} {}", "▸".cyan(), pipeline.name.bold());
    println!("    ID:      {}", pipeline.id.to_string().dimmed());
    println!("    Status:  {}", pipeline_status(pipeline.status));
    println!(
        "    Trigger: {}",
        format!("{}@{}", pipeline.trigger.repository, pipeline.trigger.git_ref).dimmed()
    );
    println!("    Created: {}", timestamp(&pipeline.created_at).dimmed());
    println!();
}

fn print_pipeline_details(detail: &PipelineDetail) {
    let pipeline = &detail.pipeline;
    let trigger = &pipeline.trigger;

    println!("{}", "Pipeline Details:".bold());
    println!("  ID:          {}", pipeline.id.to_string().cyan());
    println!("  Name:        {}", pipeline.name.bold());
    if let Some(desc) = &pipeline.description {
        println!("  Description: {}", desc);
    }
    println!("  Status:      {}", pipeline_status(pipeline.status));
    if pipeline.cancel_requested && !pipeline.status.is_terminal() {
        println!("  {}", "Cancellation requested".yellow());
    }
    println!("  Repository:  {}", trigger.repository);
    println!("  Ref:         {}", trigger.git_ref);
    if let Some(sha) = &trigger.commit_sha {
        println!("  Commit:      {}", sha);
    }
    println!("  Created:     {}", timestamp(&pipeline.created_at));
    if let Some(completed) = &pipeline.completed_at {
        println!("  Completed:   {}", timestamp(completed));
    }

    println!("\n{}", "Jobs:".bold());
    println!("{}", rule());
    for job in &detail.jobs {
        let marker = if pipeline.failed_job_id == Some(job.id) {
            "✗".red()
        } else {
            "▸".cyan()
        };
        let optional = if job.required { "" } else { " (optional)" };
        println!(
            "  {} {:<24} {} {}{}",
            marker,
            job.name,
            job_status(job.status),
            short_id(&job.id).dimmed(),
            optional.dimmed()
        );
        if let Some(failure) = &job.failure {
            println!("      {}", failure_line(failure).red());
        }
    }
    println!("{}", rule());
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::domain::job::JobStatus;

    #[test]
    fn test_parse_status_any_case() {
        assert_eq!(
            parse_status::<PipelineStatus>("failed").unwrap(),
            PipelineStatus::Failed
        );
        assert_eq!(
            parse_status::<PipelineStatus>("RUNNING").unwrap(),
            PipelineStatus::Running
        );
        assert_eq!(parse_status::<JobStatus>("claimed").unwrap(), JobStatus::Claimed);
    }

    #[test]
    fn test_parse_status_rejects_unknown() {
        assert!(parse_status::<PipelineStatus>("done").is_err());
        assert!(parse_status::<JobStatus>("").is_err());
    }
}
