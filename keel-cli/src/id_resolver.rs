//! ID resolver module
//!
//! Resolves id prefixes to full UUIDs by querying the coordinator, so users can
//! type short, unambiguous prefixes instead of full ids.

use anyhow::{Context, Result, anyhow};
use keel_client::CoordinatorClient;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Resolve a pipeline ID or prefix to a full UUID
///
/// A full UUID is returned without contacting the coordinator.
///
/// # Arguments
/// * `client` - The coordinator client used for the lookup
/// * `id_or_prefix` - The ID or prefix to resolve
///
/// # Returns
/// The resolved UUID
///
/// # Errors
/// Returns an error if:
/// - No pipeline matches the prefix
/// - Multiple pipelines match the prefix
/// - The coordinator cannot be reached
pub async fn resolve_pipeline_id(
    client: &CoordinatorClient,
    id_or_prefix: &IdOrPrefix,
) -> Result<Uuid> {
    if let Some(uuid) = id_or_prefix.as_uuid() {
        return Ok(uuid);
    }

    let pipelines = client
        .list_pipelines(None)
        .await
        .context("Failed to fetch pipelines for ID resolution")?;

    match_prefix("pipeline", pipelines.iter().map(|p| p.id), &id_or_prefix.as_str())
}

/// Resolve a job ID or prefix to a full UUID
///
/// # Arguments
/// * `client` - The coordinator client used for the lookup
/// * `id_or_prefix` - The ID or prefix to resolve
///
/// # Returns
/// The resolved UUID
pub async fn resolve_job_id(client: &CoordinatorClient, id_or_prefix: &IdOrPrefix) -> Result<Uuid> {
    if let Some(uuid) = id_or_prefix.as_uuid() {
        return Ok(uuid);
    }

    let jobs = client
        .list_jobs(None)
        .await
        .context("Failed to fetch jobs for ID resolution")?;

    match_prefix("job", jobs.iter().map(|j| j.id), &id_or_prefix.as_str())
}

/// Resolve a job ID or prefix within a specific pipeline
///
/// # Arguments
/// * `client` - The coordinator client used for the lookup
/// * `pipeline_id` - The pipeline to search
/// * `id_or_prefix` - The job ID or prefix to resolve
///
/// # Returns
/// The resolved UUID
pub async fn resolve_job_id_in_pipeline(
    client: &CoordinatorClient,
    pipeline_id: Uuid,
    id_or_prefix: &IdOrPrefix,
) -> Result<Uuid> {
    if let Some(uuid) = id_or_prefix.as_uuid() {
        return Ok(uuid);
    }

    let jobs = client
        .list_pipeline_jobs(pipeline_id)
        .await
        .context("Failed to fetch pipeline jobs for ID resolution")?;

    match_prefix("job", jobs.iter().map(|j| j.id), &id_or_prefix.as_str())
        .with_context(|| format!("in pipeline {}", pipeline_id))
}

/// Picks the single id starting with `prefix`
fn match_prefix(kind: &str, ids: impl Iterator<Item = Uuid>, prefix: &str) -> Result<Uuid> {
    let prefix = prefix.to_lowercase();
    if prefix.is_empty() {
        return Err(anyhow!("Empty {} ID", kind));
    }

    let matches: Vec<Uuid> = ids
        .filter(|id| id.to_string().starts_with(&prefix))
        .collect();

    match matches.as_slice() {
        [] => Err(anyhow!("No {} found with ID starting with '{}'", kind, prefix)),
        [id] => Ok(*id),
        _ => {
            let ids: Vec<String> = matches.iter().map(|id| id.to_string()).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple {}s: {}",
                prefix,
                kind,
                ids.join(", ")
            ))
        }
    }
}
