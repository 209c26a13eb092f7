//! Job API Handlers
//!
//! HTTP endpoints for job queries and agent status reports.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use keel_core::domain::job::{Job, JobStatus};
use keel_core::domain::log::LogEntry;
use keel_core::dto::job::{StatusAck, StatusReport};
use serde::Deserialize;
use uuid::Uuid;

use super::AppState;
use super::auth::AgentAuth;
use crate::api::error::ApiResult;
use crate::service::job_service;

#[derive(Debug, Deserialize)]
pub struct JobQuery {
    pub status: Option<JobStatus>,
}

// =============================================================================
// Job Query Endpoints
// =============================================================================

/// GET /api/jobs
/// List jobs, oldest first
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobQuery>,
) -> ApiResult<Json<Vec<Job>>> {
    tracing::debug!("Listing jobs (status: {:?})", query.status);

    let jobs = job_service::list_jobs(state.store.as_ref(), query.status).await?;
    Ok(Json(jobs))
}

/// GET /api/jobs/{id}
pub async fn get_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Job>> {
    tracing::debug!("Getting job: {}", id);

    let job = job_service::get_job(state.store.as_ref(), id).await?;
    Ok(Json(job))
}

/// GET /api/jobs/{id}/logs
pub async fn get_job_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<LogEntry>>> {
    let logs = job_service::get_job_logs(state.store.as_ref(), id).await?;
    Ok(Json(logs))
}

// =============================================================================
// Agent Reports
// =============================================================================

/// POST /api/jobs/{id}/status
/// Status transition or progress report from the holding agent
pub async fn report_status(
    State(state): State<AppState>,
    AgentAuth(agent): AgentAuth,
    Path(id): Path<Uuid>,
    Json(report): Json<StatusReport>,
) -> ApiResult<Json<StatusAck>> {
    tracing::debug!(
        job_id = %id,
        agent_id = %agent.id,
        "Status report: {} ({} log line(s))",
        report.status,
        report.logs.len()
    );

    let ack = job_service::report_status(state.store.as_ref(), &agent, id, report).await?;
    Ok(Json(ack))
}
