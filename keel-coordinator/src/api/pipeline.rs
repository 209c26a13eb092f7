//! Pipeline API Handlers
//!
//! HTTP endpoints for pipeline intake and queries.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use keel_core::domain::job::Job;
use keel_core::domain::pipeline::{Pipeline, PipelineStatus};
use keel_core::dto::pipeline::{EnqueuePipeline, Enqueued, PipelineDetail};
use serde::Deserialize;
use uuid::Uuid;

use super::AppState;
use crate::api::error::ApiResult;
use crate::service::pipeline_service;

#[derive(Debug, Deserialize)]
pub struct PipelineQuery {
    pub status: Option<PipelineStatus>,
}

/// POST /api/pipelines
/// Enqueue a pipeline for a repository event
pub async fn enqueue_pipeline(
    State(state): State<AppState>,
    Json(req): Json<EnqueuePipeline>,
) -> ApiResult<(StatusCode, Json<Enqueued>)> {
    tracing::info!(
        "Enqueueing pipeline '{}' for {}",
        req.definition.name,
        req.trigger.repository
    );

    let config = state.config.snapshot().await;
    let enqueued = pipeline_service::enqueue(state.store.as_ref(), &config, req).await?;

    Ok((StatusCode::CREATED, Json(enqueued)))
}

/// GET /api/pipelines
/// List pipelines, newest first
pub async fn list_pipelines(
    State(state): State<AppState>,
    Query(query): Query<PipelineQuery>,
) -> ApiResult<Json<Vec<Pipeline>>> {
    tracing::debug!("Listing pipelines (status: {:?})", query.status);

    let pipelines = pipeline_service::list_pipelines(state.store.as_ref(), query.status).await?;
    Ok(Json(pipelines))
}

/// GET /api/pipelines/{id}
pub async fn get_pipeline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineDetail>> {
    tracing::debug!("Getting pipeline: {}", id);

    let detail = pipeline_service::get_pipeline(state.store.as_ref(), id).await?;
    Ok(Json(detail))
}

/// GET /api/pipelines/{id}/jobs
pub async fn list_pipeline_jobs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Job>>> {
    let jobs = pipeline_service::list_pipeline_jobs(state.store.as_ref(), id).await?;
    Ok(Json(jobs))
}

/// POST /api/pipelines/{id}/cancel
/// Cancel a pipeline; running jobs are stopped through their agents
pub async fn cancel_pipeline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Pipeline>> {
    tracing::info!("Canceling pipeline: {}", id);

    let pipeline = pipeline_service::cancel_pipeline(state.store.as_ref(), id).await?;
    Ok(Json(pipeline))
}
