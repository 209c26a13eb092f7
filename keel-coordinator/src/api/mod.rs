//! API Module
//!
//! HTTP API layer for the coordinator.
//! Each submodule handles endpoints for a specific domain.

pub mod admin;
pub mod agent;
pub mod auth;
pub mod error;
pub mod health;
pub mod job;
pub mod pipeline;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::ConfigHandle;
use crate::repository::Store;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<ConfigHandle>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: Arc<ConfigHandle>) -> Self {
        Self { store, config }
    }
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Pipeline endpoints
        .route(
            "/api/pipelines",
            post(pipeline::enqueue_pipeline).get(pipeline::list_pipelines),
        )
        .route("/api/pipelines/{id}", get(pipeline::get_pipeline))
        .route("/api/pipelines/{id}/jobs", get(pipeline::list_pipeline_jobs))
        .route("/api/pipelines/{id}/cancel", post(pipeline::cancel_pipeline))
        // Job endpoints
        .route("/api/jobs", get(job::list_jobs))
        .route("/api/jobs/{id}", get(job::get_job))
        .route("/api/jobs/{id}/logs", get(job::get_job_logs))
        .route("/api/jobs/{id}/status", post(job::report_status))
        // Agent endpoints
        .route("/api/agents", get(agent::list_agents))
        .route("/api/agents/register", post(agent::register_agent))
        .route("/api/agents/heartbeat", post(agent::heartbeat))
        .route("/api/agents/claim", post(agent::claim_job))
        .route(
            "/api/agents/{id}",
            get(agent::get_agent).delete(agent::delete_agent),
        )
        // Network and admin endpoints
        .route("/api/network", get(admin::network_info))
        .route("/api/admin/reload", post(admin::reload_config))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
