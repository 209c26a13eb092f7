//! Admin API Handlers
//!
//! Network information and configuration reload.

use axum::{Json, extract::State};
use keel_core::dto::admin::ReloadResponse;
use keel_core::dto::network::NetworkInfo;

use super::AppState;
use crate::api::error::ApiResult;
use crate::service::ServiceError;

/// GET /api/network
/// Addresses agents and sandboxes use to reach the coordinator and repositories
pub async fn network_info(State(state): State<AppState>) -> Json<NetworkInfo> {
    Json(state.config.snapshot().await.network_info())
}

/// POST /api/admin/reload
/// Re-read the configuration file and swap the reloadable settings
pub async fn reload_config(State(state): State<AppState>) -> ApiResult<Json<ReloadResponse>> {
    let response = state.config.reload().await.map_err(|e| {
        tracing::warn!("Configuration reload rejected: {}", e);
        ServiceError::from(e)
    })?;
    Ok(Json(response))
}
