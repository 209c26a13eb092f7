//! Agent API Handlers
//!
//! Agent RPCs (registration, heartbeat, claim) and the agent registry queries.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use keel_core::dto::agent::{AgentSummary, HeartbeatResponse, RegisterAgent, Registration};
use keel_core::dto::job::ClaimResponse;

use super::AppState;
use super::auth::AgentAuth;
use crate::api::error::ApiResult;
use crate::service::{agent_service, job_service};

// =============================================================================
// Agent RPC
// =============================================================================

/// POST /api/agents/register
/// Register an agent and issue its bearer token
pub async fn register_agent(
    State(state): State<AppState>,
    Json(req): Json<RegisterAgent>,
) -> ApiResult<Json<Registration>> {
    tracing::info!("Registering agent: {}", req.agent_id);

    let config = state.config.snapshot().await;
    let registration = agent_service::register(state.store.as_ref(), &config, req).await?;
    Ok(Json(registration))
}

/// POST /api/agents/heartbeat
pub async fn heartbeat(
    State(state): State<AppState>,
    AgentAuth(agent): AgentAuth,
) -> ApiResult<Json<HeartbeatResponse>> {
    tracing::trace!(agent_id = %agent.id, "Heartbeat");

    let response = agent_service::heartbeat(state.store.as_ref(), &agent).await?;
    Ok(Json(response))
}

/// POST /api/agents/claim
/// Claim the next job the agent is eligible for, if any
pub async fn claim_job(
    State(state): State<AppState>,
    AgentAuth(agent): AgentAuth,
) -> ApiResult<Json<ClaimResponse>> {
    let assignment = job_service::claim(state.store.as_ref(), &agent).await?;
    Ok(Json(ClaimResponse { assignment }))
}

// =============================================================================
// Agent Registry
// =============================================================================

/// GET /api/agents
pub async fn list_agents(State(state): State<AppState>) -> ApiResult<Json<Vec<AgentSummary>>> {
    tracing::debug!("Listing agents");

    let agents = agent_service::list_agents(state.store.as_ref()).await?;
    Ok(Json(agents))
}

/// GET /api/agents/{id}
pub async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<AgentSummary>> {
    let agent = agent_service::get_agent(state.store.as_ref(), &id).await?;
    Ok(Json(agent))
}

/// DELETE /api/agents/{id}
/// Remove an agent and requeue the jobs it held
pub async fn delete_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    tracing::info!("Removing agent: {}", id);

    agent_service::delete_agent(state.store.as_ref(), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
