//! Agent authentication
//!
//! Agent RPCs carry `Authorization: Bearer <token>` with the token issued at
//! registration.

use axum::{extract::FromRequestParts, http::header, http::request::Parts};
use keel_core::domain::agent::Agent;
use uuid::Uuid;

use super::AppState;
use crate::api::error::ApiError;
use crate::service::agent_service;

/// The authenticated agent behind a request
pub struct AgentAuth(pub Agent);

impl FromRequestParts<AppState> for AgentAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .and_then(|token| Uuid::parse_str(token.trim()).ok())
            .ok_or_else(|| ApiError::Unauthorized("missing or malformed bearer token".to_string()))?;

        let agent = agent_service::authenticate(state.store.as_ref(), token).await?;
        Ok(AgentAuth(agent))
    }
}
