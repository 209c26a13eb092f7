//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::repository::StoreError;
use crate::service::ServiceError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest { code: &'static str, message: String },
    Unauthorized(String),
    Conflict { code: &'static str, message: String },
    StoreError(StoreError),
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest { code, .. } | ApiError::Conflict { code, .. } => *code,
            ApiError::Unauthorized(_) => "unknown_agent",
            ApiError::StoreError(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest { message, .. } => (StatusCode::BAD_REQUEST, message),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Conflict { message, .. } => (StatusCode::CONFLICT, message),
            ApiError::StoreError(err) => {
                tracing::error!("Store error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (
            status,
            Json(serde_json::json!({ "error": message, "code": code })),
        )
            .into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::InvalidDefinition(_) => ApiError::BadRequest {
                code: "invalid_definition",
                message,
            },
            ServiceError::InvalidTrigger(_) => ApiError::BadRequest {
                code: "invalid_trigger",
                message,
            },
            ServiceError::InvalidRegistration(_) => ApiError::BadRequest {
                code: "invalid_registration",
                message,
            },
            ServiceError::Config(_) => ApiError::BadRequest {
                code: "invalid_config",
                message,
            },
            ServiceError::UnknownAgent => ApiError::Unauthorized(message),
            ServiceError::NotOwner { .. } => ApiError::Conflict {
                code: "not_owner",
                message,
            },
            ServiceError::InvalidTransition { .. } => ApiError::Conflict {
                code: "invalid_transition",
                message,
            },
            ServiceError::NotFound(_) => ApiError::NotFound(message),
            ServiceError::Store(err) => ApiError::StoreError(err),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::StoreError(err)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_service_error_mapping() {
        let err: ApiError = ServiceError::NotOwner {
            job_id: Uuid::nil(),
            agent_id: "a1".to_string(),
        }
        .into();
        assert_eq!(err.code(), "not_owner");
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);

        let err: ApiError = ServiceError::UnknownAgent.into();
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);

        let err: ApiError = ServiceError::NotFound("job x".to_string()).into();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }
}
