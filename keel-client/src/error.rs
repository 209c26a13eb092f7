//! Error types for the Keel client

use serde::Deserialize;
use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when using the Keel client
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API returned an error status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error kind reported by the coordinator (e.g. "not_owner")
        code: Option<String>,
        /// Error message from the API
        message: String,
    },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

/// Error body returned by the coordinator
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    code: Option<String>,
}

impl ClientError {
    /// Create an API error from a status code and the raw response body
    pub fn api_error(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match serde_json::from_str::<ErrorBody>(&body) {
            Ok(parsed) => Self::ApiError {
                status,
                code: parsed.code,
                message: parsed.error,
            },
            Err(_) => Self::ApiError {
                status,
                code: None,
                message: body,
            },
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ApiError { status, .. } => Some(*status),
            Self::RequestFailed(e) => e.status().map(|s| s.as_u16()),
            Self::ParseError(_) => None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::ApiError { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// The caller no longer holds the claim on the job
    pub fn is_not_owner(&self) -> bool {
        self.code() == Some("not_owner")
    }

    /// The bearer token was not recognized; the agent must register again
    pub fn is_unknown_agent(&self) -> bool {
        self.status() == Some(401)
    }

    /// Check if this error is a client error (4xx status)
    pub fn is_client_error(&self) -> bool {
        matches!(self.status(), Some(status) if (400..500).contains(&status))
    }

    /// Check if this error is a server error (5xx status)
    pub fn is_server_error(&self) -> bool {
        matches!(self.status(), Some(status) if status >= 500)
    }

    /// Worth retrying: connection failures, timeouts, 5xx and 429.
    /// Other client errors are final.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RequestFailed(e) => {
                e.is_connect() || e.is_timeout() || e.is_request() || self.is_server_error()
            }
            Self::ApiError { status, .. } => *status >= 500 || *status == 429,
            Self::ParseError(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_coordinator_error_body() {
        let err = ClientError::api_error(409, r#"{"error":"job is held by another agent","code":"not_owner"}"#);
        assert!(err.is_not_owner());
        assert!(err.is_client_error());
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "API error (status 409): job is held by another agent");
    }

    #[test]
    fn test_plain_text_body() {
        let err = ClientError::api_error(502, "Bad Gateway");
        assert_eq!(err.code(), None);
        assert!(err.is_server_error());
        assert!(err.is_transient());
    }

    #[test]
    fn test_classification() {
        assert!(ClientError::api_error(404, "").is_not_found());
        assert!(ClientError::api_error(401, "").is_unknown_agent());
        assert!(ClientError::api_error(429, "").is_transient());
        assert!(!ClientError::api_error(400, "").is_transient());
        assert!(!ClientError::ParseError("bad".to_string()).is_transient());
    }
}
