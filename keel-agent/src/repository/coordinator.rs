//! Coordinator link
//!
//! Handles communication with the coordinator for agent operations:
//! - Registering and keeping the bearer token
//! - Heartbeats
//! - Claiming jobs
//! - Reporting job status and log chunks

use async_trait::async_trait;
use keel_client::{ClientError, CoordinatorClient, Result};
use keel_core::dto::agent::{HeartbeatResponse, RegisterAgent, Registration};
use keel_core::dto::job::{Assignment, StatusAck, StatusReport};
use keel_core::dto::network::NetworkInfo;
use std::future::Future;
use std::sync::RwLock;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// Repository trait for the agent side of the coordinator API
#[async_trait]
pub trait CoordinatorLink: Send + Sync {
    /// Registers the agent; later calls use the returned token
    async fn register(&self, req: &RegisterAgent) -> Result<Registration>;

    async fn heartbeat(&self) -> Result<HeartbeatResponse>;

    /// Claims the oldest eligible job, if any
    async fn claim(&self) -> Result<Option<Assignment>>;

    /// Reports the status of a held job
    ///
    /// # Arguments
    /// * `job_id` - The job being reported
    /// * `report` - New status, log chunk and failure details
    async fn report(&self, job_id: Uuid, report: &StatusReport) -> Result<StatusAck>;

    async fn network_info(&self) -> Result<NetworkInfo>;
}

/// HTTP implementation of CoordinatorLink
pub struct HttpCoordinatorLink {
    client: CoordinatorClient,
    token: RwLock<Option<Uuid>>,
}

impl HttpCoordinatorLink {
    /// Creates a new HTTP link
    ///
    /// # Arguments
    /// * `coordinator_url` - Base URL of the coordinator (e.g., "http://localhost:8080")
    pub fn new(coordinator_url: impl Into<String>) -> Self {
        Self {
            client: CoordinatorClient::new(coordinator_url),
            token: RwLock::new(None),
        }
    }

    fn token(&self) -> Result<Uuid> {
        let token = *self.token.read().unwrap_or_else(|e| e.into_inner());
        token.ok_or_else(|| ClientError::ApiError {
            status: 401,
            code: Some("unknown_agent".to_string()),
            message: "agent is not registered".to_string(),
        })
    }
}

#[async_trait]
impl CoordinatorLink for HttpCoordinatorLink {
    async fn register(&self, req: &RegisterAgent) -> Result<Registration> {
        let registration = self.client.register_agent(req).await?;
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(registration.token);
        Ok(registration)
    }

    async fn heartbeat(&self) -> Result<HeartbeatResponse> {
        self.client.heartbeat(self.token()?).await
    }

    async fn claim(&self) -> Result<Option<Assignment>> {
        self.client.claim_job(self.token()?).await
    }

    async fn report(&self, job_id: Uuid, report: &StatusReport) -> Result<StatusAck> {
        self.client.report_status(self.token()?, job_id, report).await
    }

    async fn network_info(&self) -> Result<NetworkInfo> {
        self.client.network_info().await
    }
}

/// Backoff schedule for transient coordinator failures
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Retries `op` with exponential backoff while it fails with a transient error.
///
/// Final errors (4xx other than 429) are returned immediately.
pub async fn with_retry<T, F, Fut>(what: &str, backoff: Backoff, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    let mut delay = backoff.initial_delay;

    loop {
        attempt += 1;

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < backoff.max_attempts => {
                warn!(
                    "Failed to {} (attempt {}/{}): {}",
                    what, attempt, backoff.max_attempts, e
                );
                warn!("Retrying in {} ms...", delay.as_millis());

                tokio::time::sleep(delay).await;

                // Exponential backoff with cap
                delay = (delay * 2).min(backoff.max_delay);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> Backoff {
        Backoff {
            max_attempts: 4,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let calls = &AtomicU32::new(0);
        let result = with_retry("register", fast(), || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ClientError::api_error(503, "unavailable"))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_final_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<()> = with_retry("register", fast(), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ClientError::api_error(
                400,
                r#"{"error":"bad tag","code":"invalid_registration"}"#,
            ))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = &AtomicU32::new(0);
        let result: Result<()> = with_retry("claim", fast(), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ClientError::api_error(502, "Bad Gateway"))
        })
        .await;

        assert!(result.unwrap_err().is_server_error());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_unregistered_link_reports_unknown_agent() {
        let link = HttpCoordinatorLink::new("http://localhost:8080");
        assert!(link.token().unwrap_err().is_unknown_agent());
    }
}
