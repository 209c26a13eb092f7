//! Agent Service
//!
//! Business logic for agent registration, authentication and heartbeats.

use chrono::Utc;
use keel_core::domain::agent::{Agent, AgentStatus};
use keel_core::domain::capability;
use keel_core::dto::agent::{AgentSummary, HeartbeatResponse, RegisterAgent, Registration};
use uuid::Uuid;

use super::{Result, ServiceError, sweep_service};
use crate::config::CoordinatorConfig;
use crate::repository::Store;

const MAX_AGENT_ID_LENGTH: usize = 255;

/// Register an agent, replacing any previous registration with the same id.
///
/// A fresh token is issued on every call. Jobs claimed by the previous
/// incarnation go back to the queue.
pub async fn register(
    store: &dyn Store,
    config: &CoordinatorConfig,
    req: RegisterAgent,
) -> Result<Registration> {
    validate_registration(&req)?;

    let now = Utc::now();
    let id = req.agent_id.trim().to_string();
    let previous = store.get_agent(&id).await?;

    let agent = Agent {
        id,
        token: Uuid::new_v4(),
        capabilities: capability::normalize(&req.capabilities),
        address: req.address,
        max_concurrent_jobs: req.max_concurrent_jobs,
        registered_at: now,
        last_heartbeat_at: now,
        status: AgentStatus::Online,
    };

    store.upsert_agent(&agent).await?;

    if previous.is_some() {
        let released =
            sweep_service::release_jobs(store, &agent.id, now, "agent re-registered").await?;
        tracing::info!(
            agent_id = %agent.id,
            "Agent re-registered; {} previous claim(s) released",
            released
        );
    } else {
        tracing::info!(
            agent_id = %agent.id,
            "Agent registered with capabilities [{}], {} slot(s)",
            agent.capabilities.join(", "),
            agent.max_concurrent_jobs
        );
    }

    Ok(Registration {
        agent_id: agent.id,
        token: agent.token,
        heartbeat_interval_seconds: config.heartbeat_interval_seconds,
        heartbeat_timeout_seconds: config.heartbeat_timeout_seconds,
    })
}

/// Resolve a bearer token to its agent
pub async fn authenticate(store: &dyn Store, token: Uuid) -> Result<Agent> {
    store
        .find_agent_by_token(token)
        .await?
        .ok_or(ServiceError::UnknownAgent)
}

/// Record a heartbeat and return the held jobs the agent must cancel
pub async fn heartbeat(store: &dyn Store, agent: &Agent) -> Result<HeartbeatResponse> {
    if !store.touch_agent(&agent.id, Utc::now()).await? {
        return Err(ServiceError::UnknownAgent);
    }
    if agent.status == AgentStatus::Unreachable {
        tracing::info!(agent_id = %agent.id, "Agent is back online");
    }

    let cancel_jobs = store
        .jobs_held_by(&agent.id)
        .await?
        .into_iter()
        .filter(|job| job.cancel_requested_at.is_some())
        .map(|job| job.id)
        .collect();

    Ok(HeartbeatResponse { cancel_jobs })
}

/// List all agents with their active job counts
pub async fn list_agents(store: &dyn Store) -> Result<Vec<AgentSummary>> {
    let agents = store.list_agents().await?;
    let mut summaries = Vec::with_capacity(agents.len());
    for agent in agents {
        let active = store.jobs_held_by(&agent.id).await?.len() as u32;
        summaries.push(AgentSummary::new(agent, active));
    }
    Ok(summaries)
}

/// Get an agent by ID
pub async fn get_agent(store: &dyn Store, id: &str) -> Result<AgentSummary> {
    let agent = store
        .get_agent(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("agent '{}'", id)))?;
    let active = store.jobs_held_by(id).await?.len() as u32;
    Ok(AgentSummary::new(agent, active))
}

/// Remove an agent, requeueing whatever it held
pub async fn delete_agent(store: &dyn Store, id: &str) -> Result<()> {
    if store.get_agent(id).await?.is_none() {
        return Err(ServiceError::NotFound(format!("agent '{}'", id)));
    }

    sweep_service::release_jobs(store, id, Utc::now(), "agent removed").await?;
    store.delete_agent(id).await?;

    tracing::info!(agent_id = %id, "Agent removed");
    Ok(())
}

// =============================================================================
// Validation
// =============================================================================

fn validate_registration(req: &RegisterAgent) -> Result<()> {
    let id = req.agent_id.trim();
    if id.is_empty() {
        return Err(ServiceError::InvalidRegistration(
            "agent_id cannot be empty".to_string(),
        ));
    }
    if id.len() > MAX_AGENT_ID_LENGTH {
        return Err(ServiceError::InvalidRegistration(format!(
            "agent_id exceeds {} characters",
            MAX_AGENT_ID_LENGTH
        )));
    }
    if req.max_concurrent_jobs == 0 {
        return Err(ServiceError::InvalidRegistration(
            "max_concurrent_jobs must be at least 1".to_string(),
        ));
    }
    if let Some(tag) = req
        .capabilities
        .iter()
        .map(|tag| tag.trim())
        .find(|tag| !capability::is_valid_tag(tag))
    {
        return Err(ServiceError::InvalidRegistration(format!(
            "invalid capability tag '{}'",
            tag
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryStore;
    use keel_core::domain::agent::AgentAddress;

    fn request(id: &str, capabilities: &[&str]) -> RegisterAgent {
        RegisterAgent {
            agent_id: id.to_string(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            address: AgentAddress::default(),
            max_concurrent_jobs: 2,
        }
    }

    #[tokio::test]
    async fn test_register_and_authenticate() {
        let store = MemoryStore::new();
        let config = CoordinatorConfig::default();

        let registration = register(&store, &config, request("a1", &["linux", "docker", "linux"]))
            .await
            .unwrap();
        assert_eq!(registration.heartbeat_interval_seconds, 10);

        let agent = authenticate(&store, registration.token).await.unwrap();
        assert_eq!(agent.id, "a1");
        assert_eq!(agent.capabilities, vec!["docker", "linux"]);
    }

    #[tokio::test]
    async fn test_reregistration_rotates_token() {
        let store = MemoryStore::new();
        let config = CoordinatorConfig::default();

        let first = register(&store, &config, request("a1", &[])).await.unwrap();
        let second = register(&store, &config, request("a1", &["gpu"])).await.unwrap();

        assert_ne!(first.token, second.token);
        assert!(matches!(
            authenticate(&store, first.token).await,
            Err(ServiceError::UnknownAgent)
        ));
        let agent = authenticate(&store, second.token).await.unwrap();
        assert_eq!(agent.capabilities, vec!["gpu"]);
        assert_eq!(list_agents(&store).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_input() {
        let store = MemoryStore::new();
        let config = CoordinatorConfig::default();

        for req in [
            request("", &[]),
            request("a1", &["Bad Tag"]),
            RegisterAgent {
                max_concurrent_jobs: 0,
                ..request("a1", &[])
            },
        ] {
            let result = register(&store, &config, req).await;
            assert!(matches!(result, Err(ServiceError::InvalidRegistration(_))));
        }
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let store = MemoryStore::new();
        let result = authenticate(&store, Uuid::new_v4()).await;
        assert!(matches!(result, Err(ServiceError::UnknownAgent)));
    }

    #[tokio::test]
    async fn test_delete_agent() {
        let store = MemoryStore::new();
        let registration = register(&store, &CoordinatorConfig::default(), request("a1", &[]))
            .await
            .unwrap();

        delete_agent(&store, "a1").await.unwrap();
        assert!(authenticate(&store, registration.token).await.is_err());
        assert!(matches!(
            delete_agent(&store, "a1").await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
