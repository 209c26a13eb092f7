//! Agent DTOs
//!
//! Data transfer objects for agent registration and heartbeats.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::agent::{Agent, AgentAddress, AgentStatus};

/// Request to register an agent with the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAgent {
    /// Unique identity of the agent
    pub agent_id: String,

    /// Capability tags this agent provides
    #[serde(default)]
    pub capabilities: Vec<String>,

    #[serde(default)]
    pub address: AgentAddress,

    /// Number of jobs the agent runs at once
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: u32,
}

fn default_max_concurrent_jobs() -> u32 {
    1
}

/// Registration result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub agent_id: String,

    /// Bearer token for every subsequent agent call
    pub token: Uuid,

    /// Interval at which the coordinator expects heartbeats
    pub heartbeat_interval_seconds: u64,

    /// Silence after which the agent is considered unreachable
    pub heartbeat_timeout_seconds: u64,
}

/// Heartbeat result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    /// Jobs held by this agent that must be canceled
    pub cancel_jobs: Vec<Uuid>,
}

/// Summary information about an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSummary {
    pub id: String,
    pub capabilities: Vec<String>,
    pub address: AgentAddress,
    pub max_concurrent_jobs: u32,

    /// Jobs currently Claimed or Running on this agent
    pub active_jobs: u32,

    pub registered_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub status: AgentStatus,
}

impl AgentSummary {
    pub fn new(agent: Agent, active_jobs: u32) -> Self {
        AgentSummary {
            id: agent.id,
            capabilities: agent.capabilities,
            address: agent.address,
            max_concurrent_jobs: agent.max_concurrent_jobs,
            active_jobs,
            registered_at: agent.registered_at,
            last_heartbeat_at: agent.last_heartbeat_at,
            status: agent.status,
        }
    }
}
