//! Worker agent domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A registered worker agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Agent identity, chosen by the agent
    pub id: String,

    /// Bearer token issued at registration; never serialized
    #[serde(skip)]
    pub token: Uuid,

    pub capabilities: Vec<String>,
    pub address: AgentAddress,
    pub max_concurrent_jobs: u32,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub status: AgentStatus,
}

/// Reachability descriptor of an agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentAddress {
    /// Host name or address the agent runs on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Network the agent's sandboxes join
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentStatus {
    Online,
    /// Missed its heartbeat deadline; claims were returned to the queue
    Unreachable,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Online => "Online",
            AgentStatus::Unreachable => "Unreachable",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Online" => Ok(AgentStatus::Online),
            "Unreachable" => Ok(AgentStatus::Unreachable),
            other => Err(format!("unknown agent status '{}'", other)),
        }
    }
}
