//! Agent Repository
//!
//! Handles all database operations related to agent registrations.

use chrono::{DateTime, Utc};
use keel_core::domain::agent::{Agent, AgentAddress};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::{StoreError, StoreResult};

const AGENT_COLUMNS: &str = "id, token, capabilities, host, network, max_concurrent_jobs, \
    registered_at, last_heartbeat_at, status";

/// Create or replace an agent registration
pub async fn upsert(pool: &PgPool, agent: &Agent) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO agents (
            id, token, capabilities, host, network, max_concurrent_jobs,
            registered_at, last_heartbeat_at, status
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (id) DO UPDATE SET
            token = EXCLUDED.token,
            capabilities = EXCLUDED.capabilities,
            host = EXCLUDED.host,
            network = EXCLUDED.network,
            max_concurrent_jobs = EXCLUDED.max_concurrent_jobs,
            registered_at = EXCLUDED.registered_at,
            last_heartbeat_at = EXCLUDED.last_heartbeat_at,
            status = EXCLUDED.status
        "#,
    )
    .bind(&agent.id)
    .bind(agent.token)
    .bind(&agent.capabilities)
    .bind(&agent.address.host)
    .bind(&agent.address.network)
    .bind(agent.max_concurrent_jobs as i32)
    .bind(agent.registered_at)
    .bind(agent.last_heartbeat_at)
    .bind(agent.status.as_str())
    .execute(pool)
    .await?;

    Ok(())
}

/// Find an agent by ID
pub async fn find_by_id(pool: &PgPool, id: &str) -> StoreResult<Option<Agent>> {
    let row = sqlx::query_as::<_, AgentRow>(&format!(
        "SELECT {} FROM agents WHERE id = $1",
        AGENT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(Agent::try_from).transpose()
}

/// Find an agent by its bearer token
pub async fn find_by_token(pool: &PgPool, token: Uuid) -> StoreResult<Option<Agent>> {
    let row = sqlx::query_as::<_, AgentRow>(&format!(
        "SELECT {} FROM agents WHERE token = $1",
        AGENT_COLUMNS
    ))
    .bind(token)
    .fetch_optional(pool)
    .await?;

    row.map(Agent::try_from).transpose()
}

/// List all agents
pub async fn list_all(pool: &PgPool) -> StoreResult<Vec<Agent>> {
    let rows = sqlx::query_as::<_, AgentRow>(&format!(
        "SELECT {} FROM agents ORDER BY id ASC",
        AGENT_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Agent::try_from).collect()
}

/// Delete an agent registration
pub async fn delete(pool: &PgPool, id: &str) -> StoreResult<bool> {
    let result = sqlx::query("DELETE FROM agents WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Lock the agent row for the rest of the transaction
pub async fn lock(conn: &mut PgConnection, id: &str) -> StoreResult<bool> {
    let row: Option<String> = sqlx::query_scalar("SELECT id FROM agents WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(conn)
        .await?;

    Ok(row.is_some())
}

/// Update the last heartbeat time for an agent
pub async fn update_heartbeat(pool: &PgPool, id: &str, at: DateTime<Utc>) -> StoreResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE agents
        SET last_heartbeat_at = $1, status = 'Online'
        WHERE id = $2
        "#,
    )
    .bind(at)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Mark Online agents silent since before `cutoff` as Unreachable
pub async fn mark_stale(pool: &PgPool, cutoff: DateTime<Utc>) -> StoreResult<Vec<String>> {
    let mut ids: Vec<String> = sqlx::query_scalar(
        r#"
        UPDATE agents
        SET status = 'Unreachable'
        WHERE status = 'Online' AND last_heartbeat_at < $1
        RETURNING id
        "#,
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    ids.sort();
    Ok(ids)
}

/// Unreachable agents that still hold jobs
pub async fn unreachable_holders(pool: &PgPool) -> StoreResult<Vec<String>> {
    let ids: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT a.id FROM agents a
        WHERE a.status = 'Unreachable'
          AND EXISTS (
              SELECT 1 FROM jobs j
              WHERE j.agent_id = a.id AND j.status IN ('Claimed', 'Running')
          )
        ORDER BY a.id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

/// Set every agent's last heartbeat
pub async fn refresh_all(pool: &PgPool, at: DateTime<Utc>) -> StoreResult<u64> {
    let result = sqlx::query("UPDATE agents SET last_heartbeat_at = $1")
        .bind(at)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct AgentRow {
    id: String,
    token: Uuid,
    capabilities: Vec<String>,
    host: Option<String>,
    network: Option<String>,
    max_concurrent_jobs: i32,
    registered_at: DateTime<Utc>,
    last_heartbeat_at: DateTime<Utc>,
    status: String,
}

impl TryFrom<AgentRow> for Agent {
    type Error = StoreError;

    fn try_from(row: AgentRow) -> Result<Self, Self::Error> {
        Ok(Agent {
            id: row.id,
            token: row.token,
            capabilities: row.capabilities,
            address: AgentAddress {
                host: row.host,
                network: row.network,
            },
            max_concurrent_jobs: u32::try_from(row.max_concurrent_jobs).map_err(|_| {
                StoreError::Corrupt(format!(
                    "negative max_concurrent_jobs: {}",
                    row.max_concurrent_jobs
                ))
            })?,
            registered_at: row.registered_at,
            last_heartbeat_at: row.last_heartbeat_at,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
        })
    }
}
