//! Job Repository
//!
//! Handles all database operations related to jobs.

use chrono::{DateTime, Utc};
use keel_core::domain::agent::Agent;
use keel_core::domain::job::{Job, JobFailure, JobStatus, ResourceLimits, Step};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::{Expected, StoreError, StoreResult};

const JOB_COLUMNS: &str = "id, pipeline_id, name, position, needs, required, \
    required_capabilities, steps, image, resources, timeout_seconds, status, agent_id, \
    attempt, enqueued_at, claimed_at, started_at, completed_at, last_progress_at, \
    cancel_requested_at, failure";

fn timeout_column(timeout_seconds: Option<u64>) -> StoreResult<Option<i64>> {
    timeout_seconds
        .map(|t| {
            i64::try_from(t).map_err(|_| StoreError::Corrupt(format!("timeout out of range: {}", t)))
        })
        .transpose()
}

/// Insert a new job
pub async fn insert(conn: &mut PgConnection, job: &Job) -> StoreResult<()> {
    let timeout_seconds = timeout_column(job.timeout_seconds)?;
    sqlx::query(
        r#"
        INSERT INTO jobs (
            id, pipeline_id, name, position, needs, required, required_capabilities,
            steps, image, resources, timeout_seconds, status, agent_id, attempt,
            enqueued_at, claimed_at, started_at, completed_at, last_progress_at,
            cancel_requested_at, failure
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, $17, $18, $19, $20, $21)
        "#,
    )
    .bind(job.id)
    .bind(job.pipeline_id)
    .bind(&job.name)
    .bind(job.position as i32)
    .bind(&job.needs)
    .bind(job.required)
    .bind(&job.required_capabilities)
    .bind(serde_json::to_value(&job.steps)?)
    .bind(&job.image)
    .bind(serde_json::to_value(&job.resources)?)
    .bind(timeout_seconds)
    .bind(job.status.as_str())
    .bind(&job.agent_id)
    .bind(job.attempt as i32)
    .bind(job.enqueued_at)
    .bind(job.claimed_at)
    .bind(job.started_at)
    .bind(job.completed_at)
    .bind(job.last_progress_at)
    .bind(job.cancel_requested_at)
    .bind(failure_to_value(&job.failure)?)
    .execute(conn)
    .await?;

    Ok(())
}

/// Find a job by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> StoreResult<Option<Job>> {
    let row = sqlx::query_as::<_, JobRow>(&format!(
        "SELECT {} FROM jobs WHERE id = $1",
        JOB_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(Job::try_from).transpose()
}

/// List jobs, oldest first, optionally by status
pub async fn list(pool: &PgPool, status: Option<JobStatus>) -> StoreResult<Vec<Job>> {
    let rows = sqlx::query_as::<_, JobRow>(&format!(
        r#"
        SELECT {}
        FROM jobs
        WHERE $1::VARCHAR IS NULL OR status = $1
        ORDER BY enqueued_at ASC, position ASC
        "#,
        JOB_COLUMNS
    ))
    .bind(status.map(JobStatus::as_str))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Job::try_from).collect()
}

/// Find jobs by pipeline ID, in definition order
pub async fn find_by_pipeline(pool: &PgPool, pipeline_id: Uuid) -> StoreResult<Vec<Job>> {
    let rows = sqlx::query_as::<_, JobRow>(&format!(
        "SELECT {} FROM jobs WHERE pipeline_id = $1 ORDER BY position ASC",
        JOB_COLUMNS
    ))
    .bind(pipeline_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Job::try_from).collect()
}

/// Find the jobs an agent holds
pub async fn find_held_by(pool: &PgPool, agent_id: &str) -> StoreResult<Vec<Job>> {
    let rows = sqlx::query_as::<_, JobRow>(&format!(
        r#"
        SELECT {}
        FROM jobs
        WHERE agent_id = $1 AND status IN ('Claimed', 'Running')
        ORDER BY enqueued_at ASC, position ASC
        "#,
        JOB_COLUMNS
    ))
    .bind(agent_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Job::try_from).collect()
}

/// Count the jobs an agent holds
pub async fn count_held_by(conn: &mut PgConnection, agent_id: &str) -> StoreResult<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM jobs WHERE agent_id = $1 AND status IN ('Claimed', 'Running')",
    )
    .bind(agent_id)
    .fetch_one(conn)
    .await?;

    Ok(count)
}

/// Claim the oldest eligible Pending job for the agent
///
/// Uses SKIP LOCKED so concurrent claimers never block on, or receive, the same row.
pub async fn claim_next(
    conn: &mut PgConnection,
    agent: &Agent,
    now: DateTime<Utc>,
) -> StoreResult<Option<Job>> {
    let row = sqlx::query_as::<_, JobRow>(&format!(
        r#"
        UPDATE jobs
        SET status = 'Claimed', agent_id = $1, claimed_at = $2
        WHERE id = (
            SELECT j.id FROM jobs j
            WHERE j.status = 'Pending'
              AND j.cancel_requested_at IS NULL
              AND j.required_capabilities <@ $3::TEXT[]
              AND NOT EXISTS (
                  SELECT 1 FROM jobs d
                  WHERE d.id = ANY(j.needs) AND d.status <> 'Succeeded'
              )
            ORDER BY j.enqueued_at ASC, j.position ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING {}
        "#,
        JOB_COLUMNS
    ))
    .bind(&agent.id)
    .bind(now)
    .bind(&agent.capabilities)
    .fetch_optional(conn)
    .await?;

    row.map(Job::try_from).transpose()
}

/// Write the mutable fields of `job` if the row still matches `expected`
pub async fn update_if(
    conn: &mut PgConnection,
    job: &Job,
    expected: Expected<'_>,
) -> StoreResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = $1, agent_id = $2, attempt = $3, claimed_at = $4, started_at = $5,
            completed_at = $6, last_progress_at = $7, cancel_requested_at = $8, failure = $9
        WHERE id = $10 AND status = $11 AND agent_id IS NOT DISTINCT FROM $12
        "#,
    )
    .bind(job.status.as_str())
    .bind(&job.agent_id)
    .bind(job.attempt as i32)
    .bind(job.claimed_at)
    .bind(job.started_at)
    .bind(job.completed_at)
    .bind(job.last_progress_at)
    .bind(job.cancel_requested_at)
    .bind(failure_to_value(&job.failure)?)
    .bind(job.id)
    .bind(expected.status.as_str())
    .bind(expected.agent_id)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

// =============================================================================
// Helper Functions
// =============================================================================

fn failure_to_value(failure: &Option<JobFailure>) -> StoreResult<Option<serde_json::Value>> {
    failure
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(StoreError::from)
}

fn to_u32(value: i32, column: &str) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative {}: {}", column, value)))
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    pipeline_id: Uuid,
    name: String,
    position: i32,
    needs: Vec<Uuid>,
    required: bool,
    required_capabilities: Vec<String>,
    steps: serde_json::Value,
    image: Option<String>,
    resources: serde_json::Value,
    timeout_seconds: Option<i64>,
    status: String,
    agent_id: Option<String>,
    attempt: i32,
    enqueued_at: DateTime<Utc>,
    claimed_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    last_progress_at: Option<DateTime<Utc>>,
    cancel_requested_at: Option<DateTime<Utc>>,
    failure: Option<serde_json::Value>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let steps: Vec<Step> = serde_json::from_value(row.steps)?;
        let resources: ResourceLimits = serde_json::from_value(row.resources)?;
        let failure: Option<JobFailure> = row.failure.map(serde_json::from_value).transpose()?;
        let status = row.status.parse().map_err(StoreError::Corrupt)?;
        let timeout_seconds = row
            .timeout_seconds
            .map(|t| u64::try_from(t).map_err(|_| StoreError::Corrupt(format!("negative timeout: {}", t))))
            .transpose()?;

        Ok(Job {
            id: row.id,
            pipeline_id: row.pipeline_id,
            name: row.name,
            position: to_u32(row.position, "position")?,
            needs: row.needs,
            required: row.required,
            required_capabilities: row.required_capabilities,
            steps,
            image: row.image,
            resources,
            timeout_seconds,
            status,
            agent_id: row.agent_id,
            attempt: to_u32(row.attempt, "attempt")?,
            enqueued_at: row.enqueued_at,
            claimed_at: row.claimed_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            last_progress_at: row.last_progress_at,
            cancel_requested_at: row.cancel_requested_at,
            failure,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_column_rejects_out_of_range() {
        assert_eq!(timeout_column(None).unwrap(), None);
        assert_eq!(timeout_column(Some(600)).unwrap(), Some(600));
        assert!(matches!(
            timeout_column(Some(u64::MAX)),
            Err(StoreError::Corrupt(_))
        ));
    }
}
