//! Log Repository
//!
//! Handles all database operations related to job logs.

use keel_core::domain::log::LogEntry;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::{StoreError, StoreResult};

/// Add log entries for a job
pub async fn add_entries(
    conn: &mut PgConnection,
    job_id: Uuid,
    entries: &[LogEntry],
) -> StoreResult<()> {
    for entry in entries {
        sqlx::query(
            r#"
            INSERT INTO job_logs (job_id, timestamp, level, message, step)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(job_id)
        .bind(entry.timestamp)
        .bind(entry.level.as_str())
        .bind(&entry.message)
        .bind(entry.step.map(|s| s as i32))
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Get all log entries for a job, in append order
pub async fn find_by_job(pool: &PgPool, job_id: Uuid) -> StoreResult<Vec<LogEntry>> {
    let rows = sqlx::query_as::<_, LogRow>(
        r#"
        SELECT timestamp, level, message, step
        FROM job_logs
        WHERE job_id = $1
        ORDER BY id ASC
        "#,
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(LogEntry::try_from).collect()
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct LogRow {
    timestamp: chrono::DateTime<chrono::Utc>,
    level: String,
    message: String,
    step: Option<i32>,
}

impl TryFrom<LogRow> for LogEntry {
    type Error = StoreError;

    fn try_from(row: LogRow) -> Result<Self, Self::Error> {
        Ok(LogEntry {
            timestamp: row.timestamp,
            level: row.level.parse().map_err(StoreError::Corrupt)?,
            message: row.message,
            step: row.step.and_then(|s| u32::try_from(s).ok()),
        })
    }
}
