//! Pipeline Repository
//!
//! Handles all database operations related to pipelines.

use keel_core::domain::definition::TriggerEvent;
use keel_core::domain::pipeline::{Pipeline, PipelineStatus};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::{StoreError, StoreResult};

const PIPELINE_COLUMNS: &str = "id, name, description, trigger, status, failed_job_id, \
    cancel_requested, created_at, updated_at, completed_at";

/// Insert a new pipeline
pub async fn insert(conn: &mut PgConnection, pipeline: &Pipeline) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO pipelines (
            id, name, description, trigger, status, failed_job_id,
            cancel_requested, created_at, updated_at, completed_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(pipeline.id)
    .bind(&pipeline.name)
    .bind(&pipeline.description)
    .bind(serde_json::to_value(&pipeline.trigger)?)
    .bind(pipeline.status.as_str())
    .bind(pipeline.failed_job_id)
    .bind(pipeline.cancel_requested)
    .bind(pipeline.created_at)
    .bind(pipeline.updated_at)
    .bind(pipeline.completed_at)
    .execute(conn)
    .await?;

    Ok(())
}

/// Find a pipeline by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> StoreResult<Option<Pipeline>> {
    let row = sqlx::query_as::<_, PipelineRow>(&format!(
        "SELECT {} FROM pipelines WHERE id = $1",
        PIPELINE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(Pipeline::try_from).transpose()
}

/// List pipelines, newest first
pub async fn list(pool: &PgPool, status: Option<PipelineStatus>) -> StoreResult<Vec<Pipeline>> {
    let rows = sqlx::query_as::<_, PipelineRow>(&format!(
        r#"
        SELECT {}
        FROM pipelines
        WHERE $1::VARCHAR IS NULL OR status = $1
        ORDER BY created_at DESC
        "#,
        PIPELINE_COLUMNS
    ))
    .bind(status.map(PipelineStatus::as_str))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Pipeline::try_from).collect()
}

/// Update the mutable fields of a pipeline
pub async fn update(pool: &PgPool, pipeline: &Pipeline) -> StoreResult<()> {
    sqlx::query(
        r#"
        UPDATE pipelines
        SET status = $1, failed_job_id = $2, cancel_requested = $3,
            updated_at = $4, completed_at = $5
        WHERE id = $6
        "#,
    )
    .bind(pipeline.status.as_str())
    .bind(pipeline.failed_job_id)
    .bind(pipeline.cancel_requested)
    .bind(pipeline.updated_at)
    .bind(pipeline.completed_at)
    .bind(pipeline.id)
    .execute(pool)
    .await?;

    Ok(())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct PipelineRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    trigger: serde_json::Value,
    status: String,
    failed_job_id: Option<Uuid>,
    cancel_requested: bool,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl TryFrom<PipelineRow> for Pipeline {
    type Error = StoreError;

    fn try_from(row: PipelineRow) -> Result<Self, Self::Error> {
        let trigger: TriggerEvent = serde_json::from_value(row.trigger)?;
        let status = row.status.parse().map_err(StoreError::Corrupt)?;

        Ok(Pipeline {
            id: row.id,
            name: row.name,
            description: row.description,
            trigger,
            status,
            failed_job_id: row.failed_job_id,
            cancel_requested: row.cancel_requested,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}
