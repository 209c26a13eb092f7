//! Service Module
//!
//! Business logic layer for the coordinator.
//! Services orchestrate between the store and contain domain logic.

pub mod agent;
pub mod job;
pub mod pipeline;
pub mod sweep;

// Re-export for convenience
pub use agent as agent_service;
pub use job as job_service;
pub use pipeline as pipeline_service;
pub use sweep as sweep_service;

use keel_core::domain::definition::DefinitionError;
use keel_core::domain::job::JobStatus;
use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigError;
use crate::repository::StoreError;

/// Service error type
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid pipeline definition: {0}")]
    InvalidDefinition(#[from] DefinitionError),

    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),

    #[error("invalid registration: {0}")]
    InvalidRegistration(String),

    #[error("unknown agent token")]
    UnknownAgent,

    #[error("agent '{agent_id}' does not hold job {job_id}")]
    NotOwner { job_id: Uuid, agent_id: String },

    #[error("job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ServiceError>;
