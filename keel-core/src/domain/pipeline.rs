//! Pipeline domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::definition::TriggerEvent;
use crate::domain::job::JobStatus;

/// Pipeline record
///
/// The definition is immutable once enqueued; only the status fields change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub trigger: TriggerEvent,
    pub status: PipelineStatus,
    /// First required job that failed
    pub failed_job_id: Option<Uuid>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl PipelineStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineStatus::Succeeded | PipelineStatus::Failed | PipelineStatus::Canceled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStatus::Pending => "Pending",
            PipelineStatus::Running => "Running",
            PipelineStatus::Succeeded => "Succeeded",
            PipelineStatus::Failed => "Failed",
            PipelineStatus::Canceled => "Canceled",
        }
    }

    /// Derives the pipeline status from its jobs' `(required, status)` pairs.
    ///
    /// A failed required job fails the pipeline even while other jobs are
    /// still winding down. Otherwise the pipeline is terminal only once every
    /// job is terminal: Canceled if a required job was canceled, else Succeeded.
    /// Non-required jobs only affect whether the pipeline is still running.
    pub fn aggregate<I>(jobs: I) -> PipelineStatus
    where
        I: IntoIterator<Item = (bool, JobStatus)>,
    {
        let mut all_terminal = true;
        let mut any_started = false;
        let mut required_canceled = false;

        for (required, status) in jobs {
            if required && status == JobStatus::Failed {
                return PipelineStatus::Failed;
            }
            if required && status == JobStatus::Canceled {
                required_canceled = true;
            }
            if !status.is_terminal() {
                all_terminal = false;
            }
            if status != JobStatus::Pending {
                any_started = true;
            }
        }

        if !all_terminal {
            if any_started {
                PipelineStatus::Running
            } else {
                PipelineStatus::Pending
            }
        } else if required_canceled {
            PipelineStatus::Canceled
        } else {
            PipelineStatus::Succeeded
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(PipelineStatus::Pending),
            "Running" => Ok(PipelineStatus::Running),
            "Succeeded" => Ok(PipelineStatus::Succeeded),
            "Failed" => Ok(PipelineStatus::Failed),
            "Canceled" => Ok(PipelineStatus::Canceled),
            other => Err(format!("unknown pipeline status '{}'", other)),
        }
    }
}
