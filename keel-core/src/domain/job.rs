//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A single command executed inside a job's sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    /// Shell command line, run with `sh -c`
    pub run: String,
}

/// Resource limits applied to the sandbox of a job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory limit in runtime notation (e.g. "512m")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,

    /// CPU limit (e.g. "1.5")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<String>,

    /// Maximum number of processes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pids: Option<u32>,
}

/// Job execution record
///
/// Structure shared between coordinator (persists, schedules) and agent (executes, reports).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub name: String,
    /// Position of the job in its pipeline definition
    pub position: u32,
    /// Jobs of the same pipeline that must succeed before this one is claimable
    pub needs: Vec<Uuid>,
    /// Whether a failure of this job fails the pipeline
    pub required: bool,
    pub required_capabilities: Vec<String>,
    pub steps: Vec<Step>,
    pub image: Option<String>,
    pub resources: ResourceLimits,
    pub timeout_seconds: Option<u64>,
    pub status: JobStatus,
    /// Agent currently holding the claim (only while Claimed or Running)
    pub agent_id: Option<String>,
    /// Starts at 1, bumped each time the job is requeued
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_progress_at: Option<DateTime<Utc>>,
    pub cancel_requested_at: Option<DateTime<Utc>>,
    pub failure: Option<JobFailure>,
}

impl Job {
    /// Returns true when `agent_id` holds an active claim on this job
    pub fn is_held_by(&self, agent_id: &str) -> bool {
        self.status.is_active() && self.agent_id.as_deref() == Some(agent_id)
    }
}

/// Job execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Claimed,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Claimed,
        JobStatus::Running,
        JobStatus::Succeeded,
        JobStatus::Failed,
        JobStatus::Canceled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Canceled
        )
    }

    /// Claimed or Running: some agent holds the job
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Claimed | JobStatus::Running)
    }

    /// Every transition the system may ever apply.
    ///
    /// Jobs only move forward, except the requeue of an active job back to
    /// Pending. A Pending job may be canceled without being claimed.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Claimed) | (Pending, Canceled) => true,
            (Claimed, Running) | (Claimed, Pending) | (Claimed, Canceled) => true,
            (Running, Running) | (Running, Pending) => true,
            (Running, Succeeded) | (Running, Failed) | (Running, Canceled) => true,
            _ => false,
        }
    }

    /// The subset of transitions an agent may report for a job it holds
    pub fn accepts_report(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Claimed, Running) => true,
            (Running, next) => next == Running || next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "Pending",
            JobStatus::Claimed => "Claimed",
            JobStatus::Running => "Running",
            JobStatus::Succeeded => "Succeeded",
            JobStatus::Failed => "Failed",
            JobStatus::Canceled => "Canceled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown job status '{}'", s))
    }
}

/// Why a job ended up Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// A step exited non-zero; the remaining steps were skipped
    StepFailure,
    /// The job exceeded its deadline, or stopped reporting progress
    Timeout,
    /// The sandbox could not be provisioned or broke mid-run
    Sandbox,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::StepFailure => "StepFailure",
            FailureReason::Timeout => "Timeout",
            FailureReason::Sandbox => "Sandbox",
        }
    }
}

impl FromStr for FailureReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "StepFailure" => Ok(FailureReason::StepFailure),
            "Timeout" => Ok(FailureReason::Timeout),
            "Sandbox" => Ok(FailureReason::Sandbox),
            other => Err(format!("unknown failure reason '{}'", other)),
        }
    }
}

/// Failure record attached to a Failed job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub reason: FailureReason,
    pub message: String,
    /// Index of the failing step, for step failures and step timeouts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl JobFailure {
    pub fn step_failed(step: u32, step_name: &str, exit_code: i32) -> Self {
        Self {
            reason: FailureReason::StepFailure,
            message: format!("step '{}' exited with code {}", step_name, exit_code),
            step: Some(step),
            exit_code: Some(exit_code),
        }
    }

    pub fn timeout(message: impl Into<String>, step: Option<u32>) -> Self {
        Self {
            reason: FailureReason::Timeout,
            message: message.into(),
            step,
            exit_code: None,
        }
    }

    pub fn sandbox(message: impl Into<String>) -> Self {
        Self {
            reason: FailureReason::Sandbox,
            message: message.into(),
            step: None,
            exit_code: None,
        }
    }
}
