//! Pipeline definitions
//!
//! A pipeline definition is the immutable description of the jobs triggered by
//! a repository event. It is submitted as structured data (YAML or JSON),
//! validated, and expanded by the coordinator into individual job records.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::domain::capability;
use crate::domain::job::{ResourceLimits, Step};

pub const MAX_NAME_LENGTH: usize = 255;

/// Longest timeout a job may ask for (one week)
pub const MAX_TIMEOUT_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Pipeline definition as submitted with a repository event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub jobs: Vec<JobDefinition>,
}

/// One job of a pipeline definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,

    /// Names of jobs that must succeed before this one runs
    #[serde(default)]
    pub needs: Vec<String>,

    /// Non-required jobs never fail the pipeline
    #[serde(default = "default_required")]
    pub required: bool,

    /// Capability tags an agent must advertise to run this job
    #[serde(default)]
    pub capabilities: Vec<String>,

    pub steps: Vec<Step>,

    /// Sandbox image, the agent default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default)]
    pub resources: ResourceLimits,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

fn default_required() -> bool {
    true
}

/// Repository event that triggered a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Repository path on the source-control server (e.g. "team/service")
    pub repository: String,

    #[serde(rename = "ref")]
    pub git_ref: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,

    /// Clone URL, filled in by the coordinator from its network config when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_url: Option<String>,

    /// Event kind reported by the source-control server (e.g. "push")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("pipeline name must not be empty")]
    EmptyName,

    #[error("name '{0}' exceeds 255 characters")]
    NameTooLong(String),

    #[error("pipeline must define at least one job")]
    NoJobs,

    #[error("job at position {0} has an empty name")]
    EmptyJobName(usize),

    #[error("job '{0}' is defined more than once")]
    DuplicateJob(String),

    #[error("job '{0}' has no steps")]
    NoSteps(String),

    #[error("step {step} of job '{job}' has an empty command")]
    EmptyCommand { job: String, step: usize },

    #[error("job '{job}' requires invalid capability tag '{tag}'")]
    InvalidCapability { job: String, tag: String },

    #[error("job '{job}' needs unknown job '{need}'")]
    UnknownDependency { job: String, need: String },

    #[error("job dependencies form a cycle through: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("job '{0}' has a zero timeout")]
    ZeroTimeout(String),

    #[error("job '{job}' timeout exceeds the maximum of {max} seconds")]
    TimeoutTooLong { job: String, max: u64 },

    #[error("trigger repository must not be empty")]
    EmptyRepository,

    #[error("trigger ref must not be empty")]
    EmptyRef,
}

impl PipelineDefinition {
    /// Validates the definition; the first problem found is returned
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.name.trim().is_empty() {
            return Err(DefinitionError::EmptyName);
        }
        if self.name.len() > MAX_NAME_LENGTH {
            return Err(DefinitionError::NameTooLong(self.name.clone()));
        }
        if self.jobs.is_empty() {
            return Err(DefinitionError::NoJobs);
        }

        let mut names = HashSet::new();
        for (index, job) in self.jobs.iter().enumerate() {
            if job.name.trim().is_empty() {
                return Err(DefinitionError::EmptyJobName(index));
            }
            if job.name.len() > MAX_NAME_LENGTH {
                return Err(DefinitionError::NameTooLong(job.name.clone()));
            }
            if !names.insert(job.name.as_str()) {
                return Err(DefinitionError::DuplicateJob(job.name.clone()));
            }
            job.validate()?;
        }

        for job in &self.jobs {
            if let Some(need) = job.needs.iter().find(|n| !names.contains(n.as_str())) {
                return Err(DefinitionError::UnknownDependency {
                    job: job.name.clone(),
                    need: need.clone(),
                });
            }
        }

        self.check_acyclic()
    }

    /// Kahn's algorithm over the `needs` graph
    fn check_acyclic(&self) -> Result<(), DefinitionError> {
        let mut in_degree: HashMap<&str, usize> = self
            .jobs
            .iter()
            .map(|job| (job.name.as_str(), job.needs.len()))
            .collect();

        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for job in &self.jobs {
            for need in &job.needs {
                dependents
                    .entry(need.as_str())
                    .or_default()
                    .push(job.name.as_str());
            }
        }

        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| *name)
            .collect();

        let mut visited = 0;
        while let Some(name) = ready.pop() {
            visited += 1;
            for dependent in dependents.get(name).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(*dependent);
                    }
                }
            }
        }

        if visited == self.jobs.len() {
            return Ok(());
        }

        let mut remaining: Vec<String> = in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(name, _)| name.to_string())
            .collect();
        remaining.sort();
        Err(DefinitionError::Cycle(remaining))
    }
}

impl JobDefinition {
    fn validate(&self) -> Result<(), DefinitionError> {
        if self.steps.is_empty() {
            return Err(DefinitionError::NoSteps(self.name.clone()));
        }
        if let Some(step) = self.steps.iter().position(|s| s.run.trim().is_empty()) {
            return Err(DefinitionError::EmptyCommand {
                job: self.name.clone(),
                step,
            });
        }
        if let Some(tag) = self
            .capabilities
            .iter()
            .find(|tag| !capability::is_valid_tag(tag))
        {
            return Err(DefinitionError::InvalidCapability {
                job: self.name.clone(),
                tag: tag.clone(),
            });
        }
        match self.timeout_seconds {
            Some(0) => return Err(DefinitionError::ZeroTimeout(self.name.clone())),
            Some(t) if t > MAX_TIMEOUT_SECONDS => {
                return Err(DefinitionError::TimeoutTooLong {
                    job: self.name.clone(),
                    max: MAX_TIMEOUT_SECONDS,
                });
            }
            _ => {}
        }
        Ok(())
    }
}

impl TriggerEvent {
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.repository.trim().is_empty() {
            return Err(DefinitionError::EmptyRepository);
        }
        if self.git_ref.trim().is_empty() {
            return Err(DefinitionError::EmptyRef);
        }
        Ok(())
    }
}
