//! Job domain type
//!
//! Tracks one automation run: which groups to harvest, where to invite, the
//! pacing bounds, and the live progress counters an observer polls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Pipeline is harvesting or inviting
    #[default]
    Running,
    /// Caller requested a stop and the pipeline observed it
    Stopped,
    /// Pipeline finished normally
    Completed,
    /// Pipeline aborted with an error
    Failed,
}

impl JobStatus {
    /// Whether this status ends the job
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Parameters a caller supplies to start a job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobSpec {
    /// Owning account
    pub account_id: String,
    /// Groups to harvest candidates from
    pub source_groups: Vec<String>,
    /// Group to invite candidates into
    pub target_group: String,
    /// Minimum per-item delay in seconds
    pub delay_min: u64,
    /// Maximum per-item delay in seconds
    pub delay_max: u64,
    /// Optional cap on candidates processed this run
    pub max_members: Option<u64>,
}

impl JobSpec {
    /// Validate the spec before a job is created from it
    pub fn validate(&self) -> Result<(), String> {
        if self.source_groups.is_empty() {
            return Err("at least one source group is required".to_string());
        }
        if self.target_group.is_empty() {
            return Err("target group is required".to_string());
        }
        if self.delay_min > self.delay_max {
            return Err(format!(
                "delay-min ({}) must not exceed delay-max ({})",
                self.delay_min, self.delay_max
            ));
        }
        Ok(())
    }
}

/// Live progress counters for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct JobProgress {
    /// Members successfully invited
    pub added: u64,
    /// Per-item errors that did not abort the job
    pub errors: u64,
}

/// One automation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier
    pub id: String,

    /// Owning account
    pub account_id: String,

    /// Groups harvested for candidates
    pub source_groups: Vec<String>,

    /// Group candidates are invited into
    pub target_group: String,

    /// Minimum per-item delay in seconds
    pub delay_min: u64,

    /// Maximum per-item delay in seconds
    pub delay_max: u64,

    /// Optional cap on candidates processed
    pub max_members: Option<u64>,

    /// Members successfully invited so far
    pub added: u64,

    /// Per-item errors so far
    pub errors: u64,

    /// Current status
    pub status: JobStatus,

    /// When the job was started
    pub started_at: DateTime<Utc>,

    /// When the job reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,

    /// Error detail for failed jobs
    pub last_error: Option<String>,
}

impl Job {
    /// Create a new running job from a spec
    pub fn from_spec(spec: JobSpec) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            account_id: spec.account_id,
            source_groups: spec.source_groups,
            target_group: spec.target_group,
            delay_min: spec.delay_min,
            delay_max: spec.delay_max,
            max_members: spec.max_members,
            added: 0,
            errors: 0,
            status: JobStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            last_error: None,
        }
    }

    /// Current progress counters
    pub fn progress(&self) -> JobProgress {
        JobProgress {
            added: self.added,
            errors: self.errors,
        }
    }

    /// Whether the job has reached a terminal status
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
