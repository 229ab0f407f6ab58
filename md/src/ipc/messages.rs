//! IPC message types for daemon communication
//!
//! Simple JSON-over-newline protocol. Each message is a single line of JSON
//! followed by `\n`.

use serde::{Deserialize, Serialize};

use crate::domain::JobSpec;

/// Messages from CLI to Daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum DaemonMessage {
    /// Start an automation job
    StartJob { spec: JobSpec },

    /// Request a running job to stop
    StopJob { id: String },

    /// Fetch a job's status and counters
    GetJob { id: String },

    /// List all job records
    ListJobs,

    /// Ping to check if daemon is alive
    Ping,

    /// Request daemon to stop gracefully
    Shutdown,
}

/// One job row in a listing response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobSummary {
    pub id: String,
    pub status: String,
    pub target_group: String,
    pub added: u64,
    pub errors: u64,
}

/// Responses from Daemon to CLI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum DaemonResponse {
    /// Acknowledgment
    Ok,

    /// A job was started
    JobStarted { id: String },

    /// Status and counters for one job
    Job { job: JobSummary },

    /// Job listing
    Jobs { jobs: Vec<JobSummary> },

    /// Pong response to ping
    Pong { version: String },

    /// Error response
    Error { message: String },
}
