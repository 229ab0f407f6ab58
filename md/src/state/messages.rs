//! State manager messages
//!
//! Commands and responses for the actor pattern.

use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{Account, Job, JobStatus};

use super::db::JobStats;

/// Errors from state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Channel error")]
    Channel,
}

impl From<rusqlite::Error> for StateError {
    fn from(e: rusqlite::Error) -> Self {
        StateError::Store(e.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(e: serde_json::Error) -> Self {
        StateError::Store(e.to_string())
    }
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

/// Commands sent to the StateManager actor
#[derive(Debug)]
pub enum StateCommand {
    // Account operations
    CreateAccount {
        account: Account,
        reply: oneshot::Sender<StateResponse<String>>,
    },
    GetAccount {
        id: String,
        reply: oneshot::Sender<StateResponse<Option<Account>>>,
    },
    ListAccounts {
        reply: oneshot::Sender<StateResponse<Vec<Account>>>,
    },
    ActivateAccount {
        id: String,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    DeleteAccount {
        id: String,
        reply: oneshot::Sender<StateResponse<()>>,
    },

    // Job operations
    CreateJob {
        job: Job,
        reply: oneshot::Sender<StateResponse<String>>,
    },
    GetJob {
        id: String,
        reply: oneshot::Sender<StateResponse<Option<Job>>>,
    },
    UpdateJobProgress {
        id: String,
        added: u64,
        errors: u64,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    FinishJob {
        id: String,
        status: JobStatus,
        error: Option<String>,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    ListJobs {
        status_filter: Option<JobStatus>,
        reply: oneshot::Sender<StateResponse<Vec<Job>>>,
    },

    // Aggregates
    Stats {
        reply: oneshot::Sender<StateResponse<JobStats>>,
    },

    // Shutdown
    Shutdown,
}
