//! StateManager - actor that owns the job database
//!
//! Processes commands via channels for single-writer access to persistent
//! state.

use std::path::Path;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::domain::{Account, Job, JobStatus};

use super::db::{JobDb, JobStats};
use super::messages::{StateCommand, StateError, StateResponse};

/// Handle to send commands to the StateManager
#[derive(Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
}

impl StateManager {
    /// Spawn a new StateManager actor over the database at the given path
    pub fn spawn(db_path: impl AsRef<Path>) -> Result<Self, StateError> {
        let db = JobDb::open(db_path)?;
        Ok(Self::spawn_with(db))
    }

    /// Spawn over an in-memory database (tests)
    pub fn spawn_in_memory() -> Result<Self, StateError> {
        let db = JobDb::open_in_memory()?;
        Ok(Self::spawn_with(db))
    }

    fn spawn_with(db: JobDb) -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(db, rx));
        info!("StateManager spawned");
        Self { tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<StateResponse<T>>) -> StateCommand,
    ) -> StateResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| StateError::Channel)?;
        reply_rx.await.map_err(|_| StateError::Channel)?
    }

    // === Account operations ===

    /// Register a new account
    pub async fn create_account(&self, account: Account) -> StateResponse<String> {
        debug!(id = %account.id, "create_account: called");
        self.request(|reply| StateCommand::CreateAccount { account, reply })
            .await
    }

    /// Get an account by ID
    pub async fn get_account(&self, id: &str) -> StateResponse<Option<Account>> {
        let id = id.to_string();
        self.request(|reply| StateCommand::GetAccount { id, reply })
            .await
    }

    /// Get an account by ID, returning an error if not found
    pub async fn get_account_required(&self, id: &str) -> Result<Account, StateError> {
        self.get_account(id)
            .await?
            .ok_or_else(|| StateError::NotFound(format!("account {}", id)))
    }

    /// List all registered accounts
    pub async fn list_accounts(&self) -> StateResponse<Vec<Account>> {
        self.request(|reply| StateCommand::ListAccounts { reply })
            .await
    }

    /// Make the given account the single active one
    pub async fn activate_account(&self, id: &str) -> StateResponse<()> {
        let id = id.to_string();
        self.request(|reply| StateCommand::ActivateAccount { id, reply })
            .await
    }

    /// Remove an account
    pub async fn delete_account(&self, id: &str) -> StateResponse<()> {
        let id = id.to_string();
        self.request(|reply| StateCommand::DeleteAccount { id, reply })
            .await
    }

    // === Job operations ===

    /// Record a new job
    pub async fn create_job(&self, job: Job) -> StateResponse<String> {
        debug!(id = %job.id, target = %job.target_group, "create_job: called");
        self.request(|reply| StateCommand::CreateJob { job, reply })
            .await
    }

    /// Get a job by ID
    pub async fn get_job(&self, id: &str) -> StateResponse<Option<Job>> {
        let id = id.to_string();
        self.request(|reply| StateCommand::GetJob { id, reply }).await
    }

    /// Get a job by ID, returning an error if not found
    pub async fn get_job_required(&self, id: &str) -> Result<Job, StateError> {
        self.get_job(id)
            .await?
            .ok_or_else(|| StateError::NotFound(format!("job {}", id)))
    }

    /// Persist running counters for a job
    pub async fn update_job_progress(&self, id: &str, added: u64, errors: u64) -> StateResponse<()> {
        let id = id.to_string();
        self.request(|reply| StateCommand::UpdateJobProgress {
            id,
            added,
            errors,
            reply,
        })
        .await
    }

    /// Move a job to a terminal status
    pub async fn finish_job(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<String>,
    ) -> StateResponse<()> {
        debug!(%id, %status, "finish_job: called");
        let id = id.to_string();
        self.request(|reply| StateCommand::FinishJob {
            id,
            status,
            error,
            reply,
        })
        .await
    }

    /// List jobs, optionally filtered by status
    pub async fn list_jobs(&self, status_filter: Option<JobStatus>) -> StateResponse<Vec<Job>> {
        self.request(|reply| StateCommand::ListJobs {
            status_filter,
            reply,
        })
        .await
    }

    /// Aggregate job statistics
    pub async fn stats(&self) -> StateResponse<JobStats> {
        self.request(|reply| StateCommand::Stats { reply }).await
    }

    /// Ask the actor to exit once queued commands are drained
    pub async fn shutdown(&self) {
        let _ = self.tx.send(StateCommand::Shutdown).await;
    }
}

/// The actor task: owns the database, answers commands until shutdown
async fn actor_loop(db: JobDb, mut rx: mpsc::Receiver<StateCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::CreateAccount { account, reply } => {
                let _ = reply.send(db.create_account(&account));
            }
            StateCommand::GetAccount { id, reply } => {
                let _ = reply.send(db.get_account(&id));
            }
            StateCommand::ListAccounts { reply } => {
                let _ = reply.send(db.list_accounts());
            }
            StateCommand::ActivateAccount { id, reply } => {
                let _ = reply.send(db.activate_account(&id));
            }
            StateCommand::DeleteAccount { id, reply } => {
                let _ = reply.send(db.delete_account(&id));
            }
            StateCommand::CreateJob { job, reply } => {
                let _ = reply.send(db.create_job(&job));
            }
            StateCommand::GetJob { id, reply } => {
                let _ = reply.send(db.get_job(&id));
            }
            StateCommand::UpdateJobProgress {
                id,
                added,
                errors,
                reply,
            } => {
                let _ = reply.send(db.update_job_progress(&id, added, errors));
            }
            StateCommand::FinishJob {
                id,
                status,
                error,
                reply,
            } => {
                let _ = reply.send(db.finish_job(&id, status, error.as_deref()));
            }
            StateCommand::ListJobs {
                status_filter,
                reply,
            } => {
                let _ = reply.send(db.list_jobs(status_filter));
            }
            StateCommand::Stats { reply } => {
                let _ = reply.send(db.stats());
            }
            StateCommand::Shutdown => {
                info!("StateManager shutting down");
                break;
            }
        }
    }

    info!("StateManager stopped");
}
