//! JobManager - spawns and tracks automation pipelines
//!
//! One background tokio task per job. `start` is fire-and-forget: the job
//! record is written, the pipeline is spawned, and the id returns
//! immediately. The registry only tracks live pipelines; durable state lives
//! behind the state actor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use eyre::Result;
use memberstore::MemberStore;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::client::GroupClient;
use crate::domain::{Job, JobProgress, JobSpec, JobStatus};
use crate::engine::InviteEngine;
use crate::harvest::Harvester;
use crate::retry::RetryPolicy;
use crate::state::StateManager;

use super::CancelToken;

/// Configuration for the JobManager
#[derive(Debug, Clone)]
pub struct JobManagerConfig {
    /// Maximum pipelines running at once; excess jobs queue on the semaphore.
    /// Stays at 1 while jobs share one protocol session, which does not
    /// tolerate overlapping invitation calls.
    pub max_concurrent_jobs: usize,
    /// How long shutdown waits for pipelines to observe their stop tokens
    pub shutdown_timeout: Duration,
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 1,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

struct JobHandle {
    cancel: CancelToken,
    task: JoinHandle<()>,
}

/// Registry and lifecycle owner for running jobs
pub struct JobManager {
    state: StateManager,
    store: MemberStore,
    client: Arc<dyn GroupClient>,
    retry: RetryPolicy,
    config: JobManagerConfig,
    semaphore: Arc<Semaphore>,
    jobs: Arc<Mutex<HashMap<String, JobHandle>>>,
}

impl JobManager {
    /// Create a new manager
    pub fn new(
        state: StateManager,
        store: MemberStore,
        client: Arc<dyn GroupClient>,
        retry: RetryPolicy,
        config: JobManagerConfig,
    ) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
            state,
            store,
            client,
            retry,
            config,
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record a job and spawn its pipeline. Returns the job id immediately;
    /// the pipeline runs in the background until a terminal status.
    pub async fn start(&self, spec: JobSpec) -> Result<String> {
        spec.validate().map_err(|e| eyre::eyre!(e))?;

        let account = self.state.get_account_required(&spec.account_id).await?;
        if !account.is_active {
            return Err(eyre::eyre!("Account {} is not active", account.id));
        }

        let job = Job::from_spec(spec);
        let id = job.id.clone();
        self.state.create_job(job.clone()).await?;

        let cancel = CancelToken::new();
        let task = tokio::spawn(run_pipeline(
            self.state.clone(),
            self.store.clone(),
            self.client.clone(),
            self.retry.clone(),
            self.semaphore.clone(),
            self.jobs.clone(),
            job,
            cancel.clone(),
        ));

        self.jobs
            .lock()
            .unwrap()
            .insert(id.clone(), JobHandle { cancel, task });

        info!(job_id = %id, "job started");
        Ok(id)
    }

    /// Set a running job's stop token. The pipeline observes it at its next
    /// checkpoint; progress already persisted is retained.
    pub fn request_stop(&self, id: &str) -> Result<()> {
        let jobs = self.jobs.lock().unwrap();
        match jobs.get(id) {
            Some(handle) => {
                handle.cancel.cancel();
                info!(job_id = %id, "stop requested");
                Ok(())
            }
            None => Err(eyre::eyre!("Job {} is not running", id)),
        }
    }

    /// Status and live counters for a job
    pub async fn progress(&self, id: &str) -> Result<(JobStatus, JobProgress)> {
        let job = self.state.get_job_required(id).await?;
        Ok((job.status, job.progress()))
    }

    /// Number of live pipelines
    pub fn running_count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    /// IDs of live pipelines
    pub fn running_ids(&self) -> Vec<String> {
        self.jobs.lock().unwrap().keys().cloned().collect()
    }

    /// Stop every pipeline and wait for them to drain.
    ///
    /// Pipelines that don't observe their token within the timeout are
    /// aborted and their jobs marked stopped.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = {
            let jobs = self.jobs.lock().unwrap();
            for handle in jobs.values() {
                handle.cancel.cancel();
            }
            jobs.keys().cloned().collect()
        };

        if !ids.is_empty() {
            info!(count = ids.len(), "waiting for running jobs to stop");
        }

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        while !self.jobs.lock().unwrap().is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        // Force-abort whatever is left
        let leftovers: Vec<(String, JobHandle)> =
            self.jobs.lock().unwrap().drain().collect();
        for (id, handle) in leftovers {
            warn!(job_id = %id, "aborting pipeline after shutdown timeout");
            handle.task.abort();
            // The pipeline may have flushed a terminal status just before the
            // abort; only overwrite live jobs
            match self.state.get_job(&id).await {
                Ok(Some(job)) if !job.is_terminal() => {
                    if let Err(e) = self.state.finish_job(&id, JobStatus::Stopped, None).await {
                        error!(job_id = %id, error = %e, "failed to mark aborted job stopped");
                    }
                }
                Ok(_) => {}
                Err(e) => error!(job_id = %id, error = %e, "failed to read job during shutdown"),
            }
        }

        info!("job manager shutdown complete");
    }
}

/// One job's full pipeline: harvest, then invite, then flush the terminal
/// status. Runs as a detached tokio task.
#[allow(clippy::too_many_arguments)]
async fn run_pipeline(
    state: StateManager,
    store: MemberStore,
    client: Arc<dyn GroupClient>,
    retry: RetryPolicy,
    semaphore: Arc<Semaphore>,
    jobs: Arc<Mutex<HashMap<String, JobHandle>>>,
    job: Job,
    cancel: CancelToken,
) {
    let _permit = match semaphore.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return,
    };

    let result = execute(&state, &store, &client, &retry, &job, &cancel).await;

    // Stop takes precedence over completed when both apply at flush time
    let (status, error) = match result {
        Ok(_) if cancel.is_cancelled() => (JobStatus::Stopped, None),
        Ok(_) => (JobStatus::Completed, None),
        Err(e) => {
            error!(job_id = %job.id, error = %e, "job pipeline failed");
            (JobStatus::Failed, Some(e.to_string()))
        }
    };

    if let Err(e) = state.finish_job(&job.id, status, error).await {
        error!(job_id = %job.id, error = %e, "failed to record terminal status");
    }

    jobs.lock().unwrap().remove(&job.id);
    info!(job_id = %job.id, %status, "job finished");
}

async fn execute(
    state: &StateManager,
    store: &MemberStore,
    client: &Arc<dyn GroupClient>,
    retry: &RetryPolicy,
    job: &Job,
    cancel: &CancelToken,
) -> Result<JobProgress> {
    let harvester = Harvester::new(client.clone(), store.clone(), retry.clone());
    let new_candidates = harvester.harvest(&job.source_groups, cancel).await?;
    debug!(job_id = %job.id, new_candidates, "harvest phase done");

    if cancel.is_cancelled() {
        return Ok(JobProgress::default());
    }

    let engine = InviteEngine::new(client.clone(), store.clone(), state.clone(), retry.clone());
    engine.run(job, cancel).await
}
