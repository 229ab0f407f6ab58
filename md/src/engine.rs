//! Invitation engine
//!
//! Drains pending candidates one at a time: deduplicates against the ledger,
//! resolves each username, invites it into the target group, and records the
//! outcome. Side effects for one item (ledger append, checkpoint append,
//! counter update) are fully committed before the next item begins. The
//! protocol session is not safe for concurrent invitations, so nothing here
//! overlaps.

use std::sync::Arc;

use chrono::Utc;
use eyre::Result;
use memberstore::MemberStore;
use tracing::{debug, info, warn};

use crate::client::{ClientError, Group, GroupClient};
use crate::domain::{Job, JobProgress};
use crate::job::CancelToken;
use crate::pacing::Pacer;
use crate::retry::RetryPolicy;
use crate::state::StateManager;

/// What happened to a single candidate
enum ItemOutcome {
    /// Invited and recorded in the ledger
    Added,
    /// Could not be resolved; left eligible for a future run
    Unresolved,
    /// Already a participant of the target; checkpointed as a no-op
    AlreadyMember,
    /// User disallows invitations; permanently checkpointed
    PrivacyRestricted,
    /// Unrecovered error; counted, not checkpointed
    Errored,
}

/// Sequential candidate processor for one job
pub struct InviteEngine {
    client: Arc<dyn GroupClient>,
    store: MemberStore,
    state: StateManager,
    retry: RetryPolicy,
}

impl InviteEngine {
    /// Create an engine over the given client, store and state handle
    pub fn new(
        client: Arc<dyn GroupClient>,
        store: MemberStore,
        state: StateManager,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            store,
            state,
            retry,
        }
    }

    /// Process the job's pending candidates and return the final counters.
    ///
    /// Pending is the candidate set minus the checkpoint set, truncated to
    /// the job's cap. A target-group resolution failure is fatal; everything
    /// after that point is per-item and never aborts the run.
    pub async fn run(&self, job: &Job, cancel: &CancelToken) -> Result<JobProgress> {
        let candidates = self.store.candidates().load()?;
        let checkpoint = self.store.checkpoint().load()?;

        let mut pending: Vec<String> = candidates.difference(&checkpoint).cloned().collect();
        if let Some(cap) = job.max_members {
            pending.truncate(cap as usize);
        }

        if pending.is_empty() {
            info!(job_id = %job.id, "no pending candidates");
            return Ok(JobProgress::default());
        }

        let target = self
            .retry
            .call(|| self.client.resolve_group(&job.target_group))
            .await
            .map_err(|e| {
                eyre::eyre!("Failed to resolve target group '{}': {}", job.target_group, e)
            })?;

        info!(
            job_id = %job.id,
            pending = pending.len(),
            target = %target.name,
            "starting invitations"
        );

        let pacer = Pacer::new(job.delay_min, job.delay_max);
        let mut progress = JobProgress::default();
        let mut processed: u64 = 0;

        for username in &pending {
            if cancel.is_cancelled() {
                info!(job_id = %job.id, "stop requested, halting invitations");
                break;
            }

            // Global dedup: ever invited anywhere means excluded everywhere
            if self.store.ledger().contains(username)? {
                debug!(username, "already in ledger, checkpointing without attempt");
                self.store.checkpoint().append(username)?;
                continue;
            }

            match self.process_one(&target, username).await? {
                ItemOutcome::Added => progress.added += 1,
                ItemOutcome::Errored => progress.errors += 1,
                ItemOutcome::Unresolved
                | ItemOutcome::AlreadyMember
                | ItemOutcome::PrivacyRestricted => {}
            }
            processed += 1;

            if let Err(e) = self
                .state
                .update_job_progress(&job.id, progress.added, progress.errors)
                .await
            {
                warn!(job_id = %job.id, error = %e, "failed to persist progress counters");
            }

            tokio::time::sleep(pacer.item_delay()).await;
            if pacer.is_pause_point(processed) {
                let pause = pacer.extended_pause();
                debug!(processed, pause_secs = pause.as_secs(), "extended pause");
                tokio::time::sleep(pause).await;
            }
        }

        info!(
            job_id = %job.id,
            added = progress.added,
            errors = progress.errors,
            "invitation pass finished"
        );
        Ok(progress)
    }

    /// Handle one candidate. Store write failures propagate (losing a dedup
    /// record is worse than aborting the job); everything else maps to an
    /// [`ItemOutcome`].
    async fn process_one(&self, target: &Group, username: &str) -> Result<ItemOutcome> {
        let user = match self.retry.call(|| self.client.resolve_user(username)).await {
            Ok(user) => user,
            Err(e) => {
                // Not checkpointed: a resolution hiccup today should not
                // exclude the username forever
                warn!(username, error = %e, "could not resolve candidate, leaving for a future run");
                return Ok(ItemOutcome::Unresolved);
            }
        };

        match self
            .retry
            .call(|| self.client.is_participant(target, &user))
            .await
        {
            Ok(true) => {
                debug!(username, "already a participant of the target");
                self.store.checkpoint().append(username)?;
                return Ok(ItemOutcome::AlreadyMember);
            }
            Ok(false) => {}
            Err(e) => {
                warn!(username, error = %e, "participant check failed");
                return Ok(ItemOutcome::Errored);
            }
        }

        match self.retry.call(|| self.client.invite(target, &user)).await {
            Ok(message) => {
                self.store.ledger().append(username, &target.name, Utc::now())?;
                self.store.checkpoint().append(username)?;
                info!(username, target = %target.name, "invited");

                if let Some(message) = message {
                    // Join-notice cleanup is best-effort
                    if let Err(e) = self.client.delete_message(target, message).await {
                        debug!(username, error = %e, "could not delete join notice");
                    }
                }
                Ok(ItemOutcome::Added)
            }
            Err(ClientError::PrivacyRestricted) => {
                info!(username, "user disallows invitations, permanently excluded");
                self.store.checkpoint().append(username)?;
                Ok(ItemOutcome::PrivacyRestricted)
            }
            Err(e) => {
                warn!(username, error = %e, "invite failed");
                Ok(ItemOutcome::Errored)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Member, MessageRef, SimulatedClient, User};
    use crate::domain::JobSpec;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(1),
            rate_limit_cap: Duration::from_millis(5),
            rate_limit_jitter: (0.0, 0.0),
            transient_jitter: (0.0, 0.0),
        }
    }

    struct Fixture {
        store: MemberStore,
        state: StateManager,
        job: Job,
        _temp: TempDir,
    }

    async fn fixture(max_members: Option<u64>) -> Fixture {
        let temp = TempDir::new().unwrap();
        let store = MemberStore::open(temp.path()).unwrap();
        let state = StateManager::spawn_in_memory().unwrap();

        let account = crate::domain::Account::new("+1555");
        let account_id = state.create_account(account).await.unwrap();

        let job = Job::from_spec(JobSpec {
            account_id,
            source_groups: vec!["source".to_string()],
            target_group: "target".to_string(),
            delay_min: 0,
            delay_max: 0,
            max_members,
        });
        state.create_job(job.clone()).await.unwrap();

        Fixture {
            store,
            state,
            job,
            _temp: temp,
        }
    }

    fn engine(client: Arc<dyn GroupClient>, fx: &Fixture) -> InviteEngine {
        InviteEngine::new(client, fx.store.clone(), fx.state.clone(), fast_retry())
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_pending_returns_immediately() {
        let fx = fixture(None).await;
        let client = Arc::new(SimulatedClient::new().with_group("target", ["owner"]));

        let progress = engine(client.clone(), &fx)
            .run(&fx.job, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(progress, JobProgress::default());
        assert!(client.invites().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ledger_hit_skips_without_remote_call() {
        let fx = fixture(None).await;
        let client = Arc::new(
            SimulatedClient::new()
                .with_group("source", ["alice", "bob"])
                .with_group("target", ["owner"]),
        );

        fx.store
            .candidates()
            .merge(["alice".to_string(), "bob".to_string()])
            .unwrap();
        fx.store
            .ledger()
            .append("alice", "elsewhere", Utc::now())
            .unwrap();

        let progress = engine(client.clone(), &fx)
            .run(&fx.job, &CancelToken::new())
            .await
            .unwrap();

        // alice was skipped via the ledger (destination ignored), bob invited
        assert_eq!(progress.added, 1);
        assert_eq!(progress.errors, 0);
        let invited: Vec<String> = client.invites().into_iter().map(|(_, u)| u).collect();
        assert_eq!(invited, vec!["bob".to_string()]);

        // Both are checkpointed now
        assert!(fx.store.checkpoint().contains("alice").unwrap());
        assert!(fx.store.checkpoint().contains("bob").unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_privacy_restricted_checkpointed_not_counted() {
        let fx = fixture(None).await;
        let client = Arc::new(
            SimulatedClient::new()
                .with_group("source", ["carol"])
                .with_group("target", ["owner"])
                .fail_invite("carol", ClientError::PrivacyRestricted),
        );

        fx.store.candidates().merge(["carol".to_string()]).unwrap();

        let progress = engine(client.clone(), &fx)
            .run(&fx.job, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(progress.added, 0);
        assert_eq!(progress.errors, 0);
        assert!(fx.store.checkpoint().contains("carol").unwrap());

        // A second run never attempts carol again
        let progress = engine(client.clone(), &fx)
            .run(&fx.job, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(progress, JobProgress::default());
        assert_eq!(client.invites().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolvable_left_eligible_for_future_runs() {
        let fx = fixture(None).await;
        let client = Arc::new(
            SimulatedClient::new()
                .with_group("source", ["dave"])
                .with_group("target", ["owner"])
                .fail_resolve("dave", ClientError::NotFound("user dave".to_string())),
        );

        fx.store.candidates().merge(["dave".to_string()]).unwrap();

        let progress = engine(client.clone(), &fx)
            .run(&fx.job, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(progress, JobProgress::default());
        // Unlike privacy restrictions, resolution failures are not
        // checkpointed: dave stays pending
        assert!(!fx.store.checkpoint().contains("dave").unwrap());
        assert!(client.invites().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_participant_checkpointed_as_noop() {
        let fx = fixture(None).await;
        // erin is already in the target group
        let client = Arc::new(
            SimulatedClient::new().with_group("target", ["owner", "erin"]),
        );

        fx.store.candidates().merge(["erin".to_string()]).unwrap();

        let progress = engine(client.clone(), &fx)
            .run(&fx.job, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(progress, JobProgress::default());
        assert!(fx.store.checkpoint().contains("erin").unwrap());
        assert!(client.invites().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invite_error_counts_without_checkpoint() {
        let fx = fixture(None).await;
        let client = Arc::new(
            SimulatedClient::new()
                .with_group("source", ["frank"])
                .with_group("target", ["owner"])
                .fail_invite("frank", ClientError::Api {
                    code: 400,
                    message: "rejected".to_string(),
                }),
        );

        fx.store.candidates().merge(["frank".to_string()]).unwrap();

        let progress = engine(client.clone(), &fx)
            .run(&fx.job, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(progress.added, 0);
        assert_eq!(progress.errors, 1);
        assert!(!fx.store.checkpoint().contains("frank").unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cap_limits_attempts() {
        let fx = fixture(Some(2)).await;
        let names = ["alice", "bob", "carol", "dave", "erin"];
        let client = Arc::new(
            SimulatedClient::new()
                .with_group("source", names)
                .with_group("target", ["owner"]),
        );

        fx.store
            .candidates()
            .merge(names.iter().map(|n| n.to_string()))
            .unwrap();

        let progress = engine(client.clone(), &fx)
            .run(&fx.job, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(progress.added, 2);
        assert_eq!(client.invites().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_resolution_failure_is_fatal() {
        let fx = fixture(None).await;
        let client = Arc::new(SimulatedClient::new().with_group("source", ["alice"]));

        fx.store.candidates().merge(["alice".to_string()]).unwrap();

        let err = engine(client, &fx)
            .run(&fx.job, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("target group"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_counters_persisted_to_job_record() {
        let fx = fixture(None).await;
        let client = Arc::new(
            SimulatedClient::new()
                .with_group("source", ["alice", "bob"])
                .with_group("target", ["owner"])
                .fail_invite("bob", ClientError::Network("reset".to_string())),
        );

        fx.store
            .candidates()
            .merge(["alice".to_string(), "bob".to_string()])
            .unwrap();

        let progress = engine(client, &fx)
            .run(&fx.job, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(progress.added, 1);
        assert_eq!(progress.errors, 1);

        let record = fx.state.get_job_required(&fx.job.id).await.unwrap();
        assert_eq!(record.added, 1);
        assert_eq!(record.errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_invite_suppresses_join_notice() {
        let fx = fixture(None).await;
        let client = Arc::new(
            SimulatedClient::new()
                .with_group("source", ["alice"])
                .with_group("target", ["owner"]),
        );

        fx.store.candidates().merge(["alice".to_string()]).unwrap();

        engine(client.clone(), &fx)
            .run(&fx.job, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(client.deleted_messages().len(), 1);
    }

    /// Delegating client that sets the cancel token during the first invite,
    /// for observing that no further item is attempted.
    struct CancelOnInvite {
        inner: SimulatedClient,
        cancel: CancelToken,
    }

    #[async_trait]
    impl GroupClient for CancelOnInvite {
        async fn resolve_group(&self, name: &str) -> Result<Group, ClientError> {
            self.inner.resolve_group(name).await
        }
        async fn resolve_user(&self, username: &str) -> Result<User, ClientError> {
            self.inner.resolve_user(username).await
        }
        async fn list_admins(&self, group: &Group) -> Result<HashSet<i64>, ClientError> {
            self.inner.list_admins(group).await
        }
        async fn participants(&self, group: &Group) -> Result<Vec<Member>, ClientError> {
            self.inner.participants(group).await
        }
        async fn is_participant(&self, group: &Group, user: &User) -> Result<bool, ClientError> {
            self.inner.is_participant(group, user).await
        }
        async fn invite(
            &self,
            group: &Group,
            user: &User,
        ) -> Result<Option<MessageRef>, ClientError> {
            self.cancel.cancel();
            self.inner.invite(group, user).await
        }
        async fn delete_message(&self, group: &Group, message: MessageRef) -> Result<(), ClientError> {
            self.inner.delete_message(group, message).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_after_item_prevents_next_attempt() {
        let fx = fixture(None).await;
        let cancel = CancelToken::new();
        let client = Arc::new(CancelOnInvite {
            inner: SimulatedClient::new()
                .with_group("source", ["alice", "bob", "carol"])
                .with_group("target", ["owner"]),
            cancel: cancel.clone(),
        });

        fx.store
            .candidates()
            .merge(["alice".to_string(), "bob".to_string(), "carol".to_string()])
            .unwrap();

        let progress = engine(client.clone(), &fx).run(&fx.job, &cancel).await.unwrap();

        // The stop was requested while alice was being invited; bob and carol
        // must never reach the remote at all
        assert_eq!(progress.added, 1);
        assert_eq!(client.inner.invites().len(), 1);

        // Progress committed before the stop is retained
        let record = fx.state.get_job_required(&fx.job.id).await.unwrap();
        assert_eq!(record.added, 1);
    }
}
