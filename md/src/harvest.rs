//! Roster harvesting
//!
//! Fans out one task per source group, filters ineligible accounts, and
//! merges everything new into the shared candidate set. A single group's
//! failure is logged, not fatal: the remaining groups still contribute.

use std::collections::HashSet;
use std::sync::Arc;

use eyre::{Context, Result};
use futures::future::join_all;
use memberstore::MemberStore;
use tracing::{debug, info, warn};

use crate::client::{ClientError, GroupClient};
use crate::job::CancelToken;
use crate::retry::RetryPolicy;

/// Concurrent source-group scraper
pub struct Harvester {
    client: Arc<dyn GroupClient>,
    store: MemberStore,
    retry: RetryPolicy,
}

impl Harvester {
    /// Create a harvester over the given client and store
    pub fn new(client: Arc<dyn GroupClient>, store: MemberStore, retry: RetryPolicy) -> Self {
        Self {
            client,
            store,
            retry,
        }
    }

    /// Scrape all source groups and merge eligible usernames into the
    /// candidate set. Returns the count of newly added usernames.
    ///
    /// The cancellation token is consulted before each group's scrape is
    /// started; groups already in flight run to completion.
    pub async fn harvest(&self, sources: &[String], cancel: &CancelToken) -> Result<usize> {
        let mut handles = Vec::with_capacity(sources.len());

        for source in sources {
            if cancel.is_cancelled() {
                info!("cancellation requested, skipping remaining source groups");
                break;
            }

            let client = self.client.clone();
            let retry = self.retry.clone();
            let source = source.clone();
            handles.push((
                source.clone(),
                tokio::spawn(async move { scrape_group(client, retry, &source).await }),
            ));
        }

        // All-must-finish join: collect what succeeded, log what didn't
        let joined = join_all(
            handles
                .into_iter()
                .map(|(source, handle)| async move { (source, handle.await) }),
        )
        .await;

        let mut merged: HashSet<String> = HashSet::new();
        for (source, outcome) in joined {
            match outcome {
                Ok(Ok(names)) => {
                    debug!(%source, count = names.len(), "scraped source group");
                    merged.extend(names);
                }
                Ok(Err(e)) => {
                    warn!(%source, error = %e, "source group scrape failed");
                }
                Err(e) => {
                    warn!(%source, error = %e, "scrape task panicked");
                }
            }
        }

        let added = self
            .store
            .candidates()
            .merge(merged)
            .context("Failed to persist candidate set")?;

        info!(added, "harvest complete");
        Ok(added)
    }
}

/// Scrape one group: resolve it, fetch its admin set, enumerate participants,
/// and keep the eligible usernames.
async fn scrape_group(
    client: Arc<dyn GroupClient>,
    retry: RetryPolicy,
    source: &str,
) -> Result<HashSet<String>, ClientError> {
    let group = retry.call(|| client.resolve_group(source)).await?;
    let admins = retry.call(|| client.list_admins(&group)).await?;
    let members = retry.call(|| client.participants(&group)).await?;

    let names: HashSet<String> = members
        .into_iter()
        .filter(|m| m.is_eligible() && !admins.contains(&m.id))
        .filter_map(|m| m.username)
        .collect();

    debug!(source, eligible = names.len(), "filtered group roster");
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Member, SimulatedClient};
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

    #[tokio::test]
    async fn test_harvest_merges_across_groups() {
        let temp = TempDir::new().unwrap();
        let store = MemberStore::open(temp.path()).unwrap();
        let client = Arc::new(
            SimulatedClient::new()
                .with_group("g1", ["alice", "bob"])
                .with_group("g2", ["bob", "carol"]),
        );

        let harvester = Harvester::new(client, store.clone(), fast_retry());
        let added = harvester
            .harvest(
                &["g1".to_string(), "g2".to_string()],
                &CancelToken::new(),
            )
            .await
            .unwrap();

        // bob appears in both groups but is counted once
        assert_eq!(added, 3);
        let candidates = store.candidates().load().unwrap();
        assert!(candidates.contains("alice"));
        assert!(candidates.contains("bob"));
        assert!(candidates.contains("carol"));
    }

    #[tokio::test]
    async fn test_harvest_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = MemberStore::open(temp.path()).unwrap();
        let client = Arc::new(SimulatedClient::new().with_group("g1", ["alice", "bob"]));

        let harvester = Harvester::new(client, store.clone(), fast_retry());
        let first = harvester
            .harvest(&["g1".to_string()], &CancelToken::new())
            .await
            .unwrap();
        let second = harvester
            .harvest(&["g1".to_string()], &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(first, 2);
        assert_eq!(second, 0);
    }

    #[tokio::test]
    async fn test_harvest_filters_ineligible() {
        let temp = TempDir::new().unwrap();
        let store = MemberStore::open(temp.path()).unwrap();

        let members = vec![
            Member {
                id: 1,
                username: Some("alice".to_string()),
                is_bot: false,
                is_deleted: false,
            },
            Member {
                id: 2,
                username: Some("helper_bot".to_string()),
                is_bot: true,
                is_deleted: false,
            },
            Member {
                id: 3,
                username: Some("ghost".to_string()),
                is_bot: false,
                is_deleted: true,
            },
            Member {
                id: 4,
                username: None,
                is_bot: false,
                is_deleted: false,
            },
            Member {
                id: 5,
                username: Some("admin_anna".to_string()),
                is_bot: false,
                is_deleted: false,
            },
        ];
        let client = Arc::new(
            SimulatedClient::new()
                .with_group_members("g1", members)
                .with_admins("g1", ["admin_anna"]),
        );

        let harvester = Harvester::new(client, store.clone(), fast_retry());
        let added = harvester
            .harvest(&["g1".to_string()], &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(added, 1);
        assert!(store.candidates().contains("alice").unwrap());
    }

    #[tokio::test]
    async fn test_failed_group_does_not_abort_others() {
        let temp = TempDir::new().unwrap();
        let store = MemberStore::open(temp.path()).unwrap();
        let client = Arc::new(SimulatedClient::new().with_group("g1", ["alice"]));

        let harvester = Harvester::new(client, store.clone(), fast_retry());
        let added = harvester
            .harvest(
                &["missing_group".to_string(), "g1".to_string()],
                &CancelToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(added, 1);
        assert!(store.candidates().contains("alice").unwrap());
    }

    #[tokio::test]
    async fn test_harvest_survives_transient_rate_limit() {
        let temp = TempDir::new().unwrap();
        let store = MemberStore::open(temp.path()).unwrap();
        let client = Arc::new(
            SimulatedClient::new()
                .with_group("busy", ["alice"])
                .fail_group_times(
                    "busy",
                    ClientError::RateLimited {
                        retry_after: Duration::from_millis(1),
                    },
                    2,
                ),
        );

        let harvester = Harvester::new(client, store.clone(), fast_retry());
        let added = harvester
            .harvest(&["busy".to_string()], &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(added, 1);
    }

    #[tokio::test]
    async fn test_cancelled_harvest_scrapes_nothing() {
        let temp = TempDir::new().unwrap();
        let store = MemberStore::open(temp.path()).unwrap();
        let client = Arc::new(SimulatedClient::new().with_group("g1", ["alice"]));

        let cancel = CancelToken::new();
        cancel.cancel();

        let harvester = Harvester::new(client, store.clone(), fast_retry());
        let added = harvester.harvest(&["g1".to_string()], &cancel).await.unwrap();

        assert_eq!(added, 0);
        assert!(store.candidates().load().unwrap().is_empty());
    }
}
