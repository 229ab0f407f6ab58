//! Simulated protocol backend
//!
//! An in-memory [`GroupClient`] implementation with a configurable world:
//! groups, members, admin sets, and scripted per-username failures. The
//! daemon runs against it when `client.provider = "simulated"`, and the
//! pipeline tests drive it directly.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tracing::debug;

use super::{ClientError, Group, GroupClient, Member, MessageRef, User};

/// A scripted failure: returned `remaining` times, or forever when `None`
#[derive(Debug, Clone)]
struct Script {
    error: ClientError,
    remaining: Option<u32>,
}

impl Script {
    /// Take one failure from the script, if any is left
    fn take(&mut self) -> Option<ClientError> {
        match self.remaining {
            None => Some(self.error.clone()),
            Some(0) => None,
            Some(ref mut n) => {
                *n -= 1;
                Some(self.error.clone())
            }
        }
    }
}

#[derive(Debug, Default)]
struct SimGroup {
    id: i64,
    members: Vec<Member>,
    admins: HashSet<i64>,
}

#[derive(Debug, Default)]
struct SimWorld {
    groups: HashMap<String, SimGroup>,
    /// group id -> user ids currently in the group
    memberships: HashMap<i64, HashSet<i64>>,
    /// scripted failures keyed by group name / username
    group_scripts: HashMap<String, Script>,
    resolve_scripts: HashMap<String, Script>,
    invite_scripts: HashMap<String, Script>,
    /// (group name, username) pairs in invitation order
    invites: Vec<(String, String)>,
    /// service-message refs deleted via delete_message
    deleted: Vec<MessageRef>,
}

/// Deterministic in-memory backend
pub struct SimulatedClient {
    world: Mutex<SimWorld>,
    next_id: AtomicI64,
    next_message: AtomicI64,
}

impl Default for SimulatedClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedClient {
    /// Create an empty world
    pub fn new() -> Self {
        Self {
            world: Mutex::new(SimWorld::default()),
            next_id: AtomicI64::new(1),
            next_message: AtomicI64::new(1),
        }
    }

    fn fresh_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Add a group populated with plain (non-bot, non-deleted) members
    pub fn with_group<I, S>(self, name: &str, usernames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let members: Vec<Member> = usernames
            .into_iter()
            .map(|u| Member {
                id: self.fresh_id(),
                username: Some(u.into()),
                is_bot: false,
                is_deleted: false,
            })
            .collect();
        self.with_group_members(name, members)
    }

    /// Add a group with explicit member rows
    pub fn with_group_members(self, name: &str, members: Vec<Member>) -> Self {
        let id = self.fresh_id();
        {
            let mut world = self.world.lock().unwrap();
            let ids: HashSet<i64> = members.iter().map(|m| m.id).collect();
            world.memberships.insert(id, ids);
            world.groups.insert(
                name.to_string(),
                SimGroup {
                    id,
                    members,
                    admins: HashSet::new(),
                },
            );
        }
        self
    }

    /// Mark usernames as administrators of a group added earlier
    pub fn with_admins<I, S>(self, group: &str, usernames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        {
            let mut world = self.world.lock().unwrap();
            if let Some(g) = world.groups.get_mut(group) {
                for name in usernames {
                    let name = name.as_ref();
                    if let Some(m) = g.members.iter().find(|m| m.username.as_deref() == Some(name)) {
                        g.admins.insert(m.id);
                    }
                }
            }
        }
        self
    }

    /// Script group resolution to fail `times` times (then succeed)
    pub fn fail_group_times(self, name: &str, error: ClientError, times: u32) -> Self {
        self.world.lock().unwrap().group_scripts.insert(
            name.to_string(),
            Script {
                error,
                remaining: Some(times),
            },
        );
        self
    }

    /// Script user resolution for a username to always fail
    pub fn fail_resolve(self, username: &str, error: ClientError) -> Self {
        self.world.lock().unwrap().resolve_scripts.insert(
            username.to_string(),
            Script {
                error,
                remaining: None,
            },
        );
        self
    }

    /// Script invitations of a username to always fail
    pub fn fail_invite(self, username: &str, error: ClientError) -> Self {
        self.world.lock().unwrap().invite_scripts.insert(
            username.to_string(),
            Script {
                error,
                remaining: None,
            },
        );
        self
    }

    /// Script invitations of a username to fail `times` times (then succeed)
    pub fn fail_invite_times(self, username: &str, error: ClientError, times: u32) -> Self {
        self.world.lock().unwrap().invite_scripts.insert(
            username.to_string(),
            Script {
                error,
                remaining: Some(times),
            },
        );
        self
    }

    /// Invitations attempted so far, as (group name, username) pairs
    pub fn invites(&self) -> Vec<(String, String)> {
        self.world.lock().unwrap().invites.clone()
    }

    /// Service-message refs deleted so far
    pub fn deleted_messages(&self) -> Vec<MessageRef> {
        self.world.lock().unwrap().deleted.clone()
    }
}

#[async_trait]
impl GroupClient for SimulatedClient {
    async fn resolve_group(&self, name: &str) -> Result<Group, ClientError> {
        debug!(name, "resolve_group: called");
        let mut world = self.world.lock().unwrap();

        if let Some(script) = world.group_scripts.get_mut(name)
            && let Some(err) = script.take()
        {
            return Err(err);
        }

        world
            .groups
            .get(name)
            .map(|g| Group {
                id: g.id,
                name: name.to_string(),
            })
            .ok_or_else(|| ClientError::NotFound(format!("group {}", name)))
    }

    async fn resolve_user(&self, username: &str) -> Result<User, ClientError> {
        debug!(username, "resolve_user: called");
        let mut world = self.world.lock().unwrap();

        if let Some(script) = world.resolve_scripts.get_mut(username)
            && let Some(err) = script.take()
        {
            return Err(err);
        }

        world
            .groups
            .values()
            .flat_map(|g| g.members.iter())
            .find(|m| m.username.as_deref() == Some(username))
            .map(|m| User {
                id: m.id,
                username: username.to_string(),
            })
            .ok_or_else(|| ClientError::NotFound(format!("user {}", username)))
    }

    async fn list_admins(&self, group: &Group) -> Result<HashSet<i64>, ClientError> {
        let world = self.world.lock().unwrap();
        world
            .groups
            .get(&group.name)
            .map(|g| g.admins.clone())
            .ok_or_else(|| ClientError::NotFound(format!("group {}", group.name)))
    }

    async fn participants(&self, group: &Group) -> Result<Vec<Member>, ClientError> {
        let world = self.world.lock().unwrap();
        world
            .groups
            .get(&group.name)
            .map(|g| g.members.clone())
            .ok_or_else(|| ClientError::NotFound(format!("group {}", group.name)))
    }

    async fn is_participant(&self, group: &Group, user: &User) -> Result<bool, ClientError> {
        let world = self.world.lock().unwrap();
        Ok(world
            .memberships
            .get(&group.id)
            .is_some_and(|ids| ids.contains(&user.id)))
    }

    async fn invite(&self, group: &Group, user: &User) -> Result<Option<MessageRef>, ClientError> {
        debug!(group = %group.name, username = %user.username, "invite: called");
        let mut world = self.world.lock().unwrap();
        world.invites.push((group.name.clone(), user.username.clone()));

        if let Some(script) = world.invite_scripts.get_mut(&user.username)
            && let Some(err) = script.take()
        {
            return Err(err);
        }

        world.memberships.entry(group.id).or_default().insert(user.id);
        Ok(Some(self.next_message.fetch_add(1, Ordering::SeqCst)))
    }

    async fn delete_message(&self, _group: &Group, message: MessageRef) -> Result<(), ClientError> {
        self.world.lock().unwrap().deleted.push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_resolve_and_enumerate() {
        let client = SimulatedClient::new()
            .with_group("rust_jobs", ["alice", "bob"])
            .with_admins("rust_jobs", ["alice"]);

        let group = client.resolve_group("rust_jobs").await.unwrap();
        assert_eq!(group.name, "rust_jobs");

        let members = client.participants(&group).await.unwrap();
        assert_eq!(members.len(), 2);

        let admins = client.list_admins(&group).await.unwrap();
        assert_eq!(admins.len(), 1);

        let alice = client.resolve_user("alice").await.unwrap();
        assert!(admins.contains(&alice.id));
    }

    #[tokio::test]
    async fn test_unknown_group_not_found() {
        let client = SimulatedClient::new();
        let err = client.resolve_group("ghost_group").await.unwrap_err();
        assert!(matches!(err, ClientError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_invite_adds_membership() {
        let client = SimulatedClient::new()
            .with_group("source", ["carol"])
            .with_group("target", ["owner"]);

        let target = client.resolve_group("target").await.unwrap();
        let carol = client.resolve_user("carol").await.unwrap();

        assert!(!client.is_participant(&target, &carol).await.unwrap());

        let message = client.invite(&target, &carol).await.unwrap();
        assert!(message.is_some());
        assert!(client.is_participant(&target, &carol).await.unwrap());
        assert_eq!(client.invites().len(), 1);
    }

    #[tokio::test]
    async fn test_scripted_invite_failure_then_success() {
        let client = SimulatedClient::new()
            .with_group("source", ["dave"])
            .with_group("target", ["owner"])
            .fail_invite_times("dave", ClientError::Network("reset".to_string()), 2);

        let target = client.resolve_group("target").await.unwrap();
        let dave = client.resolve_user("dave").await.unwrap();

        assert!(client.invite(&target, &dave).await.is_err());
        assert!(client.invite(&target, &dave).await.is_err());
        assert!(client.invite(&target, &dave).await.is_ok());
    }

    #[tokio::test]
    async fn test_scripted_privacy_restriction_is_sticky() {
        let client = SimulatedClient::new()
            .with_group("source", ["erin"])
            .with_group("target", ["owner"])
            .fail_invite("erin", ClientError::PrivacyRestricted);

        let target = client.resolve_group("target").await.unwrap();
        let erin = client.resolve_user("erin").await.unwrap();

        for _ in 0..3 {
            let err = client.invite(&target, &erin).await.unwrap_err();
            assert!(matches!(err, ClientError::PrivacyRestricted));
        }
    }

    #[tokio::test]
    async fn test_scripted_group_rate_limit_clears() {
        let client = SimulatedClient::new()
            .with_group("busy", ["frank"])
            .fail_group_times(
                "busy",
                ClientError::RateLimited {
                    retry_after: Duration::from_secs(1),
                },
                1,
            );

        let err = client.resolve_group("busy").await.unwrap_err();
        assert!(err.is_rate_limit());

        assert!(client.resolve_group("busy").await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_message_recorded() {
        let client = SimulatedClient::new().with_group("target", ["owner"]);
        let target = client.resolve_group("target").await.unwrap();

        client.delete_message(&target, 99).await.unwrap();
        assert_eq!(client.deleted_messages(), vec![99]);
    }
}
