//! Group protocol client boundary
//!
//! The pipeline talks to the messaging platform exclusively through the
//! [`GroupClient`] trait. Connection, authentication and the wire protocol
//! itself live behind it; this crate ships the deterministic
//! [`SimulatedClient`] backend, and a protocol-compliant backend can be
//! plugged in without touching the pipeline.

mod error;
pub mod sim;

pub use error::ClientError;
pub use sim::SimulatedClient;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use eyre::Result;
use tracing::debug;

use crate::config::ClientConfig;

/// Reference to a service message in a group (for best-effort cleanup)
pub type MessageRef = i64;

/// A resolved group entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    /// Platform identifier
    pub id: i64,
    /// Name the group was resolved from
    pub name: String,
}

/// A resolved user entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Platform identifier
    pub id: i64,
    /// Public username
    pub username: String,
}

/// One participant row from a group roster enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Platform identifier
    pub id: i64,
    /// Public username, if the account has one
    pub username: Option<String>,
    /// Whether the account is a bot
    pub is_bot: bool,
    /// Whether the account is marked deleted
    pub is_deleted: bool,
}

impl Member {
    /// Whether this participant is a harvesting candidate: a real, live
    /// account with a public username. Admin filtering happens separately
    /// against the group's admin set.
    pub fn is_eligible(&self) -> bool {
        !self.is_bot
            && !self.is_deleted
            && self.username.as_deref().is_some_and(|u| !u.is_empty())
    }
}

/// Narrow interface to the messaging platform.
///
/// One client instance serves one authenticated session. Roster enumeration
/// may be called concurrently; invitation calls must not overlap (the engine
/// guarantees this by processing candidates strictly one at a time).
#[async_trait]
pub trait GroupClient: Send + Sync {
    /// Resolve a group identifier to an entity
    async fn resolve_group(&self, name: &str) -> Result<Group, ClientError>;

    /// Resolve a username to a user entity
    async fn resolve_user(&self, username: &str) -> Result<User, ClientError>;

    /// Enumerate the administrator user ids of a group
    async fn list_admins(&self, group: &Group) -> Result<HashSet<i64>, ClientError>;

    /// Enumerate all participants of a group
    async fn participants(&self, group: &Group) -> Result<Vec<Member>, ClientError>;

    /// Check whether a user is already a participant of a group
    async fn is_participant(&self, group: &Group, user: &User) -> Result<bool, ClientError>;

    /// Invite a user into a group.
    ///
    /// Returns the service-message reference the platform produced for the
    /// join, if any, so the caller can suppress it.
    async fn invite(&self, group: &Group, user: &User) -> Result<Option<MessageRef>, ClientError>;

    /// Delete a service message. Best-effort: callers swallow failures.
    async fn delete_message(&self, group: &Group, message: MessageRef) -> Result<(), ClientError>;
}

/// Create a client for the configured provider
pub fn create_client(config: &ClientConfig) -> Result<Arc<dyn GroupClient>> {
    debug!(provider = %config.provider, "create_client: called");
    match config.provider.as_str() {
        "simulated" => Ok(Arc::new(SimulatedClient::new())),
        other => Err(eyre::eyre!(
            "Unknown client provider '{}'. Supported: simulated",
            other
        )),
    }
}
