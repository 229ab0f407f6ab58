//! MemberDaemon - group membership automation daemon
//!
//! MemberDaemon harvests the rosters of source messaging groups, deduplicates
//! candidates against a durable cross-run ledger, and invites them into a
//! target group under pacing and backoff rules shaped to stay inside the
//! remote platform's tolerance.
//!
//! # Core Concepts
//!
//! - **Harvest Concurrently, Invite Sequentially**: one task per source group
//!   fans out; invitations drain strictly one at a time
//! - **Permanent Exclusion**: a username attempted once is checkpointed and
//!   never attempted again, by any job, for any destination
//! - **Cooperative Cancellation**: a stop token is polled between discrete
//!   steps; nothing in flight is preempted
//! - **Progress Survives**: counters and dedup records are committed per item,
//!   so a stop or failure never loses work already done
//!
//! # Modules
//!
//! - [`client`] - protocol client trait, error taxonomy and simulated backend
//! - [`retry`] - rate-limit-aware retry with exponential backoff
//! - [`harvest`] - concurrent source-group scraping
//! - [`engine`] - the sequential invitation engine
//! - [`job`] - job manager and cancellation token
//! - [`state`] - sqlite-backed accounts/jobs behind an actor
//! - [`ipc`] - Unix-socket job-control surface
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod cli;
pub mod client;
pub mod config;
pub mod daemon;
pub mod domain;
pub mod engine;
pub mod harvest;
pub mod ipc;
pub mod job;
pub mod pacing;
pub mod retry;
pub mod state;

// Re-export commonly used types
pub use client::{ClientError, Group, GroupClient, Member, MessageRef, SimulatedClient, User, create_client};
pub use config::{ClientConfig, Config, RetryConfig, StorageConfig};
pub use domain::{Account, Job, JobProgress, JobSpec, JobStatus};
pub use engine::InviteEngine;
pub use harvest::Harvester;
pub use ipc::{DaemonClient, DaemonMessage, DaemonResponse, JobSummary};
pub use job::{CancelToken, JobManager, JobManagerConfig};
pub use pacing::Pacer;
pub use retry::RetryPolicy;
pub use state::{StateManager, StateCommand, StateError};
