//! MemberStore - durable roster and invitation-ledger storage
//!
//! Flat-file persistence for the username sets and the invitation ledger that
//! the automation pipeline deduplicates against. All files are append-only in
//! spirit: entries are never removed, and concurrent writers (multiple jobs,
//! the inspection CLI) are serialized with advisory file locks.
//!
//! # Layout
//!
//! ```text
//! {data_dir}/
//! ├── candidates.txt   # harvested usernames, one per line, sorted
//! ├── checkpoint.txt   # usernames already attempted, one per line, sorted
//! └── ledger.csv       # username,destination,timestamp records
//! ```
//!
//! # Example
//!
//! ```ignore
//! use memberstore::MemberStore;
//!
//! let store = MemberStore::open("~/.local/share/memberdaemon")?;
//! let added = store.candidates().merge(["alice".into(), "bob".into()])?;
//! store.ledger().append("alice", "rust_jobs", chrono::Utc::now())?;
//! ```

pub mod cli;
pub mod config;
mod store;

pub use store::{InviteLedger, LedgerEntry, MemberStore, RosterFile};

/// Candidate set file name
pub const CANDIDATES_FILE: &str = "candidates.txt";

/// Checkpoint set file name
pub const CHECKPOINT_FILE: &str = "checkpoint.txt";

/// Invitation ledger file name
pub const LEDGER_FILE: &str = "ledger.csv";
