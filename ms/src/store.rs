//! Core MemberStore implementation

use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use fs2::FileExt;
use std::collections::BTreeSet;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::{CANDIDATES_FILE, CHECKPOINT_FILE, LEDGER_FILE};

/// Header row written to a fresh ledger file
const LEDGER_HEADER: &str = "username,destination,timestamp";

/// A single invitation record from the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Username that was invited
    pub username: String,
    /// Group the username was invited into
    pub destination: String,
    /// ISO-8601 timestamp of the invitation
    pub timestamp: String,
}

/// Flat-file set of usernames, one per line, sorted on write.
///
/// Entries are never removed. Writers take an exclusive advisory lock on a
/// sibling `.lock` file, so concurrent jobs and the inspection CLI cannot
/// interleave partial writes.
#[derive(Debug, Clone)]
pub struct RosterFile {
    path: PathBuf,
}

impl RosterFile {
    /// Create a handle for the given file path (the file need not exist yet)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The underlying file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the full set. A missing file is an empty set.
    pub fn load(&self) -> Result<BTreeSet<String>> {
        if !self.path.exists() {
            return Ok(BTreeSet::new());
        }

        let file = fs::File::open(&self.path)
            .context(format!("Failed to open roster file: {}", self.path.display()))?;
        let reader = BufReader::new(file);

        let mut set = BTreeSet::new();
        for line in reader.lines() {
            let line = line?;
            let name = line.trim();
            if !name.is_empty() {
                set.insert(name.to_string());
            }
        }

        Ok(set)
    }

    /// Union the given usernames into the set and persist.
    ///
    /// Returns the number of names that were not already present. The file is
    /// rewritten sorted under an exclusive lock.
    pub fn merge<I>(&self, names: I) -> Result<usize>
    where
        I: IntoIterator<Item = String>,
    {
        let _guard = LockGuard::acquire(&self.path)?;

        let mut set = self.load()?;
        let before = set.len();
        for name in names {
            let name = name.trim().to_string();
            if !name.is_empty() {
                set.insert(name);
            }
        }
        let added = set.len() - before;

        if added > 0 {
            self.write_sorted(&set)?;
        }

        debug!(path = %self.path.display(), added, total = set.len(), "merged roster file");
        Ok(added)
    }

    /// Add a single username. Returns true if it was newly inserted.
    pub fn append(&self, name: &str) -> Result<bool> {
        Ok(self.merge([name.to_string()])? > 0)
    }

    /// Check membership
    pub fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.load()?.contains(name))
    }

    /// Number of entries
    pub fn len(&self) -> Result<usize> {
        Ok(self.load()?.len())
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn write_sorted(&self, set: &BTreeSet<String>) -> Result<()> {
        let mut contents = String::with_capacity(set.iter().map(|s| s.len() + 1).sum());
        for name in set {
            contents.push_str(name);
            contents.push('\n');
        }
        fs::write(&self.path, contents)
            .context(format!("Failed to write roster file: {}", self.path.display()))
    }
}

/// Append-only CSV ledger of successful invitations.
///
/// The membership test deliberately ignores the destination column: a
/// username recorded for any destination is excluded everywhere.
#[derive(Debug, Clone)]
pub struct InviteLedger {
    path: PathBuf,
}

impl InviteLedger {
    /// Create a handle for the given file path (the file need not exist yet)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The underlying file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record. Creates the file with its header row on first use.
    pub fn append(&self, username: &str, destination: &str, timestamp: DateTime<Utc>) -> Result<()> {
        let _guard = LockGuard::acquire(&self.path)?;

        let fresh = !self.path.exists();
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context(format!("Failed to open ledger: {}", self.path.display()))?;

        if fresh {
            writeln!(file, "{}", LEDGER_HEADER)?;
        }
        writeln!(file, "{},{},{}", username, destination, timestamp.to_rfc3339())?;

        debug!(username, destination, "appended ledger record");
        Ok(())
    }

    /// Whether the username appears in any record, regardless of destination
    pub fn contains(&self, username: &str) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }

        let file = fs::File::open(&self.path)
            .context(format!("Failed to open ledger: {}", self.path.display()))?;
        let reader = BufReader::new(file);

        for line in reader.lines().skip(1) {
            let line = line?;
            if let Some((name, _)) = line.split_once(',')
                && name == username
            {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// All records in file order
    pub fn entries(&self) -> Result<Vec<LedgerEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = fs::File::open(&self.path)
            .context(format!("Failed to open ledger: {}", self.path.display()))?;
        let reader = BufReader::new(file);

        let mut entries = Vec::new();
        for line in reader.lines().skip(1) {
            let line = line?;
            let mut parts = line.splitn(3, ',');
            let (Some(username), Some(destination), Some(timestamp)) =
                (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            entries.push(LedgerEntry {
                username: username.to_string(),
                destination: destination.to_string(),
                timestamp: timestamp.to_string(),
            });
        }

        Ok(entries)
    }

    /// Number of records
    pub fn len(&self) -> Result<usize> {
        Ok(self.entries()?.len())
    }

    /// Whether the ledger has no records
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// The bundled store: candidate set, checkpoint set and invitation ledger
/// under one data directory.
#[derive(Debug, Clone)]
pub struct MemberStore {
    base: PathBuf,
    candidates: RosterFile,
    checkpoint: RosterFile,
    ledger: InviteLedger,
}

impl MemberStore {
    /// Open or create a store at the given directory
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let base = dir.as_ref().to_path_buf();
        fs::create_dir_all(&base).context("Failed to create store directory")?;
        info!(path = %base.display(), "opened member store");

        Ok(Self {
            candidates: RosterFile::new(base.join(CANDIDATES_FILE)),
            checkpoint: RosterFile::new(base.join(CHECKPOINT_FILE)),
            ledger: InviteLedger::new(base.join(LEDGER_FILE)),
            base,
        })
    }

    /// The store's base directory
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Harvested candidate usernames (grows monotonically, shared across jobs)
    pub fn candidates(&self) -> &RosterFile {
        &self.candidates
    }

    /// Usernames already attempted; permanent exclusion across all jobs
    pub fn checkpoint(&self) -> &RosterFile {
        &self.checkpoint
    }

    /// Durable record of successful invitations across all destinations
    pub fn ledger(&self) -> &InviteLedger {
        &self.ledger
    }
}

/// Exclusive advisory lock on `{path}.lock`, released on drop.
struct LockGuard {
    file: fs::File,
}

impl LockGuard {
    fn acquire(target: &Path) -> Result<Self> {
        let lock_path = lock_path_for(target);
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).context("Failed to create store directory")?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .context(format!("Failed to open lock file: {}", lock_path.display()))?;
        file.lock_exclusive()
            .context(format!("Failed to lock: {}", lock_path.display()))?;
        Ok(Self { file })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string());
    name.push_str(".lock");
    target.with_file_name(name)
}
