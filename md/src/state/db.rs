//! Sqlite-backed account and job storage
//!
//! Owned exclusively by the [`super::StateManager`] actor; nothing else holds
//! the connection.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{Account, Job, JobStatus};

use super::messages::StateError;

/// Aggregate job statistics for the dashboard-style CLI output
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct JobStats {
    /// Jobs started today (UTC)
    pub runs_today: u64,
    /// Members added by jobs started today
    pub added_today: u64,
    /// Errors from jobs started today
    pub errors_today: u64,
    /// Jobs started in the last 24 hours
    pub runs_last_24h: u64,
    /// Members added in the last 24 hours
    pub added_last_24h: u64,
}

/// The daemon's sqlite store
pub struct JobDb {
    conn: Connection,
}

impl JobDb {
    /// Open (and if needed create) the database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StateError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StateError::Store(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        // The CLI and the daemon may hold connections at the same time
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let db = Self { conn };
        db.init_schema()?;
        info!(path = %path.display(), "opened job database");
        Ok(db)
    }

    /// In-memory database for tests
    pub fn open_in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), StateError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS accounts (
                id            TEXT PRIMARY KEY,
                phone_number  TEXT UNIQUE NOT NULL,
                session_name  TEXT NOT NULL,
                is_active     INTEGER NOT NULL DEFAULT 0,
                created_at    TEXT NOT NULL,
                last_used     TEXT
            );
            CREATE TABLE IF NOT EXISTS jobs (
                id            TEXT PRIMARY KEY,
                account_id    TEXT NOT NULL,
                source_groups TEXT NOT NULL,
                target_group  TEXT NOT NULL,
                delay_min     INTEGER NOT NULL,
                delay_max     INTEGER NOT NULL,
                max_members   INTEGER,
                added         INTEGER NOT NULL DEFAULT 0,
                errors        INTEGER NOT NULL DEFAULT 0,
                status        TEXT NOT NULL,
                started_at    TEXT NOT NULL,
                finished_at   TEXT,
                last_error    TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);",
        )?;
        Ok(())
    }

    // === Accounts ===

    pub fn create_account(&self, account: &Account) -> Result<String, StateError> {
        self.conn.execute(
            "INSERT INTO accounts (id, phone_number, session_name, is_active, created_at, last_used)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                account.id,
                account.phone_number,
                account.session_name,
                account.is_active as i64,
                format_ts(account.created_at),
                account.last_used.map(format_ts),
            ],
        )?;
        debug!(id = %account.id, phone = %account.phone_number, "created account");
        Ok(account.id.clone())
    }

    pub fn get_account(&self, id: &str) -> Result<Option<Account>, StateError> {
        self.conn
            .query_row(
                "SELECT id, phone_number, session_name, is_active, created_at, last_used
                 FROM accounts WHERE id = ?1",
                params![id],
                account_from_row,
            )
            .optional()
            .map_err(StateError::from)?
            .transpose()
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>, StateError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, phone_number, session_name, is_active, created_at, last_used
             FROM accounts ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], account_from_row)?;

        let mut accounts = Vec::new();
        for row in rows {
            accounts.push(row??);
        }
        Ok(accounts)
    }

    /// Make the given account the single active one
    pub fn activate_account(&self, id: &str) -> Result<(), StateError> {
        self.conn.execute("UPDATE accounts SET is_active = 0", [])?;
        let changed = self.conn.execute(
            "UPDATE accounts SET is_active = 1, last_used = ?2 WHERE id = ?1",
            params![id, format_ts(Utc::now())],
        )?;
        if changed == 0 {
            return Err(StateError::NotFound(format!("account {}", id)));
        }
        Ok(())
    }

    pub fn delete_account(&self, id: &str) -> Result<(), StateError> {
        let changed = self
            .conn
            .execute("DELETE FROM accounts WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StateError::NotFound(format!("account {}", id)));
        }
        Ok(())
    }

    // === Jobs ===

    pub fn create_job(&self, job: &Job) -> Result<String, StateError> {
        self.conn.execute(
            "INSERT INTO jobs (id, account_id, source_groups, target_group, delay_min, delay_max,
                               max_members, added, errors, status, started_at, finished_at, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                job.id,
                job.account_id,
                serde_json::to_string(&job.source_groups)?,
                job.target_group,
                job.delay_min as i64,
                job.delay_max as i64,
                job.max_members.map(|m| m as i64),
                job.added as i64,
                job.errors as i64,
                job.status.to_string(),
                format_ts(job.started_at),
                job.finished_at.map(format_ts),
                job.last_error,
            ],
        )?;
        self.conn.execute(
            "UPDATE accounts SET last_used = ?2 WHERE id = ?1",
            params![job.account_id, format_ts(Utc::now())],
        )?;
        debug!(id = %job.id, target = %job.target_group, "created job record");
        Ok(job.id.clone())
    }

    pub fn get_job(&self, id: &str) -> Result<Option<Job>, StateError> {
        self.conn
            .query_row(
                "SELECT id, account_id, source_groups, target_group, delay_min, delay_max,
                        max_members, added, errors, status, started_at, finished_at, last_error
                 FROM jobs WHERE id = ?1",
                params![id],
                job_from_row,
            )
            .optional()
            .map_err(StateError::from)?
            .transpose()
    }

    /// Persist the running counters so observers see live progress
    pub fn update_job_progress(&self, id: &str, added: u64, errors: u64) -> Result<(), StateError> {
        let changed = self.conn.execute(
            "UPDATE jobs SET added = ?2, errors = ?3 WHERE id = ?1",
            params![id, added as i64, errors as i64],
        )?;
        if changed == 0 {
            return Err(StateError::NotFound(format!("job {}", id)));
        }
        Ok(())
    }

    /// Move a job to a terminal status, stamping the finish time
    pub fn finish_job(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), StateError> {
        let changed = self.conn.execute(
            "UPDATE jobs SET status = ?2, finished_at = ?3, last_error = ?4 WHERE id = ?1",
            params![id, status.to_string(), format_ts(Utc::now()), error],
        )?;
        if changed == 0 {
            return Err(StateError::NotFound(format!("job {}", id)));
        }
        Ok(())
    }

    pub fn list_jobs(&self, status_filter: Option<JobStatus>) -> Result<Vec<Job>, StateError> {
        let mut jobs = Vec::new();
        match status_filter {
            Some(status) => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, account_id, source_groups, target_group, delay_min, delay_max,
                            max_members, added, errors, status, started_at, finished_at, last_error
                     FROM jobs WHERE status = ?1 ORDER BY started_at DESC",
                )?;
                let rows = stmt.query_map(params![status.to_string()], job_from_row)?;
                for row in rows {
                    jobs.push(row??);
                }
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, account_id, source_groups, target_group, delay_min, delay_max,
                            max_members, added, errors, status, started_at, finished_at, last_error
                     FROM jobs ORDER BY started_at DESC",
                )?;
                let rows = stmt.query_map([], job_from_row)?;
                for row in rows {
                    jobs.push(row??);
                }
            }
        }
        Ok(jobs)
    }

    pub fn stats(&self) -> Result<JobStats, StateError> {
        let (runs_today, added_today, errors_today) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(added), 0), COALESCE(SUM(errors), 0)
             FROM jobs WHERE DATE(started_at) = DATE('now')",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )?;

        let (runs_24h, added_24h) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(added), 0)
             FROM jobs WHERE julianday(started_at) >= julianday('now', '-1 day')",
            [],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;

        Ok(JobStats {
            runs_today: runs_today as u64,
            added_today: added_today as u64,
            errors_today: errors_today as u64,
            runs_last_24h: runs_24h as u64,
            added_last_24h: added_24h as u64,
        })
    }
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, false)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StateError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StateError::Store(format!("bad timestamp '{}': {}", s, e)))
}

type RowResult<T> = rusqlite::Result<Result<T, StateError>>;

fn account_from_row(row: &rusqlite::Row<'_>) -> RowResult<Account> {
    let created_at: String = row.get(4)?;
    let last_used: Option<String> = row.get(5)?;

    Ok((|| {
        Ok(Account {
            id: row.get(0)?,
            phone_number: row.get(1)?,
            session_name: row.get(2)?,
            is_active: row.get::<_, i64>(3)? != 0,
            created_at: parse_ts(&created_at)?,
            last_used: last_used.as_deref().map(parse_ts).transpose()?,
        })
    })())
}

fn job_from_row(row: &rusqlite::Row<'_>) -> RowResult<Job> {
    let source_groups: String = row.get(2)?;
    let status: String = row.get(9)?;
    let started_at: String = row.get(10)?;
    let finished_at: Option<String> = row.get(11)?;

    Ok((|| {
        Ok(Job {
            id: row.get(0)?,
            account_id: row.get(1)?,
            source_groups: serde_json::from_str(&source_groups)?,
            target_group: row.get(3)?,
            delay_min: row.get::<_, i64>(4)? as u64,
            delay_max: row.get::<_, i64>(5)? as u64,
            max_members: row.get::<_, Option<i64>>(6)?.map(|m| m as u64),
            added: row.get::<_, i64>(7)? as u64,
            errors: row.get::<_, i64>(8)? as u64,
            status: status
                .parse()
                .map_err(|e: String| StateError::Store(e))?,
            started_at: parse_ts(&started_at)?,
            finished_at: finished_at.as_deref().map(parse_ts).transpose()?,
            last_error: row.get(12)?,
        })
    })())
}
