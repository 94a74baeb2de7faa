//! SQLite-backed persistence — survives restarts, supports concurrent
//! access from the runtime, drain passes, and operator actions.
//!
//! Everything durable lives here: scheduled tasks, queue entries, daily
//! usage counters, sending identities, recipients, and templates. Live
//! trigger bindings are deliberately NOT persisted; the runtime rebuilds
//! them from `scheduled_tasks` rows on restart.

mod identities;
mod queue;
mod recipients;
mod tasks;
mod usage;

pub use tasks::RunOutcome;
pub use usage::DailyUsage;

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use outreach_core::error::{OutreachError, Result};
use rusqlite::Connection;

/// The shared store handle. One connection behind a mutex keeps
/// statement execution serialized; counter increments additionally run
/// as single UPSERT statements so they stay atomic even across
/// processes.
pub struct Store {
    pub(crate) conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory database for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS scheduled_tasks (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                name TEXT NOT NULL,
                target_kind TEXT NOT NULL,       -- 'candidate_group' | 'contact_group'
                target_group TEXT NOT NULL,
                template_id TEXT NOT NULL,
                identity_mode TEXT NOT NULL,     -- 'single' | 'pool'
                identity_ids TEXT NOT NULL,      -- JSON array
                cadence TEXT NOT NULL,           -- JSON: {cadence: ..., params}
                start_time TEXT NOT NULL,
                end_time TEXT,
                status TEXT NOT NULL DEFAULT 'active',
                enabled INTEGER NOT NULL DEFAULT 1,
                last_run TEXT,
                next_run TEXT,
                total_executions INTEGER NOT NULL DEFAULT 0,
                successful_executions INTEGER NOT NULL DEFAULT 0,
                failed_executions INTEGER NOT NULL DEFAULT 0,
                description TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS identities (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                address TEXT NOT NULL UNIQUE,
                sender_name TEXT,
                smtp_host TEXT NOT NULL,
                smtp_port INTEGER NOT NULL,
                use_tls INTEGER NOT NULL DEFAULT 1,
                credential TEXT NOT NULL,        -- encrypted blob, base64
                daily_limit INTEGER NOT NULL DEFAULT 200,
                signature TEXT,
                is_default INTEGER NOT NULL DEFAULT 0
            );

            -- Per-identity per-day counters; created lazily, retained.
            CREATE TABLE IF NOT EXISTS daily_usage (
                identity_id TEXT NOT NULL,
                day TEXT NOT NULL,               -- calendar date, YYYY-MM-DD
                sent INTEGER NOT NULL DEFAULT 0,
                failed INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (identity_id, day)
            );

            CREATE TABLE IF NOT EXISTS queue_entries (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                identity_id TEXT NOT NULL,
                recipient_kind TEXT NOT NULL,    -- 'candidate' | 'contact'
                recipient_id TEXT NOT NULL,
                task_id TEXT,
                subject TEXT NOT NULL,           -- stored with placeholders
                body TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                retry_count INTEGER NOT NULL DEFAULT 0,
                failure_reason TEXT,
                failure_kind TEXT,
                origin TEXT NOT NULL DEFAULT 'manual',
                created_at TEXT NOT NULL,
                sent_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_queue_status
                ON queue_entries(status, created_at);

            CREATE TABLE IF NOT EXISTS candidates (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                name TEXT NOT NULL,
                emails TEXT NOT NULL DEFAULT '[]',   -- JSON array
                gender TEXT NOT NULL DEFAULT 'unknown',
                location TEXT,
                predicted_position TEXT,
                keywords TEXT NOT NULL DEFAULT '[]'  -- JSON array
            );

            CREATE TABLE IF NOT EXISTS contacts (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                name TEXT NOT NULL,
                gender TEXT NOT NULL DEFAULT 'unknown',
                email TEXT NOT NULL,
                company TEXT NOT NULL DEFAULT '',
                position TEXT,
                department TEXT,
                is_active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS groups (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,              -- 'candidate' | 'contact'
                description TEXT
            );

            CREATE TABLE IF NOT EXISTS group_members (
                group_id TEXT NOT NULL,
                member_id TEXT NOT NULL,
                PRIMARY KEY (group_id, member_id)
            );

            CREATE TABLE IF NOT EXISTS templates (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                subject TEXT NOT NULL,
                body TEXT NOT NULL
            );
            ",
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub(crate) fn db_err(e: rusqlite::Error) -> OutreachError {
    OutreachError::Storage(e.to_string())
}

pub(crate) fn to_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

pub(crate) fn opt_ts(t: Option<DateTime<Utc>>) -> Option<String> {
    t.map(to_ts)
}

pub(crate) fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_opt_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_and_migrate() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.db")).unwrap();
        assert!(store.load_schedulable_tasks().unwrap().is_empty());
        // Re-opening runs migrations idempotently.
        drop(store);
        let store = Store::open(&dir.path().join("test.db")).unwrap();
        assert!(store.load_schedulable_tasks().unwrap().is_empty());
    }
}
