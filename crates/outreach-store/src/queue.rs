//! Queue-entry rows.

use chrono::{DateTime, Utc};
use outreach_core::error::{FailureKind, Result};
use outreach_core::queue::{EntryStatus, QueueEntry, RecipientRef};
use outreach_core::types::TriggerOrigin;
use rusqlite::params;

use crate::{Store, db_err, opt_ts, parse_opt_ts, parse_ts, to_ts};

impl Store {
    /// Insert a fresh entry.
    pub fn insert_entry(&self, entry: &QueueEntry) -> Result<()> {
        let (recipient_kind, recipient_id) = match &entry.recipient {
            RecipientRef::Candidate(id) => ("candidate", id.clone()),
            RecipientRef::Contact(id) => ("contact", id.clone()),
        };
        self.lock()
            .execute(
                "INSERT INTO queue_entries
                 (id, owner, identity_id, recipient_kind, recipient_id, task_id,
                  subject, body, status, retry_count, failure_reason,
                  failure_kind, origin, created_at, sent_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    entry.id,
                    entry.owner,
                    entry.identity_id,
                    recipient_kind,
                    recipient_id,
                    entry.task_id,
                    entry.subject,
                    entry.body,
                    entry.status.as_str(),
                    entry.retry_count,
                    entry.failure_reason,
                    entry.failure_kind.map(|k| k.as_str()),
                    entry.origin.as_str(),
                    to_ts(entry.created_at),
                    opt_ts(entry.sent_at),
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Persist the attempt outcome recorded on the entry.
    pub fn update_entry(&self, entry: &QueueEntry) -> Result<()> {
        self.lock()
            .execute(
                "UPDATE queue_entries SET
                     status = ?1, retry_count = ?2, failure_reason = ?3,
                     failure_kind = ?4, sent_at = ?5
                 WHERE id = ?6",
                params![
                    entry.status.as_str(),
                    entry.retry_count,
                    entry.failure_reason,
                    entry.failure_kind.map(|k| k.as_str()),
                    opt_ts(entry.sent_at),
                    entry.id,
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn load_entry(&self, id: &str) -> Result<Option<QueueEntry>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!("{ENTRY_SELECT} WHERE id = ?1"))
            .map_err(db_err)?;
        let mut rows = stmt.query_map([id], row_to_entry).map_err(db_err)?;
        match rows.next() {
            Some(Ok(entry)) => Ok(Some(entry)),
            Some(Err(e)) => Err(db_err(e)),
            None => Ok(None),
        }
    }

    /// Entries a drain pass may attempt: pending ones, plus failed ones
    /// still under the retry ceiling whose failure class is retryable.
    pub fn load_attemptable_entries(
        &self,
        retry_ceiling: u32,
        limit: usize,
    ) -> Result<Vec<QueueEntry>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "{ENTRY_SELECT} WHERE status = 'pending'
                    OR (status = 'failed' AND retry_count < ?1
                        AND (failure_kind IS NULL OR failure_kind IN
                             ('network', 'quota_exceeded', 'unknown')))
                 ORDER BY created_at LIMIT ?2"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![retry_ceiling, limit as i64], row_to_entry)
            .map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db_err)
    }

    /// Batch status lookup for async-batch polling.
    pub fn load_entries_by_ids(&self, ids: &[String]) -> Result<Vec<QueueEntry>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = std::iter::repeat_n("?", ids.len())
            .collect::<Vec<_>>()
            .join(",");
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!("{ENTRY_SELECT} WHERE id IN ({placeholders})"))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(ids.iter()), row_to_entry)
            .map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db_err)
    }

    /// Retention purge: drop old entries that can no longer change.
    /// Pending entries are never purged.
    pub fn purge_entries_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let count = self
            .lock()
            .execute(
                "DELETE FROM queue_entries
                 WHERE status != 'pending' AND created_at < ?1",
                params![to_ts(cutoff)],
            )
            .map_err(db_err)?;
        Ok(count)
    }
}

const ENTRY_SELECT: &str = "SELECT id, owner, identity_id, recipient_kind, recipient_id, task_id, \
     subject, body, status, retry_count, failure_reason, failure_kind, \
     origin, created_at, sent_at \
     FROM queue_entries";

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueEntry> {
    let recipient_kind: String = row.get(3)?;
    let recipient_id: String = row.get(4)?;
    let recipient = if recipient_kind == "candidate" {
        RecipientRef::Candidate(recipient_id)
    } else {
        RecipientRef::Contact(recipient_id)
    };
    let status: String = row.get(8)?;
    let failure_kind: Option<String> = row.get(11)?;
    let origin: String = row.get(12)?;
    let created_at: String = row.get(13)?;
    let sent_at: Option<String> = row.get(14)?;

    Ok(QueueEntry {
        id: row.get(0)?,
        owner: row.get(1)?,
        identity_id: row.get(2)?,
        recipient,
        task_id: row.get(5)?,
        subject: row.get(6)?,
        body: row.get(7)?,
        status: EntryStatus::parse(&status),
        retry_count: row.get(9)?,
        failure_reason: row.get(10)?,
        failure_kind: failure_kind.map(|k| FailureKind::parse(&k)),
        origin: TriggerOrigin::parse(&origin),
        created_at: parse_ts(&created_at),
        sent_at: parse_opt_ts(sent_at),
    })
}
