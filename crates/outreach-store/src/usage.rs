//! Daily usage counters.
//!
//! The (identity, day) counter is the principal shared mutable resource
//! in the system. Increments run as one UPSERT statement so two runs
//! hitting the same identity on the same day can never lose an update.

use chrono::{NaiveDate, Utc};
use outreach_core::error::Result;
use rusqlite::params;

use crate::{Store, db_err, to_ts};

/// A day's counters for one identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DailyUsage {
    pub sent: u32,
    pub failed: u32,
}

impl Store {
    /// Record one delivery attempt. Created lazily on first attempt of
    /// the day.
    pub fn record_attempt(&self, identity_id: &str, day: NaiveDate, success: bool) -> Result<()> {
        let (sent, failed) = if success { (1, 0) } else { (0, 1) };
        self.lock()
            .execute(
                "INSERT INTO daily_usage (identity_id, day, sent, failed, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(identity_id, day) DO UPDATE SET
                     sent = sent + excluded.sent,
                     failed = failed + excluded.failed,
                     updated_at = excluded.updated_at",
                params![identity_id, day.to_string(), sent, failed, to_ts(Utc::now())],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Counters for (identity, day); zeros when no attempt happened yet.
    pub fn usage_for(&self, identity_id: &str, day: NaiveDate) -> Result<DailyUsage> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT sent, failed FROM daily_usage WHERE identity_id = ?1 AND day = ?2")
            .map_err(db_err)?;
        let mut rows = stmt
            .query_map(params![identity_id, day.to_string()], |row| {
                Ok(DailyUsage {
                    sent: row.get(0)?,
                    failed: row.get(1)?,
                })
            })
            .map_err(db_err)?;
        match rows.next() {
            Some(Ok(usage)) => Ok(usage),
            Some(Err(e)) => Err(db_err(e)),
            None => Ok(DailyUsage::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_creation_and_increment() {
        let store = Store::in_memory().unwrap();
        let day = NaiveDate::from_ymd_opt(2026, 8, 8).unwrap();

        assert_eq!(store.usage_for("i1", day).unwrap(), DailyUsage::default());

        store.record_attempt("i1", day, true).unwrap();
        store.record_attempt("i1", day, true).unwrap();
        store.record_attempt("i1", day, false).unwrap();

        let usage = store.usage_for("i1", day).unwrap();
        assert_eq!(usage.sent, 2);
        assert_eq!(usage.failed, 1);
    }

    #[test]
    fn test_days_are_independent() {
        let store = Store::in_memory().unwrap();
        let monday = NaiveDate::from_ymd_opt(2026, 8, 3).unwrap();
        let tuesday = NaiveDate::from_ymd_opt(2026, 8, 4).unwrap();

        store.record_attempt("i1", monday, true).unwrap();
        assert_eq!(store.usage_for("i1", monday).unwrap().sent, 1);
        assert_eq!(store.usage_for("i1", tuesday).unwrap().sent, 0);
    }
}
