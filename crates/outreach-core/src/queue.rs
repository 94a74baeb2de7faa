//! Dispatch-queue entry and its state machine.
//!
//! One entry is the durable record of one message's delivery lifecycle:
//! `pending → {success, failed, cancelled}`. A failed entry may be
//! retried until its retry count reaches a configured ceiling, after
//! which it is inert but still queryable. `cancelled` is reachable only
//! from `pending`; there is no exit from `success`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FailureKind, OutreachError, Result};
use crate::types::TriggerOrigin;

/// Delivery lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Success,
    Failed,
    Cancelled,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "success" => Self::Success,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            _ => Self::Pending,
        }
    }
}

/// Candidate XOR contact reference stored on an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RecipientRef {
    Candidate(String),
    Contact(String),
}

impl RecipientRef {
    pub fn id(&self) -> &str {
        match self {
            Self::Candidate(id) | Self::Contact(id) => id,
        }
    }
}

/// Durable record of one message's delivery lifecycle. Subject/body
/// keep their placeholders; substitution happens at send time so edits
/// to recipient attributes before the actual send are reflected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: String,
    pub owner: String,
    /// Identity the allocator assigned this message to.
    pub identity_id: String,
    pub recipient: RecipientRef,
    /// Task the entry was created for; None for ad-hoc sends.
    pub task_id: Option<String>,
    pub subject: String,
    pub body: String,
    pub status: EntryStatus,
    pub retry_count: u32,
    pub failure_reason: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub origin: TriggerOrigin,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    /// Create a fresh `pending` entry.
    pub fn new(
        owner: &str,
        identity_id: &str,
        recipient: RecipientRef,
        task_id: Option<&str>,
        subject: &str,
        body: &str,
        origin: TriggerOrigin,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner: owner.to_string(),
            identity_id: identity_id.to_string(),
            recipient,
            task_id: task_id.map(|s| s.to_string()),
            subject: subject.to_string(),
            body: body.to_string(),
            status: EntryStatus::Pending,
            retry_count: 0,
            failure_reason: None,
            failure_kind: None,
            origin,
            created_at: Utc::now(),
            sent_at: None,
        }
    }

    /// Whether a delivery attempt may be made right now.
    pub fn attemptable(&self, retry_ceiling: u32) -> bool {
        match self.status {
            EntryStatus::Pending => true,
            EntryStatus::Failed => {
                self.retry_count < retry_ceiling
                    && self.failure_kind.is_none_or(|k| k.is_retryable())
            }
            EntryStatus::Success | EntryStatus::Cancelled => false,
        }
    }

    /// An entry that can never be attempted again but is still
    /// queryable.
    pub fn is_inert(&self, retry_ceiling: u32) -> bool {
        matches!(self.status, EntryStatus::Success | EntryStatus::Cancelled)
            || (self.status == EntryStatus::Failed && !self.attemptable(retry_ceiling))
    }

    /// Record a successful delivery attempt.
    pub fn record_success(&mut self, at: DateTime<Utc>) -> Result<()> {
        match self.status {
            EntryStatus::Pending | EntryStatus::Failed => {
                self.status = EntryStatus::Success;
                self.sent_at = Some(at);
                self.failure_reason = None;
                self.failure_kind = None;
                Ok(())
            }
            other => Err(OutreachError::InvalidTransition(format!(
                "cannot succeed from {}",
                other.as_str()
            ))),
        }
    }

    /// Record a failed delivery attempt. Retry count strictly increases
    /// on every failure.
    pub fn record_failure(&mut self, kind: FailureKind, reason: &str) -> Result<()> {
        match self.status {
            EntryStatus::Pending | EntryStatus::Failed => {
                self.status = EntryStatus::Failed;
                self.retry_count += 1;
                self.failure_kind = Some(kind);
                self.failure_reason = Some(reason.to_string());
                Ok(())
            }
            other => Err(OutreachError::InvalidTransition(format!(
                "cannot fail from {}",
                other.as_str()
            ))),
        }
    }

    /// Operator cancellation, only before any attempt is made.
    pub fn cancel(&mut self) -> Result<()> {
        if self.status == EntryStatus::Pending {
            self.status = EntryStatus::Cancelled;
            Ok(())
        } else {
            Err(OutreachError::InvalidTransition(format!(
                "cannot cancel from {}",
                self.status.as_str()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> QueueEntry {
        QueueEntry::new(
            "op",
            "i1",
            RecipientRef::Contact("c1".into()),
            Some("t1"),
            "Hello {{contact.name}}",
            "Body",
            TriggerOrigin::Automatic,
        )
    }

    #[test]
    fn test_success_from_pending() {
        let mut e = entry();
        e.record_success(Utc::now()).unwrap();
        assert_eq!(e.status, EntryStatus::Success);
        assert!(e.sent_at.is_some());
        // No exit from success.
        assert!(e.record_failure(FailureKind::Network, "late").is_err());
        assert!(e.cancel().is_err());
    }

    #[test]
    fn test_failure_increments_retry() {
        let mut e = entry();
        e.record_failure(FailureKind::Network, "connection refused").unwrap();
        assert_eq!(e.retry_count, 1);
        assert_eq!(e.status, EntryStatus::Failed);
        e.record_failure(FailureKind::Network, "still down").unwrap();
        assert_eq!(e.retry_count, 2);
        assert_eq!(e.failure_reason.as_deref(), Some("still down"));
    }

    #[test]
    fn test_retry_ceiling_makes_entry_inert() {
        let mut e = entry();
        for _ in 0..3 {
            assert!(e.attemptable(3));
            e.record_failure(FailureKind::Network, "down").unwrap();
        }
        assert!(!e.attemptable(3));
        assert!(e.is_inert(3));
        assert_eq!(e.retry_count, 3);
    }

    #[test]
    fn test_non_retryable_failure_is_inert_early() {
        let mut e = entry();
        e.record_failure(FailureKind::RecipientInvalid, "no address").unwrap();
        assert_eq!(e.retry_count, 1);
        assert!(!e.attemptable(3));
        assert!(e.is_inert(3));
    }

    #[test]
    fn test_cancel_only_from_pending() {
        let mut e = entry();
        e.cancel().unwrap();
        assert_eq!(e.status, EntryStatus::Cancelled);
        assert!(!e.attemptable(3));

        let mut f = entry();
        f.record_failure(FailureKind::Network, "down").unwrap();
        assert!(f.cancel().is_err());
    }

    #[test]
    fn test_failed_entry_can_still_succeed() {
        let mut e = entry();
        e.record_failure(FailureKind::Network, "down").unwrap();
        e.record_success(Utc::now()).unwrap();
        assert_eq!(e.status, EntryStatus::Success);
        assert!(e.failure_reason.is_none());
        // Retry count keeps its history.
        assert_eq!(e.retry_count, 1);
    }
}
