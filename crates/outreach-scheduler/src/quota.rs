//! Quota ledger — per-identity per-day capacity and the batch
//! allocator.
//!
//! Daily caps model provider sending-reputation limits. Allocation is
//! greedy largest-remaining-first: deterministic, O(n log n), and keeps
//! under-utilized identities busy without attempting global optimality.

use std::sync::Arc;

use chrono::NaiveDate;
use outreach_core::error::Result;
use outreach_core::types::SendingIdentity;
use outreach_store::Store;

pub struct QuotaLedger {
    store: Arc<Store>,
}

/// Result of spreading a batch across identities.
#[derive(Debug, Clone)]
pub struct Allocation {
    /// (identity, count) pairs in drain order.
    pub assignments: Vec<(SendingIdentity, u32)>,
    /// Messages no identity had capacity for. Reported, never silently
    /// dropped.
    pub shortfall: u32,
}

impl Allocation {
    pub fn total_assigned(&self) -> u32 {
        self.assignments.iter().map(|(_, n)| n).sum()
    }
}

/// One identity's daily usage summary for operator display.
#[derive(Debug, Clone)]
pub struct IdentityUsage {
    pub address: String,
    pub daily_limit: u32,
    pub sent: u32,
    pub failed: u32,
    pub remaining: u32,
    pub exceeded: bool,
}

impl QuotaLedger {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Capacity left today: `max(0, limit − sent)`.
    pub fn remaining(&self, identity: &SendingIdentity, day: NaiveDate) -> Result<u32> {
        let usage = self.store.usage_for(&identity.id, day)?;
        Ok(identity.daily_limit.saturating_sub(usage.sent))
    }

    /// Spread `total` messages over `identities`, largest remaining
    /// first. When the caller restricts the identity set, allocation is
    /// confined to it.
    pub fn allocate(
        &self,
        identities: &[SendingIdentity],
        total: u32,
        day: NaiveDate,
    ) -> Result<Allocation> {
        let mut with_capacity: Vec<(SendingIdentity, u32)> = Vec::with_capacity(identities.len());
        for identity in identities {
            let remaining = self.remaining(identity, day)?;
            if remaining > 0 {
                with_capacity.push((identity.clone(), remaining));
            }
        }
        // Ties break on address so allocation order is stable across runs.
        with_capacity.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.address.cmp(&b.0.address)));

        let mut assignments = Vec::new();
        let mut still_needed = total;
        for (identity, remaining) in with_capacity {
            if still_needed == 0 {
                break;
            }
            let take = remaining.min(still_needed);
            still_needed -= take;
            tracing::debug!(identity = %identity.address, count = take, "allocated");
            assignments.push((identity, take));
        }

        if still_needed > 0 {
            tracing::warn!(
                shortfall = still_needed,
                "insufficient daily capacity across identities"
            );
        }
        Ok(Allocation {
            assignments,
            shortfall: still_needed,
        })
    }

    /// Single-send selection: the identity with the most remaining
    /// capacity that can cover `required`.
    pub fn best_identity(
        &self,
        identities: &[SendingIdentity],
        required: u32,
        day: NaiveDate,
    ) -> Result<Option<SendingIdentity>> {
        let mut best: Option<(SendingIdentity, u32)> = None;
        for identity in identities {
            let remaining = self.remaining(identity, day)?;
            if remaining >= required && best.as_ref().is_none_or(|(_, r)| remaining > *r) {
                best = Some((identity.clone(), remaining));
            }
        }
        Ok(best.map(|(identity, _)| identity))
    }

    /// Record one attempt against the atomic daily counter.
    pub fn record_attempt(&self, identity_id: &str, day: NaiveDate, success: bool) -> Result<()> {
        self.store.record_attempt(identity_id, day, success)
    }

    /// Operator-facing usage table for one owner's identities.
    pub fn identity_status(&self, owner: &str, day: NaiveDate) -> Result<Vec<IdentityUsage>> {
        let identities = self.store.load_identities_for_owner(owner)?;
        let mut out = Vec::with_capacity(identities.len());
        for identity in identities {
            let usage = self.store.usage_for(&identity.id, day)?;
            out.push(IdentityUsage {
                address: identity.address.clone(),
                daily_limit: identity.daily_limit,
                sent: usage.sent,
                failed: usage.failed,
                remaining: identity.daily_limit.saturating_sub(usage.sent),
                exceeded: usage.sent >= identity.daily_limit,
            });
        }
        Ok(out)
    }
}
