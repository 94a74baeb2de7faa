//! Batch dispatch — resolve, allocate, enqueue, attempt, record.
//!
//! One recipient's failure never aborts its siblings: every attempt
//! outcome is caught at this boundary, written onto the queue entry and
//! the usage counter, and only surfaces as aggregate counts. Batches
//! above the configured threshold are queued whole and left for the
//! drain pass so a triggering request is not blocked by delivery I/O.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate, Utc};
use outreach_core::config::DispatchConfig;
use outreach_core::error::{FailureKind, OutreachError, Result};
use outreach_core::queue::{EntryStatus, QueueEntry, RecipientRef};
use outreach_core::traits::{CredentialStore, Notifier, OutboundMessage, Transport};
use outreach_core::types::{
    EmailTemplate, Recipient, ScheduledTask, SendingIdentity, TriggerOrigin,
};
use outreach_store::Store;

use crate::escalate::{Escalator, RunEscalation};
use crate::quota::QuotaLedger;
use crate::recipients::RecipientResolver;
use crate::render;

/// How a dispatch call handled delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Entries were attempted inline.
    Sync,
    /// Entries were created `pending` for the drain pass.
    Queued,
}

/// Per-entry outcome detail.
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub entry_id: String,
    pub recipient: String,
    pub identity: String,
    pub status: EntryStatus,
    pub failure_kind: Option<FailureKind>,
    pub failure_reason: Option<String>,
}

/// What one dispatch call did.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub mode: DispatchMode,
    pub total_recipients: u32,
    pub success_count: u32,
    pub failed_count: u32,
    /// Recipients no identity had capacity for — reported, not dropped.
    pub shortfall: u32,
    /// Entry ids created by a queued-mode call, for status polling.
    pub queued_entry_ids: Vec<String>,
    pub items: Vec<ItemOutcome>,
}

impl DispatchReport {
    fn empty(mode: DispatchMode) -> Self {
        Self {
            mode,
            total_recipients: 0,
            success_count: 0,
            failed_count: 0,
            shortfall: 0,
            queued_entry_ids: Vec::new(),
            items: Vec::new(),
        }
    }

    /// Failures chargeable to this run, shortfall included.
    pub fn run_failures(&self) -> u32 {
        self.failed_count + self.shortfall
    }

    /// One operator-readable line: counts plus top error categories.
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{}/{} delivered",
            self.success_count, self.total_recipients
        );
        if self.shortfall > 0 {
            line.push_str(&format!(", {} over capacity", self.shortfall));
        }
        if !self.queued_entry_ids.is_empty() {
            line.push_str(&format!(", {} queued", self.queued_entry_ids.len()));
        }
        let mut by_kind: HashMap<FailureKind, u32> = HashMap::new();
        for item in &self.items {
            if let Some(kind) = item.failure_kind {
                *by_kind.entry(kind).or_default() += 1;
            }
        }
        if !by_kind.is_empty() {
            let mut kinds: Vec<(FailureKind, u32)> = by_kind.into_iter().collect();
            kinds.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.as_str().cmp(b.0.as_str())));
            let top: Vec<String> = kinds
                .iter()
                .take(3)
                .map(|(kind, count)| format!("{kind}({count})"))
                .collect();
            line.push_str(&format!(", top errors: {}", top.join(", ")));
        }
        line
    }
}

/// Aggregate status of an async batch, for polling.
#[derive(Debug, Clone)]
pub struct BatchStatus {
    pub success: u32,
    pub failed: u32,
    pub pending: u32,
    pub total: u32,
    pub completed: bool,
    pub percent: f32,
    pub items: Vec<ItemOutcome>,
}

/// What one drain pass did.
#[derive(Debug, Clone, Default)]
pub struct DrainReport {
    pub attempted: u32,
    pub success: u32,
    pub failed: u32,
}

pub struct Dispatcher {
    store: Arc<Store>,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialStore>,
    resolver: RecipientResolver,
    ledger: QuotaLedger,
    escalator: Escalator,
    config: DispatchConfig,
    tz: FixedOffset,
}

impl Dispatcher {
    pub fn new(
        store: Arc<Store>,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialStore>,
        notifier: Arc<dyn Notifier>,
        config: DispatchConfig,
        tz: FixedOffset,
    ) -> Self {
        Self {
            resolver: RecipientResolver::new(store.clone()),
            ledger: QuotaLedger::new(store.clone()),
            escalator: Escalator::new(notifier),
            store,
            transport,
            credentials,
            config,
            tz,
        }
    }

    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }

    /// Calendar date in the schedule offset; daily quotas roll over at
    /// the operator's midnight, not UTC's.
    fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.tz).date_naive()
    }

    /// Run one task's batch.
    pub async fn dispatch_task(
        &self,
        task: &ScheduledTask,
        origin: TriggerOrigin,
    ) -> Result<DispatchReport> {
        let recipients = self.resolver.resolve(task)?;
        if recipients.is_empty() {
            tracing::info!(task = %task.id, "target group resolved empty; nothing to send");
            return Ok(DispatchReport::empty(DispatchMode::Sync));
        }

        let template = self
            .store
            .load_template(&task.template_id)?
            .ok_or_else(|| {
                OutreachError::TemplateRender(format!("template {} not found", task.template_id))
            })?;

        let ids = task.identities.ids();
        let identities = self.store.load_identities_by_ids(&ids)?;
        if identities.is_empty() {
            return Err(OutreachError::Config(format!(
                "task {} has no usable sending identities",
                task.id
            )));
        }

        self.run_batch(
            &recipients,
            &identities,
            &template,
            Some(&task.id),
            &task.owner,
            origin,
        )
        .await
    }

    /// The shared resolve-allocate-enqueue-attempt pipeline.
    async fn run_batch(
        &self,
        recipients: &[Recipient],
        identities: &[SendingIdentity],
        template: &EmailTemplate,
        task_id: Option<&str>,
        owner: &str,
        origin: TriggerOrigin,
    ) -> Result<DispatchReport> {
        let today = self.today();
        let total = recipients.len() as u32;
        let allocation = self.ledger.allocate(identities, total, today)?;

        let mut report = DispatchReport::empty(if recipients.len() > self.config.async_batch_threshold {
            DispatchMode::Queued
        } else {
            DispatchMode::Sync
        });
        report.total_recipients = total;
        report.shortfall = allocation.shortfall;

        // Pair recipients with identities in assignment order: the
        // largest-remaining identity drains its share first.
        let mut paired: Vec<(SendingIdentity, &Recipient)> = Vec::with_capacity(recipients.len());
        let mut cursor = recipients.iter();
        for (identity, count) in &allocation.assignments {
            for _ in 0..*count {
                match cursor.next() {
                    Some(recipient) => paired.push((identity.clone(), recipient)),
                    None => break,
                }
            }
        }

        let run = self.escalator.begin_run();
        for (identity, recipient) in paired {
            let recipient_ref = match recipient {
                Recipient::Candidate(c) => RecipientRef::Candidate(c.id.clone()),
                Recipient::Contact(c) => RecipientRef::Contact(c.id.clone()),
            };
            let mut entry = QueueEntry::new(
                owner,
                &identity.id,
                recipient_ref,
                task_id,
                &template.subject,
                &template.body,
                origin,
            );
            self.store.insert_entry(&entry)?;

            match report.mode {
                DispatchMode::Queued => {
                    report.queued_entry_ids.push(entry.id.clone());
                }
                DispatchMode::Sync => {
                    let item = self
                        .attempt_entry(&mut entry, &identity, recipient, &run, today)
                        .await;
                    if item.status == EntryStatus::Success {
                        report.success_count += 1;
                    } else {
                        report.failed_count += 1;
                    }
                    report.items.push(item);
                }
            }
        }

        tracing::info!(task = ?task_id, "{}", report.summary());
        Ok(report)
    }

    /// One delivery attempt. All failure paths end up recorded on the
    /// entry and the ledger; nothing propagates to the caller.
    async fn attempt_entry(
        &self,
        entry: &mut QueueEntry,
        identity: &SendingIdentity,
        recipient: &Recipient,
        run: &RunEscalation,
        today: NaiveDate,
    ) -> ItemOutcome {
        let result = self.try_deliver(entry, identity, recipient, today).await;

        match &result {
            Ok(()) => {
                if let Err(e) = entry.record_success(Utc::now()) {
                    tracing::warn!(entry = %entry.id, error = %e, "success on settled entry ignored");
                }
                if let Err(e) = self.ledger.record_attempt(&identity.id, today, true) {
                    tracing::warn!(error = %e, "usage counter update failed");
                }
            }
            Err(e) => {
                if let Err(te) = entry.record_failure(e.kind(), &e.to_string()) {
                    tracing::warn!(entry = %entry.id, error = %te, "failure on settled entry ignored");
                }
                if let Err(le) = self.ledger.record_attempt(&identity.id, today, false) {
                    tracing::warn!(error = %le, "usage counter update failed");
                }
                let addr = recipient.email().unwrap_or(recipient.name());
                run.on_failure(identity, addr, e).await;
                tracing::warn!(
                    entry = %entry.id,
                    identity = %identity.address,
                    kind = %e.kind(),
                    "delivery attempt failed: {e}"
                );
            }
        }

        if let Err(e) = self.store.update_entry(entry) {
            tracing::error!(entry = %entry.id, error = %e, "failed to persist attempt outcome");
        }

        ItemOutcome {
            entry_id: entry.id.clone(),
            recipient: recipient.name().to_string(),
            identity: identity.address.clone(),
            status: entry.status,
            failure_kind: entry.failure_kind,
            failure_reason: entry.failure_reason.clone(),
        }
    }

    /// Render late-bound, decrypt, and hand off to the transport.
    async fn try_deliver(
        &self,
        entry: &QueueEntry,
        identity: &SendingIdentity,
        recipient: &Recipient,
        today: NaiveDate,
    ) -> Result<()> {
        // Defensive re-check at send time; the allocator plans against a
        // snapshot that a concurrent run may have consumed since.
        if self.ledger.remaining(identity, today)? == 0 {
            return Err(OutreachError::QuotaExceeded(identity.address.clone()));
        }

        let to = recipient
            .email()
            .ok_or_else(|| {
                OutreachError::RecipientInvalid(format!("{} has no address", recipient.name()))
            })?
            .to_string();

        let context = render::render_context(recipient, Some(identity));
        let message = OutboundMessage {
            to,
            subject: render::render(&entry.subject, &context),
            body: render::render(&entry.body, &context),
        };

        let secret = self.credentials.decrypt(&identity.credential)?;
        self.transport.deliver(identity, &secret, &message).await
    }

    /// Ad-hoc compose path: create a `pending` entry outside any task.
    /// It reuses the same state machine and ledger via the drain pass.
    pub fn create_entry(
        &self,
        owner: &str,
        identity_id: &str,
        recipient: RecipientRef,
        subject: &str,
        body: &str,
        origin: TriggerOrigin,
    ) -> Result<QueueEntry> {
        if self.store.load_identity(identity_id)?.is_none() {
            return Err(OutreachError::Config(format!(
                "unknown sending identity {identity_id}"
            )));
        }
        if self.load_recipient(&recipient)?.is_none() {
            return Err(OutreachError::RecipientInvalid(format!(
                "unknown recipient {}",
                recipient.id()
            )));
        }
        let entry = QueueEntry::new(owner, identity_id, recipient, None, subject, body, origin);
        self.store.insert_entry(&entry)?;
        Ok(entry)
    }

    /// Operator cancellation of a not-yet-attempted entry.
    pub fn cancel_entry(&self, entry_id: &str) -> Result<()> {
        let mut entry = self
            .store
            .load_entry(entry_id)?
            .ok_or_else(|| OutreachError::Storage(format!("entry {entry_id} not found")))?;
        entry.cancel()?;
        self.store.update_entry(&entry)
    }

    /// Attempt queued and retryable entries. Each entry is re-rendered
    /// against the recipient's current attributes. One escalation run
    /// covers the whole pass.
    pub async fn drain_pending(&self) -> Result<DrainReport> {
        let entries = self
            .store
            .load_attemptable_entries(self.config.retry_ceiling, self.config.drain_batch_size)?;
        let mut out = DrainReport::default();
        let today = self.today();
        let run = self.escalator.begin_run();

        for mut entry in entries {
            let Some(identity) = self.store.load_identity(&entry.identity_id)? else {
                entry
                    .record_failure(
                        FailureKind::Configuration,
                        &format!("sending identity {} no longer exists", entry.identity_id),
                    )
                    .ok();
                self.store.update_entry(&entry)?;
                out.attempted += 1;
                out.failed += 1;
                continue;
            };
            let Some(recipient) = self.load_recipient(&entry.recipient)? else {
                entry
                    .record_failure(
                        FailureKind::RecipientInvalid,
                        &format!("recipient {} no longer exists", entry.recipient.id()),
                    )
                    .ok();
                self.store.update_entry(&entry)?;
                out.attempted += 1;
                out.failed += 1;
                continue;
            };

            let item = self
                .attempt_entry(&mut entry, &identity, &recipient, &run, today)
                .await;
            out.attempted += 1;
            if item.status == EntryStatus::Success {
                out.success += 1;
            } else {
                out.failed += 1;
            }
        }

        if out.attempted > 0 {
            tracing::info!(
                attempted = out.attempted,
                success = out.success,
                failed = out.failed,
                "drain pass finished"
            );
        }
        Ok(out)
    }

    /// Aggregate status of an async batch.
    pub fn get_status(&self, entry_ids: &[String]) -> Result<BatchStatus> {
        let entries = self.store.load_entries_by_ids(entry_ids)?;
        let total = entry_ids.len() as u32;
        let mut status = BatchStatus {
            success: 0,
            failed: 0,
            pending: 0,
            total,
            completed: false,
            percent: 0.0,
            items: Vec::with_capacity(entries.len()),
        };
        for entry in &entries {
            match entry.status {
                EntryStatus::Success => status.success += 1,
                EntryStatus::Failed | EntryStatus::Cancelled => status.failed += 1,
                EntryStatus::Pending => status.pending += 1,
            }
            status.items.push(ItemOutcome {
                entry_id: entry.id.clone(),
                recipient: entry.recipient.id().to_string(),
                identity: entry.identity_id.clone(),
                status: entry.status,
                failure_kind: entry.failure_kind,
                failure_reason: entry.failure_reason.clone(),
            });
        }
        let settled = status.success + status.failed;
        status.completed = total > 0 && settled == total;
        status.percent = if total > 0 {
            (settled as f32 / total as f32 * 1000.0).round() / 10.0
        } else {
            0.0
        };
        Ok(status)
    }

    /// Send one probe message through an identity to verify its
    /// configuration end to end.
    pub async fn probe_identity(&self, identity_id: &str, to: &str) -> Result<()> {
        let identity = self
            .store
            .load_identity(identity_id)?
            .ok_or_else(|| OutreachError::Config(format!("unknown identity {identity_id}")))?;
        let secret = self.credentials.decrypt(&identity.credential)?;
        let message = OutboundMessage {
            to: to.to_string(),
            subject: "Outreach connection test".into(),
            body: format!(
                "This is a connection test for {}.\nServer: {}:{}",
                identity.address, identity.smtp_host, identity.smtp_port
            ),
        };
        self.transport.deliver(&identity, &secret, &message).await
    }

    fn load_recipient(&self, recipient: &RecipientRef) -> Result<Option<Recipient>> {
        Ok(match recipient {
            RecipientRef::Candidate(id) => {
                self.store.load_candidate(id)?.map(Recipient::Candidate)
            }
            RecipientRef::Contact(id) => self.store.load_contact(id)?.map(Recipient::Contact),
        })
    }
}
