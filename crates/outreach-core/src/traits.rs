//! Seams implemented by the channel and security crates, mockable in
//! dispatcher tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::types::SendingIdentity;

/// One rendered message ready for delivery.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Delivery transport. The SMTP implementation lives in
/// outreach-channels; tests use a scripted mock.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one message through `identity` using its decrypted
    /// credential. Errors carry the failure classification.
    async fn deliver(
        &self,
        identity: &SendingIdentity,
        secret: &str,
        message: &OutboundMessage,
    ) -> Result<()>;
}

/// Encrypt/decrypt opaque credential blobs. Decryption failure is a
/// configuration-class error, distinct from provider authentication
/// rejection.
pub trait CredentialStore: Send + Sync {
    fn encrypt(&self, secret: &str) -> Result<String>;
    fn decrypt(&self, blob: &str) -> Result<String>;
}

/// Payload of a once-per-run operator escalation.
#[derive(Debug, Clone, Serialize)]
pub struct EscalationAlert {
    /// Address of the identity that failed.
    pub identity: String,
    /// Configuration summary of that identity (host, port, TLS mode,
    /// daily limit) — never the credential.
    pub identity_summary: String,
    /// Who the failing message was addressed to.
    pub recipient: String,
    /// Root-cause description.
    pub reason: String,
    /// Classified failure category.
    pub failure_kind: String,
    /// How many failures the run had accumulated when the alert fired.
    pub failure_count: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Delivers escalation alerts to the operator. Failures here are
/// swallowed and logged by the caller; they never abort a run.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &EscalationAlert) -> Result<()>;
}
