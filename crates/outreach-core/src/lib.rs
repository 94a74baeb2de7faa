//! # Outreach Core
//!
//! Shared foundation for the Outreach campaign engine: the failure
//! taxonomy, configuration, domain types, the dispatch-queue entry
//! state machine, and the transport/notifier seams implemented by the
//! channel and security crates.

pub mod config;
pub mod error;
pub mod queue;
pub mod traits;
pub mod types;

pub use config::OutreachConfig;
pub use error::{FailureKind, OutreachError, Result};
pub use queue::{EntryStatus, QueueEntry, RecipientRef};
pub use traits::{CredentialStore, EscalationAlert, Notifier, OutboundMessage, Transport};
pub use types::{
    Cadence, Candidate, Contact, EmailTemplate, Gender, IdentitySelection, Recipient,
    RecipientGroup, ScheduledTask, SendingIdentity, TargetRef, TaskStatus, TlsMode, TriggerOrigin,
};
