//! Failure taxonomy shared by every subsystem.
//!
//! Delivery failures are classified into a small set of [`FailureKind`]s
//! that feed batch summaries, escalation payloads, and the retry policy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OutreachError>;

/// All the ways Outreach can fail.
#[derive(Debug, Error)]
pub enum OutreachError {
    /// Bad or incomplete configuration, including credential decryption
    /// failures (an undecryptable secret is a setup problem, not an
    /// authentication rejection by the provider).
    #[error("configuration error: {0}")]
    Config(String),

    /// The mail provider rejected the identity's credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Connection refused, DNS failure, timeout.
    #[error("network error: {0}")]
    Network(String),

    /// An identity's daily capacity is exhausted.
    #[error("daily quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The template source could not be prepared for rendering.
    /// Placeholder substitution itself never fails; this covers a
    /// missing or unloadable template.
    #[error("template error: {0}")]
    TemplateRender(String),

    /// The recipient has no usable address or a malformed one.
    #[error("invalid recipient: {0}")]
    RecipientInvalid(String),

    /// SQLite or serialization trouble in the store.
    #[error("storage error: {0}")]
    Storage(String),

    /// An illegal queue-entry state transition was requested.
    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Unknown(String),
}

impl OutreachError {
    /// Classification used by summaries, escalation, and retry policy.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Config(_) | Self::Io(_) => FailureKind::Configuration,
            Self::Auth(_) => FailureKind::Authentication,
            Self::Network(_) => FailureKind::Network,
            Self::QuotaExceeded(_) => FailureKind::QuotaExceeded,
            Self::TemplateRender(_) => FailureKind::TemplateRender,
            Self::RecipientInvalid(_) => FailureKind::RecipientInvalid,
            Self::Storage(_) | Self::InvalidTransition(_) | Self::Unknown(_) => {
                FailureKind::Unknown
            }
        }
    }
}

/// Failure classification recorded on queue entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    Authentication,
    Network,
    QuotaExceeded,
    TemplateRender,
    RecipientInvalid,
    Unknown,
}

impl FailureKind {
    /// Whether an automatic retry can plausibly succeed. A broken
    /// template or an address-less recipient will fail identically on
    /// every attempt; transient classes may recover.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network | Self::QuotaExceeded | Self::Unknown => true,
            Self::Configuration
            | Self::Authentication
            | Self::TemplateRender
            | Self::RecipientInvalid => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Authentication => "authentication",
            Self::Network => "network",
            Self::QuotaExceeded => "quota_exceeded",
            Self::TemplateRender => "template_render",
            Self::RecipientInvalid => "recipient_invalid",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "configuration" => Self::Configuration,
            "authentication" => Self::Authentication,
            "network" => Self::Network,
            "quota_exceeded" => Self::QuotaExceeded,
            "template_render" => Self::TemplateRender,
            "recipient_invalid" => Self::RecipientInvalid,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            OutreachError::Auth("535 bad credentials".into()).kind(),
            FailureKind::Authentication
        );
        assert_eq!(
            OutreachError::Network("connection refused".into()).kind(),
            FailureKind::Network
        );
        assert_eq!(
            OutreachError::Config("cannot decrypt credential".into()).kind(),
            FailureKind::Configuration
        );
    }

    #[test]
    fn test_retryability() {
        assert!(FailureKind::Network.is_retryable());
        assert!(FailureKind::QuotaExceeded.is_retryable());
        assert!(!FailureKind::TemplateRender.is_retryable());
        assert!(!FailureKind::RecipientInvalid.is_retryable());
        assert!(!FailureKind::Authentication.is_retryable());
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            FailureKind::Configuration,
            FailureKind::Authentication,
            FailureKind::Network,
            FailureKind::QuotaExceeded,
            FailureKind::TemplateRender,
            FailureKind::RecipientInvalid,
            FailureKind::Unknown,
        ] {
            assert_eq!(FailureKind::parse(kind.as_str()), kind);
        }
    }
}
