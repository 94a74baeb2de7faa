//! Domain types: scheduled tasks, sending identities, recipients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OutreachError, Result};

/// A recurring (or one-shot) campaign definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    /// Unique task ID.
    pub id: String,
    /// Owning operator.
    pub owner: String,
    /// Human-readable name.
    pub name: String,
    /// Which group of recipients this campaign targets.
    pub target: TargetRef,
    /// Template providing subject/body with placeholders.
    pub template_id: String,
    /// One identity, or a pool spread by remaining capacity.
    pub identities: IdentitySelection,
    /// When/how the task fires.
    pub cadence: Cadence,
    /// First (or only) firing; also carries the hour:minute slot for
    /// recurring cadences.
    pub start_time: DateTime<Utc>,
    /// After this instant the task is completed without sending.
    pub end_time: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub total_executions: u32,
    pub successful_executions: u32,
    pub failed_executions: u32,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Target group reference. The enum makes candidate-group XOR
/// contact-group structural rather than a validation afterthought.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "group_id", rename_all = "snake_case")]
pub enum TargetRef {
    CandidateGroup(String),
    ContactGroup(String),
}

impl TargetRef {
    pub fn group_id(&self) -> &str {
        match self {
            Self::CandidateGroup(id) | Self::ContactGroup(id) => id,
        }
    }
}

/// Which sending identities a task may use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "ids", rename_all = "snake_case")]
pub enum IdentitySelection {
    /// One fixed identity.
    Single(String),
    /// A pool the allocator spreads across by remaining capacity.
    Pool(Vec<String>),
}

impl IdentitySelection {
    pub fn ids(&self) -> Vec<&str> {
        match self {
            Self::Single(id) => vec![id.as_str()],
            Self::Pool(ids) => ids.iter().map(|s| s.as_str()).collect(),
        }
    }
}

/// When/how a task fires. Weekdays are 0=Mon..6=Sun.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cadence", rename_all = "snake_case")]
pub enum Cadence {
    Once,
    Daily,
    Weekly { weekdays: Vec<u8> },
    Monthly { day_of_month: u32 },
    /// Driven by an external trigger; the resolver never computes a
    /// next-run for it.
    Custom,
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "paused" => Self::Paused,
            "completed" => Self::Completed,
            "cancelled" => Self::Cancelled,
            _ => Self::Active,
        }
    }
}

impl ScheduledTask {
    /// Create an active task firing per `cadence` from `start_time`.
    pub fn new(
        owner: &str,
        name: &str,
        target: TargetRef,
        template_id: &str,
        identities: IdentitySelection,
        cadence: Cadence,
        start_time: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner: owner.to_string(),
            name: name.to_string(),
            target,
            template_id: template_id.to_string(),
            identities,
            cadence,
            start_time,
            end_time: None,
            status: TaskStatus::Active,
            enabled: true,
            last_run: None,
            next_run: None,
            total_executions: 0,
            successful_executions: 0,
            failed_executions: 0,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Structural validation an operator-facing layer runs before save.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(OutreachError::Config("task name must not be empty".into()));
        }
        match &self.identities {
            IdentitySelection::Single(id) if id.is_empty() => {
                return Err(OutreachError::Config("sending identity must be set".into()));
            }
            IdentitySelection::Pool(ids) if ids.is_empty() => {
                return Err(OutreachError::Config(
                    "identity pool must contain at least one identity".into(),
                ));
            }
            _ => {}
        }
        match &self.cadence {
            Cadence::Weekly { weekdays } => {
                if weekdays.is_empty() {
                    return Err(OutreachError::Config(
                        "weekly cadence needs at least one weekday".into(),
                    ));
                }
                if weekdays.iter().any(|d| *d > 6) {
                    return Err(OutreachError::Config(
                        "weekdays must be in 0..=6 (Mon..Sun)".into(),
                    ));
                }
            }
            Cadence::Monthly { day_of_month } => {
                if !(1..=31).contains(day_of_month) {
                    return Err(OutreachError::Config(
                        "day_of_month must be in 1..=31".into(),
                    ));
                }
            }
            _ => {}
        }
        if let Some(end) = self.end_time {
            if end <= self.start_time {
                return Err(OutreachError::Config(
                    "end time must be after start time".into(),
                ));
            }
        }
        Ok(())
    }

    /// Whether the runtime should keep a live binding for this task.
    pub fn is_schedulable(&self) -> bool {
        self.enabled && self.status == TaskStatus::Active
    }

    /// Whether the task's window has closed.
    pub fn past_end(&self, now: DateTime<Utc>) -> bool {
        self.end_time.is_some_and(|end| now > end)
    }
}

/// How a queue entry came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOrigin {
    Manual,
    Automatic,
}

impl TriggerOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Automatic => "automatic",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "automatic" { Self::Automatic } else { Self::Manual }
    }
}

/// A credentialed outbound channel with its own daily capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendingIdentity {
    pub id: String,
    pub owner: String,
    /// The address mail is sent from; unique per owner.
    pub address: String,
    /// Display name used in the From header.
    pub sender_name: Option<String>,
    pub smtp_host: String,
    pub smtp_port: u16,
    /// Whether to negotiate TLS at all; the mode is inferred from the
    /// port, see [`SendingIdentity::tls_mode`].
    pub use_tls: bool,
    /// Opaque encrypted credential blob (base64). Only the security
    /// crate can turn this back into a secret.
    pub credential: String,
    pub daily_limit: u32,
    pub signature: Option<String>,
    pub is_default: bool,
}

/// How the SMTP connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    None,
    /// Implicit TLS from the first byte (typically port 465).
    Wrapper,
    /// Plaintext upgraded via STARTTLS (typically ports 587/25).
    StartTls,
}

impl SendingIdentity {
    /// Pick the TLS mode by port, mirroring common provider setups.
    pub fn tls_mode(&self) -> TlsMode {
        if !self.use_tls {
            TlsMode::None
        } else if self.smtp_port == 465 {
            TlsMode::Wrapper
        } else {
            TlsMode::StartTls
        }
    }

    /// From-header value: "Name <addr>" when a sender name is set.
    pub fn from_header(&self) -> String {
        match &self.sender_name {
            Some(name) if !name.is_empty() => format!("{name} <{}>", self.address),
            _ => self.address.clone(),
        }
    }

    /// One-line configuration summary for escalation payloads. Never
    /// includes the credential.
    pub fn summary(&self) -> String {
        format!(
            "{} via {}:{} (tls: {}, daily limit: {})",
            self.address,
            self.smtp_host,
            self.smtp_port,
            match self.tls_mode() {
                TlsMode::None => "off",
                TlsMode::Wrapper => "wrapper",
                TlsMode::StartTls => "starttls",
            },
            self.daily_limit
        )
    }
}

/// Salutation-relevant gender attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other,
    #[default]
    Unknown,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Other => "other",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "male" => Self::Male,
            "female" => Self::Female,
            "other" => Self::Other,
            _ => Self::Unknown,
        }
    }
}

/// A sourced candidate; may carry several addresses, the first one is
/// authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub owner: String,
    pub name: String,
    pub emails: Vec<String>,
    pub gender: Gender,
    pub location: Option<String>,
    pub predicted_position: Option<String>,
    pub keywords: Vec<String>,
}

/// A business contact with a single address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub owner: String,
    pub name: String,
    pub gender: Gender,
    pub email: String,
    pub company: String,
    pub position: Option<String>,
    pub department: Option<String>,
    pub is_active: bool,
}

/// The shape the dispatcher works with: either concrete entity mapped
/// into one interface at the resolver boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recipient {
    Candidate(Candidate),
    Contact(Contact),
}

impl Recipient {
    pub fn id(&self) -> &str {
        match self {
            Self::Candidate(c) => &c.id,
            Self::Contact(c) => &c.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Candidate(c) => &c.name,
            Self::Contact(c) => &c.name,
        }
    }

    /// The one authoritative address, if any.
    pub fn email(&self) -> Option<&str> {
        match self {
            Self::Candidate(c) => c.emails.first().map(|s| s.as_str()).filter(|s| !s.is_empty()),
            Self::Contact(c) => Some(c.email.as_str()).filter(|s| !s.is_empty()),
        }
    }

    pub fn gender(&self) -> Gender {
        match self {
            Self::Candidate(c) => c.gender,
            Self::Contact(c) => c.gender,
        }
    }

    /// Honorific form of address derived from name + gender.
    pub fn salutation(&self) -> String {
        match self.gender() {
            Gender::Male => format!("Mr. {}", self.name()),
            Gender::Female => format!("Ms. {}", self.name()),
            Gender::Other | Gender::Unknown => self.name().to_string(),
        }
    }
}

/// A named recipient collection; membership is evaluated at dispatch
/// time, never when the task is defined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientGroup {
    pub id: String,
    pub owner: String,
    pub name: String,
    pub description: Option<String>,
}

/// Subject/body with `{{ns.field}}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailTemplate {
    pub id: String,
    pub name: String,
    pub subject: String,
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(cadence: Cadence) -> ScheduledTask {
        ScheduledTask::new(
            "op",
            "spring campaign",
            TargetRef::CandidateGroup("g1".into()),
            "t1",
            IdentitySelection::Single("id1".into()),
            cadence,
            Utc::now(),
        )
    }

    #[test]
    fn test_validate_rejects_empty_pool() {
        let mut t = task(Cadence::Daily);
        t.identities = IdentitySelection::Pool(vec![]);
        assert!(t.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_weekdays() {
        assert!(task(Cadence::Weekly { weekdays: vec![] }).validate().is_err());
        assert!(task(Cadence::Weekly { weekdays: vec![7] }).validate().is_err());
        assert!(task(Cadence::Weekly { weekdays: vec![0, 2] }).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_day_of_month() {
        assert!(task(Cadence::Monthly { day_of_month: 0 }).validate().is_err());
        assert!(task(Cadence::Monthly { day_of_month: 32 }).validate().is_err());
        assert!(task(Cadence::Monthly { day_of_month: 31 }).validate().is_ok());
    }

    #[test]
    fn test_tls_mode_by_port() {
        let mut identity = SendingIdentity {
            id: "i1".into(),
            owner: "op".into(),
            address: "a@example.com".into(),
            sender_name: Some("Ann".into()),
            smtp_host: "smtp.example.com".into(),
            smtp_port: 465,
            use_tls: true,
            credential: String::new(),
            daily_limit: 200,
            signature: None,
            is_default: false,
        };
        assert_eq!(identity.tls_mode(), TlsMode::Wrapper);
        identity.smtp_port = 587;
        assert_eq!(identity.tls_mode(), TlsMode::StartTls);
        identity.use_tls = false;
        assert_eq!(identity.tls_mode(), TlsMode::None);
        assert_eq!(identity.from_header(), "Ann <a@example.com>");
    }

    #[test]
    fn test_recipient_email_filtering() {
        let candidate = Recipient::Candidate(Candidate {
            id: "c1".into(),
            owner: "op".into(),
            name: "Wei Chen".into(),
            emails: vec![],
            gender: Gender::Male,
            location: None,
            predicted_position: None,
            keywords: vec![],
        });
        assert!(candidate.email().is_none());
        assert_eq!(candidate.salutation(), "Mr. Wei Chen");
    }
}
