//! SMTP sending via async lettre.
//!
//! The TLS mode follows the identity's port: 465 wraps the connection,
//! 587/25 upgrade via STARTTLS. The transport timeout doubles as the
//! cancellation story for in-flight attempts; a hit is classified as an
//! ordinary network failure.

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message as LettreMessage, Tokio1Executor,
    message::Mailbox, message::header::ContentType,
    transport::smtp::authentication::Credentials,
};
use outreach_core::error::{OutreachError, Result};
use outreach_core::traits::{OutboundMessage, Transport};
use outreach_core::types::{SendingIdentity, TlsMode};

/// SMTP transport shared by all identities; connection parameters come
/// from the identity itself on every send.
pub struct SmtpChannel {
    timeout: std::time::Duration,
}

impl SmtpChannel {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout: std::time::Duration::from_secs(timeout_secs),
        }
    }
}

#[async_trait]
impl Transport for SmtpChannel {
    async fn deliver(
        &self,
        identity: &SendingIdentity,
        secret: &str,
        message: &OutboundMessage,
    ) -> Result<()> {
        let from_mailbox: Mailbox = identity
            .from_header()
            .parse()
            .map_err(|e| OutreachError::Config(format!("invalid from address: {e}")))?;
        let to_mailbox: Mailbox = message
            .to
            .parse()
            .map_err(|e| OutreachError::RecipientInvalid(format!("{}: {e}", message.to)))?;

        let email = LettreMessage::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(&message.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|e| OutreachError::Unknown(format!("build message: {e}")))?;

        let creds = Credentials::new(identity.address.clone(), secret.to_string());

        let builder = match identity.tls_mode() {
            TlsMode::Wrapper => AsyncSmtpTransport::<Tokio1Executor>::relay(&identity.smtp_host)
                .map_err(|e| classify_send_error(&e.to_string()))?,
            TlsMode::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&identity.smtp_host)
                    .map_err(|e| classify_send_error(&e.to_string()))?
            }
            TlsMode::None => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&identity.smtp_host)
            }
        };

        let mailer = builder
            .port(identity.smtp_port)
            .credentials(creds)
            .timeout(Some(self.timeout))
            .build();

        mailer
            .send(email)
            .await
            .map_err(|e| classify_send_error(&e.to_string()))?;

        tracing::info!(identity = %identity.address, to = %message.to, "email sent");
        Ok(())
    }
}

/// Map an SMTP-layer error message onto the failure taxonomy.
pub fn classify_send_error(message: &str) -> OutreachError {
    let lower = message.to_lowercase();
    if lower.contains("535")
        || lower.contains("auth")
        || lower.contains("credential")
        || lower.contains("password")
    {
        OutreachError::Auth(message.to_string())
    } else if lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("connection")
        || lower.contains("refused")
        || lower.contains("network")
        || lower.contains("dns")
        || lower.contains("unreachable")
        || lower.contains("tls")
        || lower.contains("ssl")
    {
        OutreachError::Network(message.to_string())
    } else if lower.contains("recipient") || lower.contains("mailbox") || lower.contains("550") {
        OutreachError::RecipientInvalid(message.to_string())
    } else {
        OutreachError::Unknown(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outreach_core::error::FailureKind;

    #[test]
    fn test_classification_keywords() {
        assert_eq!(
            classify_send_error("535 5.7.8 Username and Password not accepted").kind(),
            FailureKind::Authentication
        );
        assert_eq!(
            classify_send_error("Connection refused (os error 111)").kind(),
            FailureKind::Network
        );
        assert_eq!(
            classify_send_error("operation timed out").kind(),
            FailureKind::Network
        );
        assert_eq!(
            classify_send_error("550 no such mailbox").kind(),
            FailureKind::RecipientInvalid
        );
        assert_eq!(
            classify_send_error("451 try again later").kind(),
            FailureKind::Unknown
        );
    }
}
