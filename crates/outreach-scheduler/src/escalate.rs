//! Failure escalation — at most one operator alert per dispatcher run.
//!
//! The first failure of a run fires the notifier; every later failure
//! in the same run only bumps the counter. A notifier that itself fails
//! is logged and swallowed; escalation never aborts a run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use outreach_core::error::{OutreachError, Result};
use outreach_core::traits::{EscalationAlert, Notifier};
use outreach_core::types::SendingIdentity;

/// Factory handing one [`RunEscalation`] guard to each dispatcher run.
pub struct Escalator {
    notifier: Arc<dyn Notifier>,
}

impl Escalator {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Fresh once-per-run state.
    pub fn begin_run(&self) -> RunEscalation {
        RunEscalation {
            notifier: self.notifier.clone(),
            fired: AtomicBool::new(false),
            failure_count: AtomicU32::new(0),
        }
    }
}

/// Per-run escalation state.
pub struct RunEscalation {
    notifier: Arc<dyn Notifier>,
    fired: AtomicBool,
    failure_count: AtomicU32,
}

impl RunEscalation {
    /// Record a failure; the first one per run notifies the operator.
    pub async fn on_failure(
        &self,
        identity: &SendingIdentity,
        recipient: &str,
        error: &OutreachError,
    ) {
        let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }

        let alert = EscalationAlert {
            identity: identity.address.clone(),
            identity_summary: identity.summary(),
            recipient: recipient.to_string(),
            reason: error.to_string(),
            failure_kind: error.kind().as_str().to_string(),
            failure_count: count,
            occurred_at: Utc::now(),
        };
        if let Err(e) = self.notifier.notify(&alert).await {
            tracing::warn!(error = %e, "escalation notification failed; continuing run");
        }
    }

    pub fn failures(&self) -> u32 {
        self.failure_count.load(Ordering::SeqCst)
    }
}

/// Default notifier: the alert lands in the operator's logs.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &EscalationAlert) -> Result<()> {
        tracing::error!(
            identity = %alert.identity,
            recipient = %alert.recipient,
            kind = %alert.failure_kind,
            reason = %alert.reason,
            config = %alert.identity_summary,
            "delivery failure escalated"
        );
        Ok(())
    }
}

/// POSTs the alert as JSON to a configured webhook.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, alert: &EscalationAlert) -> Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .json(alert)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| OutreachError::Network(format!("escalation webhook: {e}")))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(OutreachError::Network(format!(
                "escalation webhook returned {}",
                resp.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingNotifier {
        alerts: Mutex<Vec<EscalationAlert>>,
        fail: bool,
    }

    impl RecordingNotifier {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                alerts: Mutex::new(Vec::new()),
                fail,
            })
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, alert: &EscalationAlert) -> Result<()> {
            self.alerts.lock().unwrap().push(alert.clone());
            if self.fail {
                Err(OutreachError::Network("webhook down".into()))
            } else {
                Ok(())
            }
        }
    }

    fn identity() -> SendingIdentity {
        SendingIdentity {
            id: "i1".into(),
            owner: "op".into(),
            address: "a@example.com".into(),
            sender_name: None,
            smtp_host: "smtp.example.com".into(),
            smtp_port: 587,
            use_tls: true,
            credential: "blob".into(),
            daily_limit: 200,
            signature: None,
            is_default: false,
        }
    }

    #[tokio::test]
    async fn test_fires_once_per_run() {
        let notifier = RecordingNotifier::new(false);
        let escalator = Escalator::new(notifier.clone());
        let run = escalator.begin_run();

        let err = OutreachError::Auth("535 rejected".into());
        for _ in 0..5 {
            run.on_failure(&identity(), "kim@acme.example", &err).await;
        }

        assert_eq!(notifier.alerts.lock().unwrap().len(), 1);
        assert_eq!(run.failures(), 5);
    }

    #[tokio::test]
    async fn test_new_run_fires_again() {
        let notifier = RecordingNotifier::new(false);
        let escalator = Escalator::new(notifier.clone());
        let err = OutreachError::Network("down".into());

        escalator.begin_run().on_failure(&identity(), "a", &err).await;
        escalator.begin_run().on_failure(&identity(), "b", &err).await;

        assert_eq!(notifier.alerts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_alert_payload() {
        let notifier = RecordingNotifier::new(false);
        let escalator = Escalator::new(notifier.clone());
        let run = escalator.begin_run();
        let err = OutreachError::Auth("535 bad credentials".into());
        run.on_failure(&identity(), "kim@acme.example", &err).await;

        let alerts = notifier.alerts.lock().unwrap();
        let alert = &alerts[0];
        assert_eq!(alert.identity, "a@example.com");
        assert_eq!(alert.recipient, "kim@acme.example");
        assert_eq!(alert.failure_kind, "authentication");
        assert_eq!(alert.failure_count, 1);
        assert!(alert.identity_summary.contains("smtp.example.com:587"));
        assert!(alert.reason.contains("535"));
    }

    #[tokio::test]
    async fn test_notifier_failure_swallowed() {
        let notifier = RecordingNotifier::new(true);
        let escalator = Escalator::new(notifier.clone());
        let run = escalator.begin_run();
        let err = OutreachError::Network("down".into());
        // Must not panic or propagate.
        run.on_failure(&identity(), "a", &err).await;
        run.on_failure(&identity(), "b", &err).await;
        assert_eq!(notifier.alerts.lock().unwrap().len(), 1);
    }
}
