//! Outbound notifications.
//!
//! Delivery failures are reported to the caller, which logs them and moves on. No
//! notifier retries.

use crate::config::NotifyConfig;
use crate::error::{GatewayError, GatewayResult};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const USER_AGENT: &str = concat!("field-gateway/", env!("CARGO_PKG_VERSION"));

/// Sends one message to a set of recipients.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `body` (HTML) with `subject` to `recipients`.
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> GatewayResult<()>;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> GatewayResult<()> {
        tracing::info!(
            recipients = %recipients.join(", "),
            subject,
            body_len = body.len(),
            "Notification (log only)"
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    recipients: &'a [String],
    subject: &'a str,
    body: &'a str,
}

/// POSTs each notification as JSON to a mail relay.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    http_client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    /// Notifier posting to `url`.
    pub fn new(url: impl Into<String>) -> GatewayResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http_client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> GatewayResult<()> {
        let payload = WebhookPayload {
            recipients,
            subject,
            body,
        };
        let response = self.http_client.post(&self.url).json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Notification(format!(
                "relay answered {}: {text}",
                status.as_u16()
            )));
        }
        tracing::debug!(subject, recipients = recipients.len(), "Notification relayed");
        Ok(())
    }
}

/// A notification captured by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    /// Recipients
    pub recipients: Vec<String>,
    /// Subject line
    pub subject: String,
    /// HTML body
    pub body: String,
}

/// Keeps every notification in memory; used by tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
}

impl RecordingNotifier {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far.
    pub async fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> GatewayResult<()> {
        self.sent.lock().await.push(SentNotification {
            recipients: recipients.to_vec(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

/// Notifier selected by configuration: the webhook relay when a URL is set, else the log.
pub fn from_config(config: &NotifyConfig) -> GatewayResult<Arc<dyn Notifier>> {
    match &config.webhook_url {
        Some(url) => {
            tracing::info!(url = %url, "Notifications relayed over HTTP");
            Ok(Arc::new(WebhookNotifier::new(url.clone())?))
        }
        None => {
            tracing::info!("No webhook configured; notifications are logged only");
            Ok(Arc::new(LogNotifier))
        }
    }
}
