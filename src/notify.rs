//! Alert delivery boundary
//!
//! The engine hands over an alert kind and a flat key/value context; rendering and
//! transport belong to the [`Notifier`] implementation.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::NotifierConfig;

/// Flat alert context, e.g. `node`, `vhost`, `queue`, `current_count`
pub type AlertContext = BTreeMap<String, String>;

pub type NotifyResult<T> = Result<T, NotifyError>;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to reach notification endpoint: {0}")]
    Http(#[from] reqwest::Error),

    #[error("notification endpoint answered with status {0}")]
    Status(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    /// Relative increase since the previous observation
    Drift,
    /// Absolute ceiling exceeded
    Threshold,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Drift => "drift",
            AlertKind::Threshold => "threshold",
        }
    }

    /// One-line subject built from the alert context.
    pub fn subject(&self, context: &AlertContext) -> String {
        let field = |name: &str| context.get(name).map(String::as_str).unwrap_or("?");
        let queue = format!("{}/{}", field("vhost"), field("queue"));
        match self {
            AlertKind::Drift => format!(
                "Queue drift on {}: {queue} grew by {}% to {}",
                field("node"),
                field("increase_percentage"),
                field("current_count")
            ),
            AlertKind::Threshold => format!(
                "Queue threshold on {}: {queue} holds {} messages (limit {})",
                field("node"),
                field("current_count"),
                field("threshold")
            ),
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, kind: AlertKind, context: &AlertContext) -> NotifyResult<()>;
}

/// Builds the configured notifier, falling back to log output.
pub fn notifier_for(config: Option<&NotifierConfig>, timeout: Duration) -> NotifyResult<Box<dyn Notifier>> {
    match config {
        Some(NotifierConfig::Webhook { url }) => Ok(Box::new(WebhookNotifier::new(url.clone(), timeout)?)),
        Some(NotifierConfig::Log) | None => Ok(Box::new(LogNotifier)),
    }
}

/// POSTs every alert as JSON to a fixed URL
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout: Duration) -> NotifyResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[instrument(skip(self, context))]
    async fn notify(&self, kind: AlertKind, context: &AlertContext) -> NotifyResult<()> {
        let payload = json!({
            "alert_type": kind,
            "subject": kind.subject(context),
            "context": context,
            "timestamp": Utc::now().to_rfc3339()
        });

        let response = self.client.post(&self.url).json(&payload).send().await?;
        if response.status().is_success() {
            info!("sent {kind} alert");
            Ok(())
        } else {
            warn!("{kind} alert rejected with status {}", response.status());
            Err(NotifyError::Status(response.status().as_u16()))
        }
    }
}

/// Writes alerts to the log only
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, kind: AlertKind, context: &AlertContext) -> NotifyResult<()> {
        warn!(alert_type = %kind, ?context, "{}", kind.subject(context));
        Ok(())
    }
}
