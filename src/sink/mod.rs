//! Metrics sink: value delivery plus the JSON-RPC control plane
//!
//! ## Delivery paths
//!
//! - **Plain socket** (`tls_connect = unencrypted`): binary sender protocol over TCP
//! - **External tool** (`psk` / `cert`): the sender tool handles transport security
//!
//! Delivery never returns an error; it reports a [`DeliveryOutcome`] the caller must
//! inspect. Control-plane calls return [`SinkResult`] and fail with
//! [`SinkError::NotAuthenticated`] while no login succeeds.

pub mod api;
pub mod error;
pub mod point;
pub mod protocol;
pub mod sender;

use serde::Serialize;
use tracing::{debug, error, info, instrument};

pub use api::ControlApi;
pub use error::{SinkError, SinkResult};
pub use point::{DataPoint, MetricValue};
pub use protocol::ProcessedInfo;
pub use sender::{ExternalToolSender, SocketSender, ValueSender, sender_for};

use crate::config::SinkConfig;
use crate::util::item_key;

/// Result of a value delivery
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered {
        processed: usize,
        transport: &'static str,
    },
    Failed {
        error: String,
    },
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            DeliveryOutcome::Delivered { .. } => None,
            DeliveryOutcome::Failed { error } => Some(error),
        }
    }
}

pub struct MetricsSinkClient {
    sender: Box<dyn ValueSender>,
    api: ControlApi,
    item_key_prefix: String,
}

impl std::fmt::Debug for MetricsSinkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsSinkClient")
            .field("sender", &self.sender.name())
            .field("api", &self.api)
            .field("item_key_prefix", &self.item_key_prefix)
            .finish()
    }
}

impl MetricsSinkClient {
    pub fn new(config: &SinkConfig) -> SinkResult<Self> {
        Self::with_sender(config, sender_for(config))
    }

    /// Uses `sender` instead of the transport derived from `config`.
    pub fn with_sender(config: &SinkConfig, sender: Box<dyn ValueSender>) -> SinkResult<Self> {
        let api = ControlApi::new(config)?;
        info!(
            "metrics sink {}:{} using {} transport",
            config.server,
            config.port,
            sender.name()
        );

        Ok(Self {
            sender,
            api,
            item_key_prefix: config.item_key_prefix.clone(),
        })
    }

    pub fn control_api(&self) -> &ControlApi {
        &self.api
    }

    /// Item key for a queue metric, e.g. `rabbitmq.queue.size[/,jobs]`.
    pub fn item_key(&self, metric: &str, vhost: &str, queue: &str) -> String {
        item_key(&self.item_key_prefix, metric, vhost, queue)
    }

    pub async fn send_value(
        &self,
        host: &str,
        key: &str,
        value: impl Into<MetricValue>,
    ) -> DeliveryOutcome {
        self.send_values(&[DataPoint::new(host, key, value)]).await
    }

    /// Sends every point in a single exchange.
    #[instrument(skip(self, points), fields(points = points.len()))]
    pub async fn send_values(&self, points: &[DataPoint]) -> DeliveryOutcome {
        match self.sender.send(points).await {
            Ok(info) => {
                debug!(
                    "delivered {} values via {} transport",
                    info.processed,
                    self.sender.name()
                );
                DeliveryOutcome::Delivered {
                    processed: info.processed,
                    transport: self.sender.name(),
                }
            }
            Err(e) => {
                error!("failed to deliver {} values: {e}", points.len());
                DeliveryOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    pub async fn authenticate(&self) -> SinkResult<String> {
        self.api.authenticate().await
    }

    pub async fn item_exists(&self, host: &str, key: &str) -> SinkResult<bool> {
        self.api.item_exists(host, key).await
    }

    pub async fn create_item(&self, host: &str, key: &str, name: Option<&str>) -> SinkResult<String> {
        self.api.create_item(host, key, name).await
    }

    /// Creates the item when missing; returns whether it had to be created.
    pub async fn ensure_item(&self, host: &str, key: &str) -> SinkResult<bool> {
        if self.api.item_exists(host, key).await? {
            return Ok(false);
        }
        self.api.create_item(host, key, None).await?;
        Ok(true)
    }

    pub async fn get_last_value(&self, host: &str, key: &str) -> SinkResult<Option<i64>> {
        self.api.get_last_value(host, key).await
    }

    pub async fn get_last_two_values(
        &self,
        host: &str,
        key: &str,
    ) -> SinkResult<(Option<i64>, Option<i64>)> {
        self.api.get_last_two_values(host, key).await
    }
}
