//! Seams between the engine and the broker/sink clients

use async_trait::async_trait;

use crate::broker::{BrokerResult, ClusterRegistry, QueueInfo};
use crate::sink::{DataPoint, DeliveryOutcome, MetricsSinkClient, SinkResult};

/// Cluster whose queues are all collected by `collect_all`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredCluster {
    pub id: String,
    pub default_sink_host: String,
}

/// Where current queue counters come from
#[async_trait]
pub trait QueueSource: Send + Sync {
    async fn queue_info(&self, node: &str, vhost: &str, queue: &str) -> BrokerResult<QueueInfo>;

    /// Clusters with monitoring enabled, in configuration order.
    fn monitored_clusters(&self) -> Vec<MonitoredCluster>;

    async fn cluster_queues(&self, cluster_id: &str) -> BrokerResult<Vec<QueueInfo>>;
}

/// Where values are stored and read back
#[async_trait]
pub trait MetricStore: Send + Sync {
    fn item_key(&self, metric: &str, vhost: &str, queue: &str) -> String;

    /// Creates the item when missing; returns whether it was created.
    async fn ensure_item(&self, host: &str, key: &str) -> SinkResult<bool>;

    /// Last stored value of the item, before the current one is sent.
    async fn previous_value(&self, host: &str, key: &str) -> SinkResult<Option<i64>>;

    async fn deliver(&self, points: &[DataPoint]) -> DeliveryOutcome;
}

#[async_trait]
impl QueueSource for ClusterRegistry {
    async fn queue_info(&self, node: &str, vhost: &str, queue: &str) -> BrokerResult<QueueInfo> {
        self.client_for_node(node)?
            .get_queue_info(vhost, queue, Some(node))
            .await
    }

    fn monitored_clusters(&self) -> Vec<MonitoredCluster> {
        self.clusters()
            .filter(|client| client.monitoring_enabled())
            .map(|client| MonitoredCluster {
                id: client.cluster_id().to_string(),
                default_sink_host: client.default_sink_host().to_string(),
            })
            .collect()
    }

    async fn cluster_queues(&self, cluster_id: &str) -> BrokerResult<Vec<QueueInfo>> {
        self.client(cluster_id)?.get_all_queues(None).await
    }
}

#[async_trait]
impl MetricStore for MetricsSinkClient {
    fn item_key(&self, metric: &str, vhost: &str, queue: &str) -> String {
        MetricsSinkClient::item_key(self, metric, vhost, queue)
    }

    async fn ensure_item(&self, host: &str, key: &str) -> SinkResult<bool> {
        MetricsSinkClient::ensure_item(self, host, key).await
    }

    async fn previous_value(&self, host: &str, key: &str) -> SinkResult<Option<i64>> {
        self.get_last_value(host, key).await
    }

    async fn deliver(&self, points: &[DataPoint]) -> DeliveryOutcome {
        self.send_values(points).await
    }
}
