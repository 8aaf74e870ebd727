//! Typed accessors over the management API of one cluster

use std::collections::BTreeMap;

use reqwest::Method;
use serde_json::Value;
use tracing::{debug, error, instrument};

use crate::config::ClusterConfig;
use crate::util::encode_segment;

use super::error::{BrokerError, BrokerResult};
use super::nodes::BrokerNodeSet;
use super::types::{ClusterName, QueueInfo, VHost};

/// Client for a single broker cluster
///
/// All calls go through the cluster's [`BrokerNodeSet`], so a single unreachable
/// node never fails a call on its own.
#[derive(Debug)]
pub struct BrokerClient {
    nodes: BrokerNodeSet,
    description: String,
    monitoring_enabled: bool,
    default_sink_host: String,
}

impl BrokerClient {
    pub fn new(config: &ClusterConfig) -> BrokerResult<Self> {
        let nodes = BrokerNodeSet::new(config)?;
        debug!(
            "initialized broker client for cluster {} with {} nodes",
            config.id,
            config.nodes.len()
        );

        Ok(Self {
            nodes,
            description: config.description.clone(),
            monitoring_enabled: config.monitoring.enabled,
            default_sink_host: config.monitoring.default_sink_host.clone(),
        })
    }

    pub fn cluster_id(&self) -> &str {
        self.nodes.cluster_id()
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring_enabled
    }

    pub fn default_sink_host(&self) -> &str {
        &self.default_sink_host
    }

    pub fn node_set(&self) -> &BrokerNodeSet {
        &self.nodes
    }

    pub fn has_node(&self, hostname: &str) -> bool {
        self.nodes.node(hostname).is_some()
    }

    /// Sink host for a node: the node override, else the cluster default.
    pub fn sink_host_for_node(&self, hostname: &str) -> &str {
        self.nodes
            .node(hostname)
            .and_then(|node| node.sink_host.as_deref())
            .unwrap_or(&self.default_sink_host)
    }

    #[instrument(skip(self), fields(cluster = %self.cluster_id()))]
    pub async fn get_queue_info(
        &self,
        vhost: &str,
        queue: &str,
        node: Option<&str>,
    ) -> BrokerResult<QueueInfo> {
        let path = queue_path(vhost, queue);
        let mut info: QueueInfo = self.nodes.request(Method::GET, &path, node).await?;
        if info.vhost.is_empty() {
            info.vhost = vhost.to_string();
        }
        Ok(info)
    }

    /// Total message count of one queue.
    pub async fn get_queue_message_count(
        &self,
        node: &str,
        vhost: &str,
        queue: &str,
    ) -> BrokerResult<u64> {
        self.get_queue_info(vhost, queue, Some(node))
            .await
            .map(|info| info.messages)
    }

    /// Lists queues cluster-wide or within one vhost.
    #[instrument(skip(self), fields(cluster = %self.cluster_id()))]
    pub async fn get_all_queues(&self, vhost: Option<&str>) -> BrokerResult<Vec<QueueInfo>> {
        let path = match vhost {
            Some(vhost) => format!("queues/{}", encode_segment(vhost)),
            None => String::from("queues"),
        };

        self.nodes
            .request(Method::GET, &path, None)
            .await
            .inspect_err(|e| error!("failed to get queues: {e}"))
    }

    /// `messages_ready` per queue, keyed by `"vhost/queue"`.
    ///
    /// With both arguments a single queue is read, with only `vhost` every queue of
    /// that vhost, and without `vhost` every queue of the cluster (`queue` is then
    /// ignored).
    #[instrument(skip(self), fields(cluster = %self.cluster_id()))]
    pub async fn get_messages_ready_counts(
        &self,
        vhost: Option<&str>,
        queue: Option<&str>,
    ) -> BrokerResult<BTreeMap<String, u64>> {
        let queues = match (vhost, queue) {
            (Some(vhost), Some(queue)) => vec![self.get_queue_info(vhost, queue, None).await?],
            (Some(vhost), None) => self.get_all_queues(Some(vhost)).await?,
            (None, _) => self.get_all_queues(None).await?,
        };

        Ok(queues
            .into_iter()
            .map(|info| {
                let key = match vhost {
                    Some(vhost) => format!("{vhost}/{}", info.name),
                    None => info.qualified_name(),
                };
                (key, info.messages_ready)
            })
            .collect())
    }

    /// Liveness check; any failure counts as unhealthy.
    #[instrument(skip(self), fields(cluster = %self.cluster_id()))]
    pub async fn check_node_health(&self, node: &str) -> bool {
        match self
            .nodes
            .request::<Value>(Method::GET, "healthchecks/node", Some(node))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                error!("health check failed for node {node}: {e}");
                false
            }
        }
    }

    pub async fn get_virtual_hosts(&self) -> BrokerResult<Vec<VHost>> {
        self.nodes
            .request(Method::GET, "vhosts", None)
            .await
            .inspect_err(|e| error!("failed to get vhosts: {e}"))
    }

    pub async fn get_cluster_name(&self) -> BrokerResult<String> {
        let name: ClusterName = self.nodes.request(Method::GET, "cluster-name", None).await?;
        Ok(name.name)
    }

    /// Raw node details as reported by the broker.
    pub async fn get_node_info(&self, node: &str) -> BrokerResult<Value> {
        if !self.has_node(node) {
            return Err(BrokerError::UnknownNode {
                node: node.to_string(),
                cluster: self.cluster_id().to_string(),
            });
        }
        let path = format!("nodes/{}", encode_segment(node));
        self.nodes.request(Method::GET, &path, Some(node)).await
    }
}

fn queue_path(vhost: &str, queue: &str) -> String {
    format!("queues/{}/{}", encode_segment(vhost), encode_segment(queue))
}
