//! Broker management API access
//!
//! ## Layers
//!
//! - **BrokerNodeSet**: one logical endpoint per cluster, round-robin with failover
//! - **BrokerClient**: typed queue/vhost/cluster accessors on top of the node set
//! - **ClusterRegistry**: every configured cluster, built once at startup
//!
//! Vhost and queue names are percent-encoded in every path, so the default vhost
//! `/` travels as `%2F`.

pub mod client;
pub mod error;
pub mod nodes;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

pub use client::BrokerClient;
pub use error::{BrokerError, BrokerResult};
pub use nodes::{BrokerNode, BrokerNodeSet};
pub use types::{QueueInfo, VHost};

use crate::config::ClusterConfig;

/// All broker clients of the process, keyed by cluster id
#[derive(Debug, Clone, Default)]
pub struct ClusterRegistry {
    clusters: Vec<Arc<BrokerClient>>,
    by_id: HashMap<String, usize>,
    by_node: HashMap<String, usize>,
}

impl ClusterRegistry {
    pub fn new(configs: &[ClusterConfig]) -> BrokerResult<Self> {
        let mut registry = Self::default();
        for config in configs {
            registry.insert(BrokerClient::new(config)?);
        }
        Ok(registry)
    }

    fn insert(&mut self, client: BrokerClient) {
        let index = self.clusters.len();
        self.by_id.insert(client.cluster_id().to_string(), index);
        for node in client.node_set().nodes() {
            self.by_node.insert(node.hostname.clone(), index);
        }
        self.clusters.push(Arc::new(client));
    }

    pub fn clusters(&self) -> impl Iterator<Item = &Arc<BrokerClient>> {
        self.clusters.iter()
    }

    pub fn client(&self, cluster_id: &str) -> BrokerResult<&Arc<BrokerClient>> {
        self.by_id
            .get(cluster_id)
            .map(|&index| &self.clusters[index])
            .ok_or_else(|| BrokerError::UnknownCluster(cluster_id.to_string()))
    }

    /// Client of the cluster that owns `hostname`.
    pub fn client_for_node(&self, hostname: &str) -> BrokerResult<&Arc<BrokerClient>> {
        self.by_node
            .get(hostname)
            .map(|&index| &self.clusters[index])
            .ok_or_else(|| BrokerError::UnknownNode {
                node: hostname.to_string(),
                cluster: String::from("<any>"),
            })
    }

    pub fn sink_host_for_node(&self, hostname: &str) -> BrokerResult<String> {
        self.client_for_node(hostname)
            .map(|client| client.sink_host_for_node(hostname).to_string())
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}
