//! API response types

use serde::{Deserialize, Serialize};

use crate::broker::{BrokerClient, BrokerNode};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

/// A configured cluster as exposed over the API; credentials are left out
#[derive(Debug, Clone, Serialize)]
pub struct ClusterSummary {
    pub id: String,
    pub description: String,
    pub monitoring_enabled: bool,
    pub default_sink_host: String,
    pub nodes: Vec<BrokerNode>,
}

impl From<&BrokerClient> for ClusterSummary {
    fn from(client: &BrokerClient) -> Self {
        Self {
            id: client.cluster_id().to_string(),
            description: client.description().to_string(),
            monitoring_enabled: client.monitoring_enabled(),
            default_sink_host: client.default_sink_host().to_string(),
            nodes: client.node_set().nodes().to_vec(),
        }
    }
}
