//! Error types for broker management API calls

use thiserror::Error;

/// Result type alias for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Errors that can occur while talking to a broker cluster
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Every node of the cluster was tried and failed, one reason per node
    #[error("all nodes of cluster {cluster} are unavailable:\n{}", .failures.join("\n"))]
    AllNodesFailed {
        cluster: String,
        failures: Vec<String>,
    },

    /// The requested node is not part of the cluster
    #[error("node {node} not found in cluster {cluster}")]
    UnknownNode { node: String, cluster: String },

    /// A node set needs at least one node
    #[error("no nodes defined for cluster {0}")]
    NoNodes(String),

    /// No cluster is configured under this id
    #[error("cluster {0} not found")]
    UnknownCluster(String),

    /// The HTTP client could not be constructed
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

impl BrokerError {
    /// Per-node failure reasons, empty for non-connectivity errors.
    pub fn failures(&self) -> &[String] {
        match self {
            BrokerError::AllNodesFailed { failures, .. } => failures,
            _ => &[],
        }
    }
}
