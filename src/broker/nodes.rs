//! Multi-node endpoint with round-robin selection and failover
//!
//! A cluster is reached through whichever of its nodes answers first:
//!
//! ```text
//! request(path, preferred?)
//!   preferred node ──ok──▶ response
//!        │ fail
//!        ▼
//!   next node (cursor) ──ok──▶ response
//!        │ fail, skip already tried
//!        ▼
//!   ... every node tried once ──▶ BrokerError::AllNodesFailed (one reason per node)
//! ```
//!
//! There is no backoff and no second pass; the next scheduled cycle is the retry.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, bail};
use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{error, instrument, trace, warn};

use crate::config::ClusterConfig;

use super::error::{BrokerError, BrokerResult};

/// A single broker node as seen by the node set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerNode {
    pub hostname: String,
    pub api_port: u16,
    pub primary: bool,
    pub sink_host: Option<String>,
}

pub struct BrokerNodeSet {
    cluster_id: String,
    nodes: Vec<BrokerNode>,
    scheme: String,
    user: String,
    password: String,

    /// HTTP client (reused across requests, carries the per-attempt timeout)
    client: reqwest::Client,

    /// Index of the node handed out by the next `select_next` call
    cursor: AtomicUsize,
}

impl std::fmt::Debug for BrokerNodeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerNodeSet")
            .field("cluster_id", &self.cluster_id)
            .field("nodes", &self.nodes)
            .field("scheme", &self.scheme)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl BrokerNodeSet {
    pub fn new(config: &ClusterConfig) -> BrokerResult<Self> {
        if config.nodes.is_empty() {
            return Err(BrokerError::NoNodes(config.id.clone()));
        }

        let nodes = config
            .nodes
            .iter()
            .map(|node| BrokerNode {
                hostname: node.hostname.clone(),
                api_port: config.api_port_of(node),
                primary: node.primary,
                sink_host: node.sink_host.clone(),
            })
            .collect();

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.timeout())
            .build()
            .map_err(BrokerError::HttpClient)?;

        Ok(Self {
            cluster_id: config.id.clone(),
            nodes,
            scheme: config.scheme.clone(),
            user: config.auth.user.clone(),
            password: config.auth.password.clone(),
            client,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn nodes(&self) -> &[BrokerNode] {
        &self.nodes
    }

    pub fn node(&self, hostname: &str) -> Option<&BrokerNode> {
        self.nodes.iter().find(|node| node.hostname == hostname)
    }

    /// Primary node, or the first node when none is marked.
    pub fn primary(&self) -> &BrokerNode {
        self.nodes
            .iter()
            .find(|node| node.primary)
            .unwrap_or(&self.nodes[0])
    }

    /// Returns the node under the cursor and advances it modulo the node count.
    pub fn select_next(&self) -> &BrokerNode {
        &self.nodes[self.next_index()]
    }

    fn next_index(&self) -> usize {
        let len = self.nodes.len();
        // the closure never returns None, so both arms carry the previous value
        match self
            .cursor
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some((current + 1) % len)
            }) {
            Ok(previous) | Err(previous) => previous % len,
        }
    }

    fn index_of(&self, hostname: &str) -> Option<usize> {
        self.nodes.iter().position(|node| node.hostname == hostname)
    }

    fn url_for(&self, node: &BrokerNode, path: &str) -> String {
        format!(
            "{}://{}:{}/api/{}",
            self.scheme, node.hostname, node.api_port, path
        )
    }

    /// Performs a management API call, failing over across all nodes.
    ///
    /// `preferred` is attempted first when given. Afterwards the remaining nodes are
    /// visited in round-robin order, each at most once. The call fails only after
    /// every node has been tried; the error then lists every per-node reason.
    #[instrument(skip(self), fields(cluster = %self.cluster_id))]
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        preferred: Option<&str>,
    ) -> BrokerResult<T> {
        let mut failures = Vec::new();
        let mut tried = HashSet::new();

        if let Some(hostname) = preferred {
            let index = self
                .index_of(hostname)
                .ok_or_else(|| BrokerError::UnknownNode {
                    node: hostname.to_string(),
                    cluster: self.cluster_id.clone(),
                })?;

            match self.attempt(&self.nodes[index], method.clone(), path).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("specified node {hostname} failed: {e:#}");
                    failures.push(format!(
                        "failed to connect to specified node {hostname}: {e:#}"
                    ));
                    tried.insert(index);
                }
            }
        }

        while tried.len() < self.nodes.len() {
            let index = self.next_index();
            if !tried.insert(index) {
                continue;
            }

            let node = &self.nodes[index];
            match self.attempt(node, method.clone(), path).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("node {} failed: {e:#}", node.hostname);
                    failures.push(format!(
                        "failed to connect to node {}: {e:#}",
                        node.hostname
                    ));
                }
            }
        }

        error!(
            "failed to connect to any node of cluster {}:\n{}",
            self.cluster_id,
            failures.join("\n")
        );
        Err(BrokerError::AllNodesFailed {
            cluster: self.cluster_id.clone(),
            failures,
        })
    }

    async fn attempt<T: DeserializeOwned>(
        &self,
        node: &BrokerNode,
        method: Method,
        path: &str,
    ) -> anyhow::Result<T> {
        let url = self.url_for(node, path);
        trace!("{method} {url}");

        let response = self
            .client
            .request(method, &url)
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await
            .context("failed to send HTTP request")?;

        let status = response.status();
        if !status.is_success() {
            bail!("HTTP error: {status}");
        }

        response
            .json::<T>()
            .await
            .context("failed to parse response JSON")
    }
}
