use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration file provided: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("no nodes defined for cluster {0}")]
    NoNodes(String),

    #[error("cluster {0} marks more than one node as primary")]
    MultiplePrimaries(String),

    #[error("cluster {0}: timeout_secs must be greater than zero")]
    ZeroTimeout(String),

    #[error("cluster id {0} is defined more than once")]
    DuplicateCluster(String),

    #[error("node {node} is defined in clusters {first} and {second}")]
    DuplicateNode {
        node: String,
        first: String,
        second: String,
    },

    #[error("monitored queue {vhost}/{queue} references unknown node {node}")]
    UnknownNode {
        node: String,
        vhost: String,
        queue: String,
    },

    #[error("queue {vhost}/{queue} is monitored more than once in cluster {cluster}")]
    DuplicateQueue {
        cluster: String,
        vhost: String,
        queue: String,
    },

    #[error("invalid sink configuration: {0}")]
    Sink(String),

    #[error("invalid monitoring configuration: {0}")]
    Monitoring(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,

    pub sink: SinkConfig,

    #[serde(default)]
    pub monitoring: MonitoringConfig,

    /// Alert delivery (optional - defaults to logging alerts)
    pub notifier: Option<NotifierConfig>,

    /// HTTP front-end (optional - disabled when absent)
    pub api: Option<ApiConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub auth: BrokerAuth,
    #[serde(default)]
    pub monitoring: ClusterMonitoring,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ClusterConfig {
    /// The primary node, or the first node when none is marked.
    pub fn primary_node(&self) -> Option<&NodeConfig> {
        self.nodes
            .iter()
            .find(|node| node.primary)
            .or_else(|| self.nodes.first())
    }

    /// API port of the primary node, used for nodes without their own port.
    pub fn default_api_port(&self) -> u16 {
        self.primary_node()
            .and_then(|node| node.api_port)
            .unwrap_or_else(default_api_port)
    }

    /// API port of a node, falling back to the cluster default.
    pub fn api_port_of(&self, node: &NodeConfig) -> u16 {
        node.api_port.unwrap_or_else(|| self.default_api_port())
    }

    pub fn node(&self, hostname: &str) -> Option<&NodeConfig> {
        self.nodes.iter().find(|node| node.hostname == hostname)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub hostname: String,
    pub api_port: Option<u16>,
    #[serde(default)]
    pub primary: bool,
    pub sink_host: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerAuth {
    #[serde(default = "default_guest")]
    pub user: String,
    #[serde(default = "default_guest")]
    pub password: String,
}

impl Default for BrokerAuth {
    fn default() -> Self {
        Self {
            user: default_guest(),
            password: default_guest(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterMonitoring {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub default_sink_host: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsConnect {
    #[default]
    Unencrypted,
    Psk,
    Cert,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Trapper listener host
    pub server: String,
    #[serde(default = "default_sink_port")]
    pub port: u16,

    /// JSON-RPC endpoint, e.g. `https://monitoring.example.com/api_jsonrpc.php`
    pub api_url: String,
    pub api_token: Option<String>,
    pub api_user: Option<String>,
    pub api_password: Option<String>,

    #[serde(default)]
    pub tls_connect: TlsConnect,
    pub tls_psk_identity: Option<String>,
    pub tls_psk_file: Option<PathBuf>,
    pub psk_key: Option<String>,
    pub tls_ca_file: Option<PathBuf>,
    pub tls_cert_file: Option<PathBuf>,
    pub tls_key_file: Option<PathBuf>,

    #[serde(default = "default_sender_binary")]
    pub sender_binary: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_item_key_prefix")]
    pub item_key_prefix: String,
}

impl SinkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Values go through the external sender tool whenever transport security is configured.
    pub fn uses_encrypted_transport(&self) -> bool {
        self.tls_connect != TlsConnect::Unencrypted
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviousValueSource {
    #[default]
    Sink,
    Cache,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_threshold")]
    pub threshold: u64,
    #[serde(default = "default_drift_threshold_percent")]
    pub drift_threshold_percent: f64,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub previous_value_source: PreviousValueSource,
    #[serde(default)]
    pub queues: Vec<MonitoredQueueSpec>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            drift_threshold_percent: default_drift_threshold_percent(),
            interval_secs: default_interval_secs(),
            previous_value_source: PreviousValueSource::default(),
            queues: Vec::new(),
        }
    }
}

impl MonitoringConfig {
    /// Sink host override for a `(vhost, queue)` pair from the watch-list.
    pub fn sink_host_override(&self, vhost: &str, queue: &str) -> Option<&str> {
        self.queues
            .iter()
            .find(|spec| spec.vhost == vhost && spec.queue == queue)
            .map(|spec| spec.sink_host.as_str())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredQueueSpec {
    pub cluster_node: String,
    pub vhost: String,
    pub queue: String,
    pub sink_host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NotifierConfig {
    Webhook { url: String },
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    pub auth_token: Option<String>,
}

fn default_scheme() -> String {
    String::from("http")
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_api_port() -> u16 {
    15672
}

fn default_guest() -> String {
    String::from("guest")
}

fn default_sink_port() -> u16 {
    10051
}

fn default_sender_binary() -> String {
    String::from("zabbix_sender")
}

fn default_item_key_prefix() -> String {
    String::from("rabbitmq.queue")
}

fn default_threshold() -> u64 {
    1000
}

fn default_drift_threshold_percent() -> f64 {
    10.0
}

fn default_interval_secs() -> u64 {
    300
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5000))
}

impl Config {
    pub fn from_json(content: &str) -> ConfigResult<Config> {
        let config: Config = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Cluster that owns the node with the given hostname.
    pub fn cluster_for_node(&self, hostname: &str) -> Option<&ClusterConfig> {
        self.clusters
            .iter()
            .find(|cluster| cluster.node(hostname).is_some())
    }

    pub fn sink_host_override(&self, vhost: &str, queue: &str) -> Option<&str> {
        self.monitoring.sink_host_override(vhost, queue)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let mut cluster_ids = HashSet::new();
        let mut node_owner: HashMap<&str, &str> = HashMap::new();

        for cluster in &self.clusters {
            if !cluster_ids.insert(cluster.id.as_str()) {
                return Err(ConfigError::DuplicateCluster(cluster.id.clone()));
            }
            if cluster.nodes.is_empty() {
                return Err(ConfigError::NoNodes(cluster.id.clone()));
            }
            if cluster.nodes.iter().filter(|node| node.primary).count() > 1 {
                return Err(ConfigError::MultiplePrimaries(cluster.id.clone()));
            }
            if cluster.timeout_secs == 0 {
                return Err(ConfigError::ZeroTimeout(cluster.id.clone()));
            }
            for node in &cluster.nodes {
                if let Some(first) = node_owner.insert(&node.hostname, &cluster.id) {
                    return Err(ConfigError::DuplicateNode {
                        node: node.hostname.clone(),
                        first: first.to_string(),
                        second: cluster.id.clone(),
                    });
                }
            }
        }

        let mut watched = HashSet::new();
        for spec in &self.monitoring.queues {
            let Some(cluster) = node_owner.get(spec.cluster_node.as_str()) else {
                return Err(ConfigError::UnknownNode {
                    node: spec.cluster_node.clone(),
                    vhost: spec.vhost.clone(),
                    queue: spec.queue.clone(),
                });
            };
            if !watched.insert((*cluster, spec.vhost.as_str(), spec.queue.as_str())) {
                return Err(ConfigError::DuplicateQueue {
                    cluster: cluster.to_string(),
                    vhost: spec.vhost.clone(),
                    queue: spec.queue.clone(),
                });
            }
        }

        let drift = self.monitoring.drift_threshold_percent;
        if !drift.is_finite() || drift < 0.0 {
            return Err(ConfigError::Monitoring(String::from(
                "drift_threshold_percent must be a non-negative number",
            )));
        }
        if self.monitoring.interval_secs == 0 {
            return Err(ConfigError::Monitoring(String::from(
                "interval_secs must be greater than zero",
            )));
        }

        self.validate_sink()
    }

    fn validate_sink(&self) -> ConfigResult<()> {
        let sink = &self.sink;
        if sink.server.trim().is_empty() {
            return Err(ConfigError::Sink(String::from("server must not be empty")));
        }
        if sink.timeout_secs == 0 {
            return Err(ConfigError::Sink(String::from(
                "timeout_secs must be greater than zero",
            )));
        }
        if sink.api_token.is_none() && (sink.api_user.is_none() || sink.api_password.is_none()) {
            return Err(ConfigError::Sink(String::from(
                "either api_token or api_user and api_password are required",
            )));
        }

        match sink.tls_connect {
            TlsConnect::Unencrypted => Ok(()),
            TlsConnect::Psk => {
                if sink.tls_psk_identity.as_deref().is_none_or(str::is_empty) {
                    return Err(ConfigError::Sink(String::from(
                        "tls_connect = psk requires tls_psk_identity",
                    )));
                }
                if sink.tls_psk_file.is_none() && sink.psk_key.is_none() {
                    return Err(ConfigError::Sink(String::from(
                        "tls_connect = psk requires tls_psk_file or psk_key",
                    )));
                }
                Ok(())
            }
            TlsConnect::Cert => {
                if sink.tls_ca_file.is_none()
                    || sink.tls_cert_file.is_none()
                    || sink.tls_key_file.is_none()
                {
                    return Err(ConfigError::Sink(String::from(
                        "tls_connect = cert requires tls_ca_file, tls_cert_file and tls_key_file",
                    )));
                }
                Ok(())
            }
        }
    }
}

pub fn read_config_file(path: impl AsRef<Path>) -> ConfigResult<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Config::from_json(&content).inspect(|config| {
        trace!(
            clusters = config.clusters.len(),
            queues = config.monitoring.queues.len(),
            "loaded config"
        )
    })
}
