//! Payloads returned by the broker management API

use serde::{Deserialize, Serialize};

/// Counters and state of a single queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueInfo {
    pub name: String,

    #[serde(default)]
    pub vhost: String,

    /// Total messages (ready + unacknowledged)
    #[serde(default)]
    pub messages: u64,

    #[serde(default)]
    pub messages_ready: u64,

    #[serde(default)]
    pub messages_unacknowledged: u64,

    #[serde(default)]
    pub consumers: u64,

    /// Absent for queues the broker has not fully initialised yet
    #[serde(default)]
    pub state: Option<String>,
}

impl QueueInfo {
    pub fn is_running(&self) -> bool {
        self.state.as_deref() == Some("running")
    }

    /// Key used by the aggregated counter maps.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.vhost, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VHost {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub tracing: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ClusterName {
    pub name: String,
}
