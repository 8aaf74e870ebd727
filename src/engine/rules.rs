//! Drift and threshold rules, plus the dedup latch

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::notify::{AlertContext, AlertKind};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftRule {
    /// Relative increase (percent) above which a drift alert fires
    pub drift_threshold_percent: f64,
    /// Absolute count above which a threshold alert fires
    pub threshold: u64,
}

/// What one observation means for a queue
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub delta: Option<i64>,
    pub increase_percentage: Option<f64>,
    pub fired: Vec<AlertKind>,
    /// A previous value exists and the count did not grow
    pub cleared: bool,
}

impl DriftRule {
    pub fn evaluate(&self, previous: Option<u64>, current: u64) -> Evaluation {
        let mut fired = Vec::new();
        let delta = previous.map(|previous| current as i64 - previous as i64);

        let increase_percentage = match previous {
            Some(0) if current > 0 => Some(100.0),
            Some(previous) if current > previous => {
                Some((current - previous) as f64 / previous as f64 * 100.0)
            }
            _ => None,
        };

        if increase_percentage.is_some_and(|pct| pct > self.drift_threshold_percent) {
            fired.push(AlertKind::Drift);
        }
        if current > self.threshold {
            fired.push(AlertKind::Threshold);
        }

        Evaluation {
            delta,
            increase_percentage,
            fired,
            cleared: previous.is_some_and(|previous| current <= previous),
        }
    }
}

/// Identity of an alerting condition
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AlertKey {
    pub node: String,
    pub vhost: String,
    pub queue: String,
}

impl AlertKey {
    pub fn new(node: impl Into<String>, vhost: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            vhost: vhost.into(),
            queue: queue.into(),
        }
    }
}

/// Decision for the alerts of one observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Nothing fired
    Quiet,
    /// Fired, and the key was not latched: send and latch
    Send,
    /// Fired, but already sent for this condition
    Suppressed,
}

/// Keys whose alert has been sent and whose condition has not cleared yet
#[derive(Debug, Default, Clone)]
pub struct AlertDedupCache {
    sent: HashSet<AlertKey>,
}

impl AlertDedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &AlertKey) -> bool {
        self.sent.contains(key)
    }

    pub fn len(&self) -> usize {
        self.sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }

    /// Drops every latch whose key does not satisfy `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&AlertKey) -> bool) {
        self.sent.retain(|key| keep(key));
    }

    /// Applies one evaluation to the latch for `key`.
    ///
    /// A cleared condition unlatches first, so a count that stays flat above the
    /// absolute threshold is reported again on every cycle.
    pub fn apply(&mut self, key: &AlertKey, evaluation: &Evaluation) -> Dispatch {
        if evaluation.cleared {
            self.sent.remove(key);
        }
        if evaluation.fired.is_empty() {
            return Dispatch::Quiet;
        }
        if self.sent.insert(key.clone()) {
            Dispatch::Send
        } else {
            Dispatch::Suppressed
        }
    }
}

/// A fired alert with everything the notifier needs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftAlert {
    pub kind: AlertKind,
    pub key: AlertKey,
    pub sink_host: String,
    pub current: u64,
    pub previous: Option<u64>,
    pub delta: Option<i64>,
    pub increase_percentage: Option<f64>,
    pub threshold: u64,
    pub timestamp: DateTime<Utc>,
}

impl DriftAlert {
    pub fn context(&self) -> AlertContext {
        let optional = |value: Option<String>| value.unwrap_or_default();
        [
            ("node", self.key.node.clone()),
            ("vhost", self.key.vhost.clone()),
            ("queue", self.key.queue.clone()),
            ("sink_host", self.sink_host.clone()),
            ("current_count", self.current.to_string()),
            ("previous_count", optional(self.previous.map(|v| v.to_string()))),
            ("delta", optional(self.delta.map(|v| v.to_string()))),
            (
                "increase_percentage",
                optional(self.increase_percentage.map(|v| format!("{v:.2}"))),
            ),
            ("threshold", self.threshold.to_string()),
            ("timestamp", self.timestamp.to_rfc3339()),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
    }
}
