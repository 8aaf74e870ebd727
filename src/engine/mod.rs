//! Collection cycles and drift alerting
//!
//! ## Per-queue flow
//!
//! ```text
//! queue_info ─▶ ensure items ─▶ previous value ─▶ deliver ─▶ rule ─▶ dedup ─▶ notify
//! ```
//!
//! Failures stay scoped to the queue (or cluster) they happen in and are recorded
//! in the [`CycleReport`]; a cycle never aborts half-way.
//!
//! The dedup latch and the last-seen counters live behind one async mutex, so
//! concurrent cycles (scheduler plus API trigger) never interleave their updates.

pub mod rules;
pub mod source;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

pub use rules::{AlertDedupCache, AlertKey, Dispatch, DriftAlert, DriftRule, Evaluation};
pub use source::{MetricStore, MonitoredCluster, QueueSource};

use crate::broker::QueueInfo;
use crate::config::{MonitoredQueueSpec, MonitoringConfig, PreviousValueSource};
use crate::notify::{AlertKind, Notifier};
use crate::sink::{DataPoint, DeliveryOutcome};

/// Metric used for drift detection and previous-value lookups
const SIZE_METRIC: &str = "size";

/// Data points collected for one queue, without delivery
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    /// Cluster node for watch-list queues, cluster id for discovered ones
    pub node: String,
    pub sink_host: String,
    pub queue: QueueInfo,
    pub points: Vec<DataPoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueOutcome {
    pub node: String,
    pub vhost: String,
    pub queue: String,
    pub sink_host: String,
    pub current: Option<u64>,
    pub previous: Option<u64>,
    pub items_created: usize,
    pub delivery: Option<DeliveryOutcome>,
    /// Alerts handed to the notifier successfully
    pub alerts: Vec<AlertKind>,
    pub suppressed: bool,
    pub errors: Vec<String>,
}

impl QueueOutcome {
    fn new(node: &str, vhost: &str, queue: &str, sink_host: &str) -> Self {
        Self {
            node: node.to_string(),
            vhost: vhost.to_string(),
            queue: queue.to_string(),
            sink_host: sink_host.to_string(),
            current: None,
            previous: None,
            items_created: 0,
            delivery: None,
            alerts: Vec::new(),
            suppressed: false,
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    /// Every attempted delivery succeeded
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub queues: Vec<QueueOutcome>,
    /// Failures not tied to a single queue, e.g. an unreachable cluster
    pub errors: Vec<String>,
    pub data_points_sent: usize,
    pub alerts_dispatched: usize,
    pub alerts_suppressed: usize,
}

impl CycleReport {
    fn finish(
        started_at: DateTime<Utc>,
        queues: Vec<QueueOutcome>,
        errors: Vec<String>,
        data_points_sent: usize,
    ) -> Self {
        let success = queues
            .iter()
            .filter_map(|outcome| outcome.delivery.as_ref())
            .all(DeliveryOutcome::is_success);

        Self {
            success,
            started_at,
            finished_at: Utc::now(),
            alerts_dispatched: queues.iter().map(|outcome| outcome.alerts.len()).sum(),
            alerts_suppressed: queues.iter().filter(|outcome| outcome.suppressed).count(),
            queues,
            errors,
            data_points_sent,
        }
    }
}

#[derive(Debug, Default)]
struct EngineState {
    dedup: AlertDedupCache,
    last_seen: HashMap<AlertKey, u64>,
}

/// Queue observed in the current cycle, waiting for delivery and rule evaluation
struct Pending {
    outcome: QueueOutcome,
    key: AlertKey,
    previous: Option<u64>,
    current: u64,
}

pub struct DriftEngine {
    source: Arc<dyn QueueSource>,
    store: Arc<dyn MetricStore>,
    notifier: Arc<dyn Notifier>,
    monitoring: MonitoringConfig,
    rule: DriftRule,
    state: Mutex<EngineState>,
}

impl DriftEngine {
    pub fn new(
        source: Arc<dyn QueueSource>,
        store: Arc<dyn MetricStore>,
        notifier: Arc<dyn Notifier>,
        monitoring: MonitoringConfig,
    ) -> Self {
        let rule = DriftRule {
            drift_threshold_percent: monitoring.drift_threshold_percent,
            threshold: monitoring.threshold,
        };

        Self {
            source,
            store,
            notifier,
            monitoring,
            rule,
            state: Mutex::new(EngineState::default()),
        }
    }

    pub fn monitored_queues(&self) -> &[MonitoredQueueSpec] {
        &self.monitoring.queues
    }

    pub fn rule(&self) -> DriftRule {
        self.rule
    }

    /// Number of conditions currently latched in the dedup cache.
    pub async fn latched_alerts(&self) -> usize {
        self.state.lock().await.dedup.len()
    }

    /// One cycle over the configured watch-list.
    #[instrument(skip(self), fields(queues = self.monitoring.queues.len()))]
    pub async fn run_cycle(&self) -> CycleReport {
        let started_at = Utc::now();
        let mut queues = Vec::with_capacity(self.monitoring.queues.len());
        let mut sent = 0;

        for spec in &self.monitoring.queues {
            let mut outcome =
                QueueOutcome::new(&spec.cluster_node, &spec.vhost, &spec.queue, &spec.sink_host);

            let info = match self
                .source
                .queue_info(&spec.cluster_node, &spec.vhost, &spec.queue)
                .await
            {
                Ok(info) => info,
                Err(e) => {
                    error!(
                        "failed to read {}/{} from {}: {e}",
                        spec.vhost, spec.queue, spec.cluster_node
                    );
                    outcome.errors.push(e.to_string());
                    queues.push(outcome);
                    continue;
                }
            };

            let points = self.data_points(&spec.sink_host, &info);
            let pending = self
                .prepare(outcome, &spec.cluster_node, &info, &points)
                .await;

            let delivery = self.store.deliver(&points).await;
            sent += delivered(&delivery);
            queues.push(self.conclude(pending, delivery).await);
        }

        let report = CycleReport::finish(started_at, queues, Vec::new(), sent);
        log_report("watch-list", &report);
        report
    }

    /// One cycle over every queue of every monitoring-enabled cluster.
    ///
    /// All values go out in a single batch; queues without a resolvable sink host
    /// are skipped.
    #[instrument(skip(self))]
    pub async fn collect_all(&self) -> CycleReport {
        let started_at = Utc::now();
        let mut errors = Vec::new();
        let mut pending = Vec::new();
        let mut points = Vec::new();
        let mut listed = HashSet::new();

        for cluster in self.source.monitored_clusters() {
            let queues = match self.source.cluster_queues(&cluster.id).await {
                Ok(queues) => queues,
                Err(e) => {
                    error!("failed to list queues of cluster {}: {e}", cluster.id);
                    errors.push(format!("cluster {}: {e}", cluster.id));
                    continue;
                }
            };
            listed.insert(cluster.id.clone());

            for info in queues {
                let Some(sink_host) = self.resolve_sink_host(&cluster, &info) else {
                    debug!(
                        "no sink host for {}/{} on cluster {}, skipping",
                        info.vhost, info.name, cluster.id
                    );
                    continue;
                };

                let queue_points = self.data_points(&sink_host, &info);
                let outcome = QueueOutcome::new(&cluster.id, &info.vhost, &info.name, &sink_host);
                pending.push(self.prepare(outcome, &cluster.id, &info, &queue_points).await);
                points.extend(queue_points);
            }
        }

        let observed: HashSet<AlertKey> = pending.iter().map(|queue| queue.key.clone()).collect();
        let mut sent = 0;
        let mut queues = Vec::with_capacity(pending.len());
        if !pending.is_empty() {
            let delivery = self.store.deliver(&points).await;
            sent = delivered(&delivery);
            for queue in pending {
                queues.push(self.conclude(queue, delivery.clone()).await);
            }
        }
        self.forget_vanished(&listed, &observed).await;

        let report = CycleReport::finish(started_at, queues, errors, sent);
        log_report("cluster-wide", &report);
        report
    }

    /// Watch-list snapshot; nothing is sent and no rule runs.
    pub async fn collect_queue_metrics(&self) -> Vec<QueueSnapshot> {
        let mut snapshots = Vec::new();
        for spec in &self.monitoring.queues {
            match self
                .source
                .queue_info(&spec.cluster_node, &spec.vhost, &spec.queue)
                .await
            {
                Ok(info) => snapshots.push(QueueSnapshot {
                    node: spec.cluster_node.clone(),
                    sink_host: spec.sink_host.clone(),
                    points: self.data_points(&spec.sink_host, &info),
                    queue: info,
                }),
                Err(e) => warn!("skipping {}/{}: {e}", spec.vhost, spec.queue),
            }
        }
        snapshots
    }

    /// Cluster-wide snapshot with the same sink host resolution as [`Self::collect_all`].
    pub async fn collect_all_queue_metrics(&self) -> Vec<QueueSnapshot> {
        let mut snapshots = Vec::new();
        for cluster in self.source.monitored_clusters() {
            let queues = match self.source.cluster_queues(&cluster.id).await {
                Ok(queues) => queues,
                Err(e) => {
                    warn!("skipping cluster {}: {e}", cluster.id);
                    continue;
                }
            };

            for info in queues {
                if let Some(sink_host) = self.resolve_sink_host(&cluster, &info) {
                    snapshots.push(QueueSnapshot {
                        node: cluster.id.clone(),
                        points: self.data_points(&sink_host, &info),
                        sink_host,
                        queue: info,
                    });
                }
            }
        }
        snapshots
    }

    fn resolve_sink_host(&self, cluster: &MonitoredCluster, info: &QueueInfo) -> Option<String> {
        let host = self
            .monitoring
            .sink_host_override(&info.vhost, &info.name)
            .unwrap_or(&cluster.default_sink_host);
        (!host.is_empty()).then(|| host.to_string())
    }

    /// Size, consumer count and running state of one queue.
    fn data_points(&self, sink_host: &str, info: &QueueInfo) -> Vec<DataPoint> {
        let key = |metric: &str| self.store.item_key(metric, &info.vhost, &info.name);
        vec![
            DataPoint::new(sink_host, key(SIZE_METRIC), info.messages),
            DataPoint::new(sink_host, key("consumers"), info.consumers),
            DataPoint::new(sink_host, key("state"), i64::from(info.is_running())),
        ]
    }

    /// Ensures the items exist and resolves the previous size, before anything is sent.
    async fn prepare(
        &self,
        mut outcome: QueueOutcome,
        node: &str,
        info: &QueueInfo,
        points: &[DataPoint],
    ) -> Pending {
        for point in points {
            match self.store.ensure_item(&point.host, &point.key).await {
                Ok(true) => outcome.items_created += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("failed to ensure item {} on {}: {e}", point.key, point.host);
                    outcome.errors.push(format!("item {}: {e}", point.key));
                }
            }
        }

        let key = AlertKey::new(node, &info.vhost, &info.name);
        let size_key = self.store.item_key(SIZE_METRIC, &info.vhost, &info.name);
        let previous = self
            .previous_value(&key, &outcome.sink_host, &size_key, &mut outcome.errors)
            .await;

        outcome.current = Some(info.messages);
        outcome.previous = previous;
        Pending {
            outcome,
            key,
            previous,
            current: info.messages,
        }
    }

    async fn previous_value(
        &self,
        key: &AlertKey,
        host: &str,
        item_key: &str,
        errors: &mut Vec<String>,
    ) -> Option<u64> {
        if self.monitoring.previous_value_source == PreviousValueSource::Sink {
            match self.store.previous_value(host, item_key).await {
                Ok(Some(value)) => return u64::try_from(value).ok(),
                Ok(None) => {}
                Err(e) => {
                    warn!("failed to read previous value of {item_key}: {e}");
                    errors.push(format!("previous value: {e}"));
                }
            }
        }

        self.state.lock().await.last_seen.get(key).copied()
    }

    /// Drops state for queues of a listed cluster that were not seen this cycle.
    ///
    /// Clusters whose listing failed keep their state untouched.
    async fn forget_vanished(&self, listed: &HashSet<String>, observed: &HashSet<AlertKey>) {
        let keep = |key: &AlertKey| !listed.contains(&key.node) || observed.contains(key);

        let mut state = self.state.lock().await;
        let tracked = state.last_seen.len();
        state.last_seen.retain(|key, _| keep(key));
        state.dedup.retain(keep);

        let dropped = tracked - state.last_seen.len();
        if dropped > 0 {
            debug!("forgot {dropped} queues that disappeared from their cluster");
        }
    }

    /// Records the delivery, runs the rule and dispatches what passes the latch.
    async fn conclude(&self, pending: Pending, delivery: DeliveryOutcome) -> QueueOutcome {
        let Pending {
            mut outcome,
            key,
            previous,
            current,
        } = pending;

        if let Some(error) = delivery.error() {
            outcome.errors.push(format!("delivery: {error}"));
        }
        outcome.delivery = Some(delivery);

        let evaluation = self.rule.evaluate(previous, current);
        let dispatch = {
            let mut state = self.state.lock().await;
            state.last_seen.insert(key.clone(), current);
            state.dedup.apply(&key, &evaluation)
        };

        match dispatch {
            Dispatch::Quiet => {}
            Dispatch::Suppressed => {
                debug!("alert for {}/{} already sent", key.vhost, key.queue);
                outcome.suppressed = true;
            }
            Dispatch::Send => {
                let timestamp = Utc::now();
                for kind in &evaluation.fired {
                    let alert = DriftAlert {
                        kind: *kind,
                        key: key.clone(),
                        sink_host: outcome.sink_host.clone(),
                        current,
                        previous,
                        delta: evaluation.delta,
                        increase_percentage: evaluation.increase_percentage,
                        threshold: self.rule.threshold,
                        timestamp,
                    };

                    match self.notifier.notify(*kind, &alert.context()).await {
                        Ok(()) => outcome.alerts.push(*kind),
                        Err(e) => {
                            error!("failed to send {kind} alert for {}/{}: {e}", key.vhost, key.queue);
                            outcome.errors.push(format!("{kind} alert: {e}"));
                        }
                    }
                }
            }
        }

        outcome
    }
}

fn delivered(outcome: &DeliveryOutcome) -> usize {
    match outcome {
        DeliveryOutcome::Delivered { processed, .. } => *processed,
        DeliveryOutcome::Failed { .. } => 0,
    }
}

fn log_report(kind: &str, report: &CycleReport) {
    let failed = report
        .queues
        .iter()
        .filter(|outcome| !outcome.errors.is_empty())
        .count();
    info!(
        success = report.success,
        queues = report.queues.len(),
        failed,
        sent = report.data_points_sent,
        alerts = report.alerts_dispatched,
        suppressed = report.alerts_suppressed,
        "{kind} cycle finished"
    );
}
