//! Cycle triggers and snapshots

use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};
use tracing::info;

use crate::api::state::ApiState;
use crate::engine::{CycleReport, QueueSnapshot};

/// POST /api/v1/monitoring/run
///
/// Runs a watch-list cycle; answers 400 with the full report when a delivery failed.
pub async fn run_cycle(State(state): State<ApiState>) -> (StatusCode, Json<CycleReport>) {
    info!("watch-list cycle triggered via API");
    let report = state.engine.run_cycle().await;
    let status = if report.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(report))
}

/// POST /api/v1/monitoring/run-all
pub async fn run_all(State(state): State<ApiState>) -> Json<CycleReport> {
    info!("cluster-wide cycle triggered via API");
    Json(state.engine.collect_all().await)
}

/// GET /api/v1/monitoring/queues
pub async fn list_queues(State(state): State<ApiState>) -> Json<Value> {
    let queues = state.engine.monitored_queues();
    let rule = state.engine.rule();
    Json(json!({
        "queues": queues,
        "count": queues.len(),
        "threshold": rule.threshold,
        "drift_threshold_percent": rule.drift_threshold_percent,
    }))
}

/// GET /api/v1/monitoring/metrics
pub async fn metrics(State(state): State<ApiState>) -> Json<Vec<QueueSnapshot>> {
    Json(state.engine.collect_queue_metrics().await)
}

/// GET /api/v1/monitoring/metrics-all
pub async fn metrics_all(State(state): State<ApiState>) -> Json<Vec<QueueSnapshot>> {
    Json(state.engine.collect_all_queue_metrics().await)
}
