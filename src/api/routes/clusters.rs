//! Read-only cluster endpoints

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::api::{error::ApiResult, state::ApiState, types::ClusterSummary};
use crate::broker::QueueInfo;

#[derive(Debug, Deserialize)]
pub struct QueueQuery {
    /// Restrict the listing to one vhost
    vhost: Option<String>,
}

/// GET /api/v1/clusters
pub async fn list_clusters(State(state): State<ApiState>) -> Json<Value> {
    let clusters: Vec<ClusterSummary> = state
        .registry
        .clusters()
        .map(|client| ClusterSummary::from(client.as_ref()))
        .collect();

    Json(json!({
        "clusters": clusters,
        "count": clusters.len(),
    }))
}

/// GET /api/v1/clusters/:id/queues
pub async fn list_cluster_queues(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<QueueQuery>,
) -> ApiResult<Json<Value>> {
    let client = state.registry.client(&id)?;
    let queues = client.get_all_queues(query.vhost.as_deref()).await?;

    Ok(Json(json!({
        "cluster": id,
        "queues": queues,
        "count": queues.len(),
    })))
}

/// GET /api/v1/clusters/:id/queues/:vhost/:queue
pub async fn get_queue(
    State(state): State<ApiState>,
    Path((id, vhost, queue)): Path<(String, String, String)>,
) -> ApiResult<Json<QueueInfo>> {
    let client = state.registry.client(&id)?;
    Ok(Json(client.get_queue_info(&vhost, &queue, None).await?))
}
