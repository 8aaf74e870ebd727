//! REST front-end for triggering cycles and inspecting clusters
//!
//! ## Endpoints
//!
//! - `GET  /api/v1/health` - Health check
//! - `POST /api/v1/monitoring/run` - Watch-list cycle (400 unless every delivery succeeded)
//! - `POST /api/v1/monitoring/run-all` - Cluster-wide cycle
//! - `GET  /api/v1/monitoring/queues` - Configured watch-list
//! - `GET  /api/v1/monitoring/metrics` - Watch-list snapshot, nothing is sent
//! - `GET  /api/v1/monitoring/metrics-all` - Cluster-wide snapshot, nothing is sent
//! - `GET  /api/v1/clusters` - Configured clusters (no credentials)
//! - `GET  /api/v1/clusters/:id/queues` - Queues of one cluster
//! - `GET  /api/v1/clusters/:id/queues/:vhost/:queue` - One queue (`/` vhost as `%2F`)

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod types;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;

use std::net::SocketAddr;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ApiConfig;

/// Builds the router; requests need `Bearer <auth_token>` when a token is set.
pub fn router(state: ApiState, auth_token: Option<String>) -> Router {
    let mut app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/monitoring/run", post(routes::monitoring::run_cycle))
        .route("/api/v1/monitoring/run-all", post(routes::monitoring::run_all))
        .route("/api/v1/monitoring/queues", get(routes::monitoring::list_queues))
        .route("/api/v1/monitoring/metrics", get(routes::monitoring::metrics))
        .route("/api/v1/monitoring/metrics-all", get(routes::monitoring::metrics_all))
        .route("/api/v1/clusters", get(routes::clusters::list_clusters))
        .route(
            "/api/v1/clusters/:id/queues",
            get(routes::clusters::list_cluster_queues),
        )
        .route(
            "/api/v1/clusters/:id/queues/:vhost/:queue",
            get(routes::clusters::get_queue),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if let Some(token) = auth_token {
        app = app.layer(axum::middleware::from_fn_with_state(
            token,
            middleware::auth::auth_middleware,
        ));
    }

    app
}

/// Spawn the API server
///
/// Starts serving in a background task and returns the bound address.
pub async fn spawn_api_server(config: &ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);

    let app = router(state, config.auth_token.clone());
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
