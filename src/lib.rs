//! Queue depth collection for broker clusters, with drift and threshold alerting
//!
//! - [`broker`]: management API access with per-cluster node failover
//! - [`sink`]: value delivery to the metrics backend and its control API
//! - [`engine`]: collection cycles, alert rules and dedup
//! - [`notify`]: alert delivery boundary

#[cfg(feature = "api")]
pub mod api;
pub mod broker;
pub mod config;
pub mod engine;
pub mod notify;
pub mod sink;
pub mod util;
