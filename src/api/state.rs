//! Shared state handed to every handler

use std::sync::Arc;

use crate::broker::ClusterRegistry;
use crate::engine::DriftEngine;

#[derive(Clone)]
pub struct ApiState {
    /// Engine driving cycles; shared with the scheduler
    pub engine: Arc<DriftEngine>,

    pub registry: Arc<ClusterRegistry>,
}

impl ApiState {
    pub fn new(engine: Arc<DriftEngine>, registry: Arc<ClusterRegistry>) -> Self {
        Self { engine, registry }
    }
}
