//! HTTP API for app forge

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;

use crate::config::Environment;
use crate::runtime::Orchestrator;
use std::sync::Arc;
use std::time::Duration;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub environment: Environment,
    /// SSE keep-alive interval
    pub keep_alive: Duration,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, environment: Environment) -> Self {
        Self {
            orchestrator,
            environment,
            keep_alive: Duration::from_secs(15),
        }
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}
