//! State shared across handlers.

use locdedup_pipeline::Pipeline;
use std::sync::Arc;
use std::time::Instant;

pub const SERVICE_NAME: &str = "locdedup";
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub started_at: Instant,
}

impl AppState {
    #[must_use]
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            started_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
