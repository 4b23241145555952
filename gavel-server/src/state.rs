//! Application state shared across all request handlers.

use gavel_core::config::{ConfigStore, PipelineConfig};
use gavel_core::processors::PipelineStats;
use std::sync::Arc;

/// Cloneable handle to what the HTTP surface reports on.
#[derive(Clone)]
pub struct AppState {
    pub stats: Arc<PipelineStats>,
    /// Runtime pipeline configuration (reloaded on SIGHUP).
    pub pipeline_config: ConfigStore<PipelineConfig>,
}

impl AppState {
    pub fn new(stats: Arc<PipelineStats>, pipeline_config: ConfigStore<PipelineConfig>) -> Self {
        Self {
            stats,
            pipeline_config,
        }
    }
}
