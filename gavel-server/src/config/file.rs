//! TOML file configuration structures.
//!
//! These structs directly map to the `gavel.toml` file format. Every section
//! and field is optional; missing values fall back to the pipeline defaults.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub server: ServerConfig,
    pub pipeline: PipelineSection,
    pub queue: QueueSection,
    pub feed: FeedSection,
    pub cache: CacheSection,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port the health/stats endpoint listens on.
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// `[pipeline]`: thresholds, intervals and list sizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub about_to_close_threshold_secs: u64,
    pub reconciliation_interval_secs: u64,
    pub popularity_interval_secs: u64,
    pub recent_auctions_max: usize,
    pub popular_auctions_max: usize,
    pub cache_ttl_secs: u64,
    pub call_timeout_ms: u64,
    pub max_transient_retries: u32,
    pub reconcile_page_size: u32,
    pub enqueue_due_closures: bool,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            about_to_close_threshold_secs: 300,
            reconciliation_interval_secs: 120,
            popularity_interval_secs: 60,
            recent_auctions_max: 20,
            popular_auctions_max: 20,
            cache_ttl_secs: 3600,
            call_timeout_ms: 5000,
            max_transient_retries: 3,
            reconcile_page_size: 500,
            enqueue_due_closures: true,
        }
    }
}

/// `[queue]`: command queue delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    pub max_deliveries: u32,
    pub visibility_timeout_secs: u64,
    pub receive_wait_ms: u64,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            max_deliveries: 5,
            visibility_timeout_secs: 30,
            receive_wait_ms: 1000,
        }
    }
}

/// `[feed]`: change feed checkpointing and batching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSection {
    /// Checkpoint name. Processes sharing it share progress.
    pub consumer: String,
    pub batch_size: u32,
    pub wait_ms: u64,
    /// Records younger than this are not read yet, so concurrently committed
    /// transactions can fill sequence gaps first.
    pub settle_ms: u64,
    /// Restrict this process to some partitions.
    pub partitions: Option<Vec<i32>>,
}

impl Default for FeedSection {
    fn default() -> Self {
        Self {
            consumer: "cache-sync".to_string(),
            batch_size: 100,
            wait_ms: 1000,
            settle_ms: 500,
            partitions: None,
        }
    }
}

/// Where derived views are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Postgres,
    /// Process-local; only sensible for a single instance.
    Memory,
}

/// `[cache]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub backend: CacheBackend,
}
