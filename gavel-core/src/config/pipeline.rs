use std::time::Duration;

/// Tunables shared by every consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// An open auction is about to close once its end is at most this far away.
    pub about_to_close_threshold: Duration,
    /// Period of the about-to-close reconciliation pass.
    pub reconciliation_interval: Duration,
    /// Period of the popular-auctions refresh.
    pub popularity_interval: Duration,
    /// Length cap of the recent-auctions index.
    pub recent_auctions_max: usize,
    /// Number of auctions materialized in the popular-auctions list.
    pub popular_auctions_max: usize,
    /// Expiry applied to auction and user snapshots.
    pub cache_ttl: Duration,
    /// Upper bound on any single store, cache or queue call.
    pub call_timeout: Duration,
    /// In-process retries of a transient failure before giving the work
    /// item back to its transport.
    pub max_transient_retries: u32,
    /// Page size of the reconciliation query.
    pub reconcile_page_size: u32,
    /// Publish close-auction commands for open auctions past their end.
    pub enqueue_due_closures: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            about_to_close_threshold: Duration::from_secs(5 * 60),
            reconciliation_interval: Duration::from_secs(2 * 60),
            popularity_interval: Duration::from_secs(60),
            recent_auctions_max: 20,
            popular_auctions_max: 20,
            cache_ttl: Duration::from_secs(60 * 60),
            call_timeout: Duration::from_secs(5),
            max_transient_retries: 3,
            reconcile_page_size: 500,
            enqueue_due_closures: true,
        }
    }
}
