use super::stats::PipelineStats;
use crate::config::{ConfigStore, PipelineConfig};
use crate::entities::keys;
use crate::error::SyncError;
use crate::events::SyncEvent;
use crate::invalidation::{InvalidationEngine, apply_plan};
use crate::stores::CacheStore;
use crate::utils::clock::Clock;
use compact_str::CompactString;
use std::sync::Arc;
use tracing::debug;

/// Closes a popularity window: the auctions that collected the most bids
/// since the last window become the `popular-auctions` list and the ranking
/// starts over.
///
/// The live ranking is moved aside before it is read, so a bid counted while
/// the window closes lands in the next window. Each bid id counts once.
pub struct PopularityRefresher {
    cache: Arc<dyn CacheStore>,
    config: ConfigStore<PipelineConfig>,
    clock: Arc<dyn Clock>,
    stats: Arc<PipelineStats>,
}

impl PopularityRefresher {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        config: ConfigStore<PipelineConfig>,
        clock: Arc<dyn Clock>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            cache,
            config,
            clock,
            stats,
        }
    }

    /// Returns the materialized ids, best first. An empty window leaves the
    /// previous list in place.
    pub async fn refresh(&self) -> Result<Vec<CompactString>, SyncError> {
        let config = self.config.snapshot().await;
        // A closing ranking left by an interrupted refresh is finished first;
        // the live one then waits for the next tick.
        let rotated = self
            .cache
            .zrename_if_absent(keys::POPULAR_RANKING, keys::POPULAR_RANKING_CLOSING)
            .await?;
        if !rotated {
            debug!("Finishing a previously closed window");
        }
        let top: Vec<CompactString> = self
            .cache
            .zrevrange(keys::POPULAR_RANKING_CLOSING, config.popular_auctions_max)
            .await?
            .into_iter()
            .map(|m| CompactString::from(m.member))
            .collect();
        let plan = InvalidationEngine::new(&config).plan(
            &SyncEvent::PopularityWindow { top: top.clone() },
            self.clock.now(),
        )?;
        apply_plan(self.cache.as_ref(), &plan).await?;
        if !top.is_empty() {
            self.stats.popularity_window();
        }
        debug!(materialized = top.len(), "Popularity window closed");
        Ok(top)
    }
}
