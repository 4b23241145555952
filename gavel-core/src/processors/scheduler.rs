//! TimerScheduler processor.
//!
//! The TimerScheduler is responsible for:
//! - Running an about-to-close reconciliation pass every reconciliation interval
//! - Closing a popularity window every popularity interval
//! - Purging expired cache entries after each reconciliation pass
//! - Re-arming both timers when the pipeline config is reloaded
//!
//! A failed tick is logged and left for the next one; the schedule never stops.

use super::popularity::PopularityRefresher;
use super::reconciler::Reconciler;
use crate::config::{ConfigStore, PipelineConfig};
use crate::events::ShutdownReceiver;
use crate::stores::CacheStore;
use std::sync::Arc;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct TimerScheduler {
    reconciler: Reconciler,
    popularity: PopularityRefresher,
    cache: Arc<dyn CacheStore>,
    config: ConfigStore<PipelineConfig>,
}

fn every(period: std::time::Duration) -> Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

impl TimerScheduler {
    pub fn new(
        reconciler: Reconciler,
        popularity: PopularityRefresher,
        cache: Arc<dyn CacheStore>,
        config: ConfigStore<PipelineConfig>,
    ) -> Self {
        Self {
            reconciler,
            popularity,
            cache,
            config,
        }
    }

    /// Tick until shutdown. Both jobs run once right away.
    pub async fn run(self, mut shutdown_rx: ShutdownReceiver) {
        info!("TimerScheduler started");
        let mut watcher = self.config.subscribe();

        'arm: loop {
            let config = self.config.snapshot().await;
            info!(
                reconciliation_secs = config.reconciliation_interval.as_secs(),
                popularity_secs = config.popularity_interval.as_secs(),
                "Timers armed"
            );
            let mut reconcile = every(config.reconciliation_interval);
            let mut popularity = every(config.popularity_interval);

            loop {
                tokio::select! {
                    biased;

                    res = shutdown_rx.changed() => {
                        if res.is_err() || *shutdown_rx.borrow() {
                            info!("TimerScheduler received shutdown signal");
                            break 'arm;
                        }
                    }

                    Ok(()) = watcher.changed() => {
                        info!("Pipeline config changed, re-arming timers");
                        continue 'arm;
                    }

                    _ = reconcile.tick() => self.reconcile_tick().await,

                    _ = popularity.tick() => self.popularity_tick().await,
                }
            }
        }

        info!("TimerScheduler shutdown complete");
    }

    async fn reconcile_tick(&self) {
        match self.reconciler.run_pass().await {
            Ok(report) => debug!(
                desired = report.desired,
                added = report.added,
                removed = report.removed,
                stamps_collected = report.stamps_collected,
                closures_enqueued = report.closures_enqueued,
                "Reconciliation pass complete"
            ),
            Err(e) => warn!(error = %e, kind = %e.kind(), "Reconciliation pass failed"),
        }
        match self.cache.purge_expired().await {
            Ok(0) => {}
            Ok(purged) => debug!(purged, "Purged expired cache entries"),
            Err(e) => warn!(error = %e, "Failed to purge expired cache entries"),
        }
    }

    async fn popularity_tick(&self) {
        if let Err(e) = self.popularity.refresh().await {
            warn!(error = %e, "Popularity refresh failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::entities::keys;
    use crate::processors::stats::PipelineStats;
    use crate::stores::memory::{MemoryCacheStore, MemoryCommandQueue, MemoryPrimaryStore};
    use crate::utils::clock::ManualClock;
    use gavel_sdk::objects::{AuctionDocument, AuctionStatus};
    use rust_decimal::Decimal;
    use std::time::Duration;
    use time::OffsetDateTime;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_reconcile_and_rearm_on_reload() {
        let now = OffsetDateTime::from_unix_timestamp(1_800_000_000).unwrap();
        let primary = Arc::new(MemoryPrimaryStore::default());
        let cache = Arc::new(MemoryCacheStore::new());
        let queue = Arc::new(MemoryCommandQueue::new(&QueueConfig::default()));
        let config = ConfigStore::new(PipelineConfig::default());
        let clock = Arc::new(ManualClock::new(now));
        let stats = Arc::new(PipelineStats::new());

        let reconciler = Reconciler::new(
            primary.clone(),
            cache.clone(),
            queue,
            config.clone(),
            clock.clone(),
            stats.clone(),
        );
        let popularity =
            PopularityRefresher::new(cache.clone(), config.clone(), clock, stats.clone());
        let scheduler = TimerScheduler::new(reconciler, popularity, cache.clone(), config.clone());

        let (shutdown_tx, shutdown_rx) = crate::events::shutdown_channel();
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        // First pass runs immediately.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(stats.snapshot().reconciliation_passes, 1);

        primary
            .put_auction(AuctionDocument {
                id: "a".into(),
                title: "a".into(),
                description: String::new(),
                seller_id: "s".into(),
                thumbnail_id: None,
                created_at: now,
                end_time: now + time::Duration::seconds(30),
                status: AuctionStatus::Open,
                current_price: Decimal::ONE,
                bid_count: 0,
                version: 1,
            })
            .await;

        let mut faster = PipelineConfig::default();
        faster.reconciliation_interval = Duration::from_secs(5);
        config.update(faster).await;
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert!(stats.snapshot().reconciliation_passes >= 2);
        assert!(cache.zscore(keys::ABOUT_TO_CLOSE, "a").await.unwrap().is_some());

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
