//! ChangeFeedConsumer processor.
//!
//! The ChangeFeedConsumer is responsible for:
//! - Pulling batches of change records from a [`ChangeFeed`]
//! - Keeping the about-to-close and recent-auctions indices, the auction and
//!   user snapshots and the popularity ranking current
//! - Skipping and counting records it cannot parse, without failing the batch
//! - Failing the whole batch (no commit, so the feed redelivers it) when the
//!   cache is unreachable
//!
//! It never writes to the primary store.

use super::stats::PipelineStats;
use crate::config::{ConfigStore, PipelineConfig};
use crate::entities::{AuctionSnapshot, UserSnapshot, keys};
use crate::error::{Disposition, SyncError};
use crate::events::{ShutdownReceiver, SyncEvent, sleep_unless_shutdown};
use crate::invalidation::{InvalidationEngine, apply_plan};
use crate::stores::{CacheStore, ChangeBatch, ChangeFeed};
use crate::utils::backoff::{BASE_RETRY_DELAY, retry_delay};
use crate::utils::clock::Clock;
use gavel_sdk::objects::{
    AuctionDocument, BidDocument, ChangeRecord, Collection, QuestionDocument, UserDocument,
};
use kanau::processor::Processor;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// Per-batch tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub processed: usize,
    pub malformed: usize,
    /// Records older than the cached snapshot, skipped.
    pub stale: usize,
}

enum RecordOutcome {
    Applied,
    Stale,
}

pub struct ChangeFeedConsumer {
    cache: Arc<dyn CacheStore>,
    config: ConfigStore<PipelineConfig>,
    clock: Arc<dyn Clock>,
    stats: Arc<PipelineStats>,
}

impl ChangeFeedConsumer {
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

    /// Pull, process and commit batches until shutdown.
    ///
    /// A batch that fails is not committed; the loop backs off and asks the
    /// feed again, which hands the same records back.
    pub async fn run<F: ChangeFeed>(self, mut feed: F, mut shutdown_rx: ShutdownReceiver) {
        info!("ChangeFeedConsumer started");
        let mut consecutive_failures = 0u32;

        loop {
            let next = tokio::select! {
                biased;

                res = shutdown_rx.changed() => {
                    if res.is_err() || *shutdown_rx.borrow() {
                        info!("ChangeFeedConsumer received shutdown signal");
                        break;
                    }
                    continue;
                }

                next = feed.next_batch() => next,
            };

            let failed = match next {
                Ok(None) => false,
                Ok(Some(batch)) => self.process_and_commit(&mut feed, batch).await,
                Err(e) => {
                    warn!(error = %e, "Failed to read from change feed");
                    true
                }
            };

            if !failed {
                consecutive_failures = 0;
                continue;
            }
            let delay = retry_delay(consecutive_failures, BASE_RETRY_DELAY);
            consecutive_failures = consecutive_failures.saturating_add(1);
            if sleep_unless_shutdown(&mut shutdown_rx, delay).await {
                info!("ChangeFeedConsumer received shutdown signal");
                break;
            }
        }

        info!("ChangeFeedConsumer shutdown complete");
    }

    /// Returns `true` if the batch failed and should be retried.
    async fn process_and_commit<F: ChangeFeed>(&self, feed: &mut F, batch: ChangeBatch) -> bool {
        let size = batch.len();
        match self.process_batch(&batch).await {
            Ok(outcome) => {
                debug!(
                    size,
                    processed = outcome.processed,
                    malformed = outcome.malformed,
                    stale = outcome.stale,
                    "Processed change batch"
                );
                if let Err(e) = feed.commit(&batch).await {
                    // The batch will come back; every write in it is idempotent.
                    warn!(error = %e, "Failed to commit change batch");
                }
                false
            }
            Err(e) => {
                self.stats.batch_failed();
                warn!(size, error = %e, "Change batch failed, leaving it for redelivery");
                true
            }
        }
    }

    async fn handle_record(
        &self,
        engine: &InvalidationEngine,
        record: &ChangeRecord,
        now: OffsetDateTime,
    ) -> Result<RecordOutcome, SyncError> {
        let event = match record.collection {
            Collection::Auctions => {
                let doc: AuctionDocument = record.decode()?;
                if self.cached_auction_version(&doc.id).await? > Some(doc.version) {
                    return Ok(RecordOutcome::Stale);
                }
                SyncEvent::AuctionChanged(doc)
            }
            Collection::Users => {
                let doc: UserDocument = record.decode()?;
                if self.cached_user_version(&doc.id).await? > Some(doc.version) {
                    return Ok(RecordOutcome::Stale);
                }
                SyncEvent::UserChanged(doc)
            }
            Collection::Bids => SyncEvent::BidPlaced(record.decode::<BidDocument>()?),
            Collection::Questions => {
                // Questions are not cached; validate and move on.
                record.decode::<QuestionDocument>()?;
                return Ok(RecordOutcome::Applied);
            }
        };
        let plan = engine.plan(&event, now)?;
        let report = apply_plan(self.cache.as_ref(), &plan).await?;
        // A deleted user or an already counted bid.
        if !plan.is_empty() && report.superseded == plan.len() {
            return Ok(RecordOutcome::Stale);
        }
        Ok(RecordOutcome::Applied)
    }

    async fn cached_auction_version(&self, auction_id: &str) -> Result<Option<i64>, SyncError> {
        let cached = self.cache.get(&keys::auction(auction_id)).await?;
        Ok(cached
            .and_then(|value| AuctionSnapshot::from_cache_value(&value).ok())
            .map(|snapshot| snapshot.version))
    }

    async fn cached_user_version(&self, user_id: &str) -> Result<Option<i64>, SyncError> {
        let cached = self.cache.get(&keys::user(user_id)).await?;
        Ok(cached
            .and_then(|value| UserSnapshot::from_cache_value(&value).ok())
            .map(|snapshot| snapshot.version))
    }
}

impl ChangeFeedConsumer {
    /// Apply every record of `batch`. Malformed records are skipped and
    /// counted; a transient failure fails the whole batch.
    pub async fn process_batch(&self, batch: &ChangeBatch) -> Result<BatchOutcome, SyncError> {
        let config = self.config.snapshot().await;
        let engine = InvalidationEngine::new(&config);
        let mut outcome = BatchOutcome::default();

        for record in &batch.records {
            let now = self.clock.now();
            match self.handle_record(&engine, record, now).await {
                Ok(RecordOutcome::Applied) => {
                    outcome.processed += 1;
                    self.stats.record_processed();
                }
                Ok(RecordOutcome::Stale) => {
                    outcome.stale += 1;
                    self.stats.record_stale();
                    debug!(
                        collection = %record.collection,
                        sequence = record.sequence,
                        "Skipping notification superseded by cached state"
                    );
                }
                Err(e) => match e.disposition() {
                    Disposition::Skip => {
                        outcome.malformed += 1;
                        self.stats.record_malformed();
                        warn!(
                            collection = %record.collection,
                            partition = record.partition,
                            sequence = record.sequence,
                            error = %e,
                            "Skipping malformed change record"
                        );
                    }
                    Disposition::Acknowledge => {
                        outcome.processed += 1;
                        debug!(error = %e, "Change record needs no cache update");
                    }
                    Disposition::Retry => return Err(e),
                },
            }
        }

        Ok(outcome)
    }
}

impl Processor<ChangeBatch> for ChangeFeedConsumer {
    type Output = BatchOutcome;
    type Error = SyncError;

    async fn process(&self, batch: ChangeBatch) -> Result<BatchOutcome, SyncError> {
        self.process_batch(&batch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::memory::{MemoryCacheStore, MemoryPrimaryStore};
    use crate::utils::clock::ManualClock;
    use gavel_sdk::objects::{AuctionStatus, UserStatus};
    use rust_decimal::Decimal;
    use std::time::Duration;

    const NOW: i64 = 1_800_000_000;

    fn consumer(cache: Arc<MemoryCacheStore>) -> (ChangeFeedConsumer, Arc<PipelineStats>) {
        let stats = Arc::new(PipelineStats::new());
        let config = ConfigStore::new(PipelineConfig {
            about_to_close_threshold: Duration::from_secs(120),
            ..PipelineConfig::default()
        });
        let consumer = ChangeFeedConsumer::new(
            cache,
            config,
            Arc::new(ManualClock::at_unix(NOW)),
            stats.clone(),
        );
        (consumer, stats)
    }

    fn auction(id: &str, ends_in: i64, version: i64) -> AuctionDocument {
        let now = OffsetDateTime::from_unix_timestamp(NOW).unwrap();
        AuctionDocument {
            id: id.into(),
            title: "Lamp".into(),
            description: String::new(),
            seller_id: "s".into(),
            thumbnail_id: None,
            created_at: now,
            end_time: now + time::Duration::seconds(ends_in),
            status: AuctionStatus::Open,
            current_price: Decimal::ONE,
            bid_count: 0,
            version,
        }
    }

    fn record(doc: &AuctionDocument, sequence: i64) -> ChangeRecord {
        ChangeRecord::new(
            Collection::Auctions,
            0,
            sequence,
            serde_json::to_value(doc).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_relevant_auction_is_indexed() {
        let cache = Arc::new(MemoryCacheStore::new());
        let (consumer, _) = consumer(cache.clone());
        let batch = ChangeBatch::new(vec![record(&auction("a", 60, 1), 1)]);
        let outcome = consumer.process(batch).await.unwrap();
        assert_eq!(outcome.processed, 1);
        assert!(cache.zscore(keys::ABOUT_TO_CLOSE, "a").await.unwrap().is_some());
        assert!(cache.get("auction:a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_older_notification_is_stale() {
        let cache = Arc::new(MemoryCacheStore::new());
        let (consumer, stats) = consumer(cache.clone());
        // v2 ends far out; v1 (delivered late) would have indexed it.
        let batch = ChangeBatch::new(vec![
            record(&auction("a", 3_600, 2), 2),
            record(&auction("a", 60, 1), 1),
        ]);
        let outcome = consumer.process(batch).await.unwrap();
        assert_eq!(outcome.stale, 1);
        assert_eq!(stats.snapshot().stale_notifications, 1);
        assert_eq!(cache.zscore(keys::ABOUT_TO_CLOSE, "a").await.unwrap(), None);
    }

    fn user_record(doc: &UserDocument, sequence: i64) -> ChangeRecord {
        ChangeRecord::new(
            Collection::Users,
            0,
            sequence,
            serde_json::to_value(doc).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_deleted_user_is_not_resurrected() {
        let cache = Arc::new(MemoryCacheStore::new());
        let (consumer, stats) = consumer(cache.clone());
        cache
            .set(&keys::user_deleted("u"), "2027-01-15T08:00:00Z", None)
            .await
            .unwrap();
        // Written before the deletion, delivered after it.
        let user = UserDocument {
            id: "u".into(),
            name: "alice".into(),
            photo_id: None,
            status: UserStatus::Active,
            version: 1,
        };
        let outcome = consumer
            .process(ChangeBatch::new(vec![user_record(&user, 1)]))
            .await
            .unwrap();
        assert_eq!(outcome.stale, 1);
        assert_eq!(stats.snapshot().stale_notifications, 1);
        assert_eq!(cache.get("user:u").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_redelivered_bid_counts_once() {
        let cache = Arc::new(MemoryCacheStore::new());
        let (consumer, _) = consumer(cache.clone());
        let bid = BidDocument {
            id: "b-1".into(),
            auction_id: "a".into(),
            user_id: "u".into(),
            user_name: "bob".into(),
            amount: Decimal::ONE,
            created_at: OffsetDateTime::from_unix_timestamp(NOW).unwrap(),
        };
        let batch = ChangeBatch::new(vec![ChangeRecord::new(
            Collection::Bids,
            0,
            7,
            serde_json::to_value(&bid).unwrap(),
        )]);
        let first = consumer.process(batch.clone()).await.unwrap();
        assert_eq!(first.processed, 1);
        // The commit was lost, so the feed hands out the same batch again.
        let again = consumer.process(batch).await.unwrap();
        assert_eq!(again.stale, 1);
        assert_eq!(cache.zscore(keys::POPULAR_RANKING, "a").await.unwrap(), Some(1.0));
    }

    #[tokio::test]
    async fn test_cache_outage_fails_the_batch() {
        let cache = Arc::new(MemoryCacheStore::new());
        cache.set_available(false).await;
        let (consumer, _) = consumer(cache.clone());
        let batch = ChangeBatch::new(vec![record(&auction("a", 60, 1), 1)]);
        let err = consumer.process(batch).await.unwrap_err();
        assert_eq!(err.disposition(), Disposition::Retry);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_batch_is_redelivered_after_outage() {
        let cache = Arc::new(MemoryCacheStore::new());
        let primary = MemoryPrimaryStore::default();
        primary.put_auction(auction("a", 60, 1)).await;
        let feed = primary.change_feed(10, Duration::from_millis(50));
        let (consumer, stats) = consumer(cache.clone());

        cache.set_available(false).await;
        let (shutdown_tx, shutdown_rx) = crate::events::shutdown_channel();
        let handle = tokio::spawn(consumer.run(feed, shutdown_rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(stats.snapshot().failed_batches >= 1);
        cache.set_available(true).await;
        tokio::time::sleep(Duration::from_secs(15)).await;

        assert!(cache.zscore(keys::ABOUT_TO_CLOSE, "a").await.unwrap().is_some());
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
