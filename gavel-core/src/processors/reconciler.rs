//! About-to-close reconciliation.
//!
//! A pass captures its start time, pages through the authoritative
//! "open and ending within the threshold" query, and corrects the cached
//! index against the result. Entries touched by a notification or command
//! after the pass started are left alone, including ones touched after the
//! pass read the cached index.

use super::stats::PipelineStats;
use crate::config::{ConfigStore, PipelineConfig};
use crate::entities::{AboutToCloseEntry, is_about_to_close, keys};
use crate::error::SyncError;
use crate::events::SyncEvent;
use crate::invalidation::{InvalidationEngine, apply_plan, diff_about_to_close};
use crate::stores::{CacheStore, ClosingSoonQuery, CommandQueue, PrimaryStore};
use crate::utils::backoff::retry_transient;
use crate::utils::clock::Clock;
use compact_str::CompactString;
use gavel_sdk::objects::CommandMessage;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// The authoritative side of a pass, captured by [`Reconciler::begin`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationSnapshot {
    pub started_at: OffsetDateTime,
    pub desired: Vec<AboutToCloseEntry>,
    /// Open auctions already past their end time.
    pub due: Vec<CompactString>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub desired: usize,
    pub added: usize,
    pub removed: usize,
    pub stamps_collected: usize,
    /// Corrections skipped because a notification touched the member first.
    pub superseded: usize,
    pub closures_enqueued: usize,
}

pub struct Reconciler {
    primary: Arc<dyn PrimaryStore>,
    cache: Arc<dyn CacheStore>,
    queue: Arc<dyn CommandQueue>,
    config: ConfigStore<PipelineConfig>,
    clock: Arc<dyn Clock>,
    stats: Arc<PipelineStats>,
}

impl Reconciler {
    pub fn new(
        primary: Arc<dyn PrimaryStore>,
        cache: Arc<dyn CacheStore>,
        queue: Arc<dyn CommandQueue>,
        config: ConfigStore<PipelineConfig>,
        clock: Arc<dyn Clock>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            primary,
            cache,
            queue,
            config,
            clock,
            stats,
        }
    }

    /// One full pass.
    pub async fn run_pass(&self) -> Result<ReconciliationReport, SyncError> {
        let snapshot = self.begin().await?;
        self.finish(snapshot).await
    }

    /// Capture the start time, then read every open auction ending within
    /// the threshold.
    pub async fn begin(&self) -> Result<ReconciliationSnapshot, SyncError> {
        let config = self.config.snapshot().await;
        let started_at = self.clock.now();
        let threshold = config.about_to_close_threshold;
        let mut query = ClosingSoonQuery {
            closing_before: started_at + threshold,
            after_id: None,
            limit: config.reconcile_page_size.max(1),
        };
        let mut snapshot = ReconciliationSnapshot {
            started_at,
            desired: Vec::new(),
            due: Vec::new(),
        };

        loop {
            let primary = &self.primary;
            let page_query = &query;
            let page = retry_transient("reconcile query", config.max_transient_retries, || async move {
                primary
                    .open_auctions_closing_before(page_query)
                    .await
                    .map_err(SyncError::from)
            })
            .await?;
            let page_len = page.len();
            query.after_id = page.last().map(|doc| doc.id.clone());

            for doc in page {
                if !is_about_to_close(doc.status, doc.end_time, started_at, threshold) {
                    continue;
                }
                if doc.end_time <= started_at {
                    snapshot.due.push(doc.id.clone());
                }
                snapshot
                    .desired
                    .push(AboutToCloseEntry::new(doc.id, doc.end_time));
            }

            if page_len < query.limit as usize {
                break;
            }
        }

        debug!(
            desired = snapshot.desired.len(),
            due = snapshot.due.len(),
            "Reconciliation query complete"
        );
        Ok(snapshot)
    }

    /// Compare `snapshot` with the cached index and apply the corrections.
    pub async fn finish(
        &self,
        snapshot: ReconciliationSnapshot,
    ) -> Result<ReconciliationReport, SyncError> {
        let config = self.config.snapshot().await;
        let engine = InvalidationEngine::new(&config);

        let indexed = self
            .cache
            .zrange_by_score(keys::ABOUT_TO_CLOSE, f64::NEG_INFINITY, f64::INFINITY)
            .await?;
        let stamps = self
            .cache
            .zrange_by_score(keys::ABOUT_TO_CLOSE_TOUCHED, f64::NEG_INFINITY, f64::INFINITY)
            .await?;
        let diff = diff_about_to_close(&snapshot.desired, &indexed, &stamps, snapshot.started_at);

        let mut report = ReconciliationReport {
            desired: snapshot.desired.len(),
            added: diff.to_add.len(),
            removed: diff.to_remove.len(),
            stamps_collected: diff.stale_stamps.len(),
            superseded: 0,
            closures_enqueued: 0,
        };

        if !diff.is_empty() {
            let plan = engine.plan(&SyncEvent::Reconciled(diff), self.clock.now())?;
            report.superseded = apply_plan(self.cache.as_ref(), &plan).await?.superseded;
            if report.superseded > 0 {
                debug!(
                    superseded = report.superseded,
                    "Corrections lost to newer notifications"
                );
            }
        }
        self.stats.reconciliation_pass(report.added, report.removed);

        if config.enqueue_due_closures {
            report.closures_enqueued = self.enqueue_closures(&snapshot.due).await;
            self.stats.closures_enqueued(report.closures_enqueued);
        }

        if report.added + report.removed > 0 {
            info!(
                desired = report.desired,
                added = report.added,
                removed = report.removed,
                "About-to-close index corrected"
            );
        }
        Ok(report)
    }

    /// Publish close-auction for each due auction. A failed publish is
    /// retried by the next pass, which sees the auction still open.
    async fn enqueue_closures(&self, due: &[CompactString]) -> usize {
        let mut published = 0;
        for auction_id in due {
            match self
                .queue
                .publish(&CommandMessage::close_auction(auction_id.clone()))
                .await
            {
                Ok(()) => published += 1,
                Err(e) => {
                    warn!(auction_id = %auction_id, error = %e, "Failed to enqueue close-auction");
                }
            }
        }
        published
    }
}
