use super::ops::{CacheOp, InvalidationPlan};
use crate::config::PipelineConfig;
use crate::entities::{
    AboutToCloseEntry, AuctionSnapshot, DeletionMarker, UserSnapshot, is_about_to_close, keys,
    score_millis,
};
use crate::error::SyncError;
use crate::events::{ReconciliationDiff, SyncEvent};
use compact_str::CompactString;
use gavel_sdk::objects::{AuctionDocument, UserDocument};
use smallvec::smallvec;
use std::time::Duration;
use time::OffsetDateTime;

/// Stateless translation of events into cache mutations.
///
/// Ordering rules every plan follows:
/// - an index entry that became invalid is removed before anything is
///   written in its place;
/// - a write to the about-to-close index is preceded by a touch stamp, so a
///   reconciliation pass that started earlier leaves it alone;
/// - anything that cannot be updated in one call is deleted and left for the
///   next read to repopulate.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidationEngine {
    about_to_close_threshold: Duration,
    cache_ttl: Duration,
    recent_auctions_max: usize,
}

impl InvalidationEngine {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            about_to_close_threshold: config.about_to_close_threshold,
            cache_ttl: config.cache_ttl,
            recent_auctions_max: config.recent_auctions_max,
        }
    }

    pub fn about_to_close_threshold(&self) -> Duration {
        self.about_to_close_threshold
    }

    /// The cache operations for `event`, observed at `now`.
    ///
    /// Fails only if a snapshot cannot be serialized.
    pub fn plan(&self, event: &SyncEvent, now: OffsetDateTime) -> Result<InvalidationPlan, SyncError> {
        match event {
            SyncEvent::AuctionChanged(doc) => self.auction_changed(doc, now),
            SyncEvent::UserChanged(doc) => self.user_changed(doc),
            SyncEvent::BidPlaced(bid) => Ok(smallvec![CacheOp::IndexIncrementOnce {
                index: keys::POPULAR_RANKING,
                member: bid.auction_id.clone(),
                delta: 1.0,
                token: keys::counted_bid(&bid.id),
                ttl: Some(self.cache_ttl),
            }]),
            SyncEvent::AuctionClosed(doc) => {
                let mut plan = self.leave_about_to_close(&doc.id, now);
                plan.push(self.auction_snapshot(doc)?);
                Ok(plan)
            }
            SyncEvent::UserDeleted { user_id } => Ok(smallvec![CacheOp::Delete {
                key: keys::user(user_id),
            }]),
            SyncEvent::UserDeletionRecorded { user_id } => {
                let marker = DeletionMarker::new(now)
                    .to_cache_value()
                    .map_err(|e| SyncError::Malformed(e.to_string()))?;
                // The second delete clears a snapshot written between the
                // first delete and the marker.
                Ok(smallvec![
                    CacheOp::SetIfAbsent {
                        key: keys::user_deleted(user_id),
                        value: marker,
                        ttl: None,
                    },
                    CacheOp::Delete {
                        key: keys::user(user_id),
                    },
                ])
            }
            SyncEvent::Reconciled(diff) => Ok(Self::reconciled(diff)),
            SyncEvent::PopularityWindow { top } => {
                if top.is_empty() {
                    return Ok(InvalidationPlan::new());
                }
                Ok(smallvec![
                    CacheOp::Set {
                        key: keys::POPULAR_AUCTIONS.to_string(),
                        value: serde_json::to_string(top)?,
                        ttl: None,
                    },
                    CacheOp::Delete {
                        key: keys::POPULAR_RANKING_CLOSING.to_string(),
                    },
                ])
            }
        }
    }

    fn auction_changed(
        &self,
        doc: &AuctionDocument,
        now: OffsetDateTime,
    ) -> Result<InvalidationPlan, SyncError> {
        let relevant = is_about_to_close(doc.status, doc.end_time, now, self.about_to_close_threshold);
        let mut plan = if relevant {
            let entry = AboutToCloseEntry::new(doc.id.clone(), doc.end_time);
            let mut plan: InvalidationPlan = smallvec![self.auction_snapshot(doc)?];
            plan.extend(Self::enter_about_to_close(&entry, now));
            plan
        } else {
            let mut plan = self.leave_about_to_close(&doc.id, now);
            plan.push(self.auction_snapshot(doc)?);
            plan
        };
        plan.push(CacheOp::IndexAdd {
            index: keys::RECENT_AUCTIONS,
            member: doc.id.clone(),
            score: score_millis(doc.created_at),
        });
        plan.push(CacheOp::IndexTrim {
            index: keys::RECENT_AUCTIONS,
            keep: self.recent_auctions_max,
        });
        Ok(plan)
    }

    fn user_changed(&self, doc: &UserDocument) -> Result<InvalidationPlan, SyncError> {
        if !doc.is_active() {
            return Ok(smallvec![CacheOp::Delete {
                key: keys::user(&doc.id),
            }]);
        }
        Ok(smallvec![CacheOp::PutVersionedUnless {
            key: keys::user(&doc.id),
            value: UserSnapshot::from(doc).to_cache_value()?,
            version: doc.version,
            ttl: Some(self.cache_ttl),
            guard: keys::user_deleted(&doc.id),
        }])
    }

    fn auction_snapshot(&self, doc: &AuctionDocument) -> Result<CacheOp, SyncError> {
        Ok(CacheOp::PutVersioned {
            key: keys::auction(&doc.id),
            value: AuctionSnapshot::from(doc).to_cache_value()?,
            version: doc.version,
            ttl: Some(self.cache_ttl),
        })
    }

    fn enter_about_to_close(entry: &AboutToCloseEntry, now: OffsetDateTime) -> InvalidationPlan {
        smallvec![
            CacheOp::IndexAdd {
                index: keys::ABOUT_TO_CLOSE_TOUCHED,
                member: entry.auction_id.clone(),
                score: score_millis(now),
            },
            CacheOp::IndexAdd {
                index: keys::ABOUT_TO_CLOSE,
                member: entry.auction_id.clone(),
                score: entry.score(),
            },
        ]
    }

    fn leave_about_to_close(&self, auction_id: &CompactString, now: OffsetDateTime) -> InvalidationPlan {
        smallvec![
            CacheOp::IndexAdd {
                index: keys::ABOUT_TO_CLOSE_TOUCHED,
                member: auction_id.clone(),
                score: score_millis(now),
            },
            CacheOp::IndexRemove {
                index: keys::ABOUT_TO_CLOSE,
                member: auction_id.clone(),
            },
        ]
    }

    /// Every write is conditional on the member's touch stamp, so a change
    /// notification applied after the pass read its stamps still wins.
    fn reconciled(diff: &ReconciliationDiff) -> InvalidationPlan {
        let since = score_millis(diff.started_at);
        let mut plan = InvalidationPlan::new();
        for auction_id in &diff.to_remove {
            plan.push(CacheOp::IndexRemoveUntouched {
                index: keys::ABOUT_TO_CLOSE,
                touched: keys::ABOUT_TO_CLOSE_TOUCHED,
                member: auction_id.clone(),
                since,
            });
        }
        for entry in &diff.to_add {
            plan.push(CacheOp::IndexAddUntouched {
                index: keys::ABOUT_TO_CLOSE,
                touched: keys::ABOUT_TO_CLOSE_TOUCHED,
                member: entry.auction_id.clone(),
                score: entry.score(),
                since,
            });
        }
        for auction_id in &diff.stale_stamps {
            plan.push(CacheOp::IndexRemoveUntouched {
                index: keys::ABOUT_TO_CLOSE_TOUCHED,
                touched: keys::ABOUT_TO_CLOSE_TOUCHED,
                member: auction_id.clone(),
                since,
            });
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gavel_sdk::objects::{AuctionStatus, BidDocument, UserStatus};
    use rust_decimal::Decimal;

    fn now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_800_000_000).unwrap()
    }

    fn engine() -> InvalidationEngine {
        InvalidationEngine::new(&PipelineConfig {
            about_to_close_threshold: Duration::from_secs(120),
            recent_auctions_max: 3,
            ..PipelineConfig::default()
        })
    }

    fn auction(ends_in_secs: i64, status: AuctionStatus) -> AuctionDocument {
        AuctionDocument {
            id: "a-1".into(),
            title: "Lamp".into(),
            description: String::new(),
            seller_id: "u-1".into(),
            thumbnail_id: None,
            created_at: now() - time::Duration::hours(1),
            end_time: now() + time::Duration::seconds(ends_in_secs),
            status,
            current_price: Decimal::new(500, 2),
            bid_count: 0,
            version: 4,
        }
    }

    fn names(plan: &InvalidationPlan) -> Vec<(&'static str, String)> {
        plan.iter().map(|op| (op.name(), op.key().to_string())).collect()
    }

    #[test]
    fn test_relevant_auction_enters_index_after_snapshot() {
        let plan = engine()
            .plan(&SyncEvent::AuctionChanged(auction(90, AuctionStatus::Open)), now())
            .unwrap();
        assert_eq!(
            names(&plan),
            vec![
                ("put_versioned", "auction:a-1".to_string()),
                ("zadd", keys::ABOUT_TO_CLOSE_TOUCHED.to_string()),
                ("zadd", keys::ABOUT_TO_CLOSE.to_string()),
                ("zadd", keys::RECENT_AUCTIONS.to_string()),
                ("ztrim", keys::RECENT_AUCTIONS.to_string()),
            ]
        );
        assert_eq!(
            plan[2],
            CacheOp::IndexAdd {
                index: keys::ABOUT_TO_CLOSE,
                member: "a-1".into(),
                score: (now() + time::Duration::seconds(90)).unix_timestamp() as f64,
            }
        );
    }

    #[test]
    fn test_irrelevant_auction_leaves_index_first() {
        let plan = engine()
            .plan(&SyncEvent::AuctionChanged(auction(600, AuctionStatus::Open)), now())
            .unwrap();
        assert_eq!(plan[0].name(), "zadd");
        assert_eq!(plan[0].key(), keys::ABOUT_TO_CLOSE_TOUCHED);
        assert_eq!(plan[1].name(), "zrem");
        assert_eq!(plan[1].key(), keys::ABOUT_TO_CLOSE);
        assert_eq!(plan[2].name(), "put_versioned");
    }

    #[test]
    fn test_closed_auction_is_removed_and_snapshot_replaced() {
        let closed = auction(30, AuctionStatus::Closed);
        let plan = engine()
            .plan(&SyncEvent::AuctionClosed(closed.clone()), now())
            .unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[1].name(), "zrem");
        let CacheOp::PutVersioned { value, version, .. } = &plan[2] else {
            panic!("expected snapshot write");
        };
        assert_eq!(*version, 4);
        let snapshot = AuctionSnapshot::from_cache_value(value).unwrap();
        assert_eq!(snapshot.status, AuctionStatus::Closed);
    }

    #[test]
    fn test_bid_bumps_ranking_once_per_bid() {
        let bid = BidDocument {
            id: "b-1".into(),
            auction_id: "a-1".into(),
            user_id: "u-2".into(),
            user_name: "bob".into(),
            amount: Decimal::ONE,
            created_at: now(),
        };
        let plan = engine().plan(&SyncEvent::BidPlaced(bid), now()).unwrap();
        assert_eq!(
            plan.as_slice(),
            &[CacheOp::IndexIncrementOnce {
                index: keys::POPULAR_RANKING,
                member: "a-1".into(),
                delta: 1.0,
                token: "popular-bid:b-1".into(),
                ttl: Some(PipelineConfig::default().cache_ttl),
            }]
        );
    }

    #[test]
    fn test_user_changes() {
        let mut user = UserDocument {
            id: "u-1".into(),
            name: "alice".into(),
            photo_id: None,
            status: UserStatus::Active,
            version: 2,
        };
        let plan = engine().plan(&SyncEvent::UserChanged(user.clone()), now()).unwrap();
        assert!(matches!(
            &plan[0],
            CacheOp::PutVersionedUnless { guard, version: 2, .. } if guard == "user-deleted:u-1"
        ));
        user.status = UserStatus::Inactive;
        let plan = engine().plan(&SyncEvent::UserChanged(user), now()).unwrap();
        assert_eq!(
            plan.as_slice(),
            &[CacheOp::Delete {
                key: "user:u-1".into()
            }]
        );
    }

    #[test]
    fn test_reconciliation_removes_before_adding() {
        let mut diff = ReconciliationDiff::new(now());
        diff.to_add
            .push(AboutToCloseEntry::new("new", now() + time::Duration::seconds(30)));
        diff.to_remove.push("gone".into());
        diff.stale_stamps.push("old".into());
        let plan = engine().plan(&SyncEvent::Reconciled(diff), now()).unwrap();
        let ops: Vec<_> = plan.iter().map(|op| (op.name(), op.key())).collect();
        assert_eq!(
            ops,
            vec![
                ("zrem_untouched", keys::ABOUT_TO_CLOSE),
                ("zadd_untouched", keys::ABOUT_TO_CLOSE),
                ("zrem_untouched", keys::ABOUT_TO_CLOSE_TOUCHED),
            ]
        );
        assert_eq!(
            plan[1],
            CacheOp::IndexAddUntouched {
                index: keys::ABOUT_TO_CLOSE,
                touched: keys::ABOUT_TO_CLOSE_TOUCHED,
                member: "new".into(),
                score: (now() + time::Duration::seconds(30)).unix_timestamp() as f64,
                since: score_millis(now()),
            }
        );
    }

    #[test]
    fn test_empty_popularity_window_changes_nothing() {
        let plan = engine()
            .plan(&SyncEvent::PopularityWindow { top: vec![] }, now())
            .unwrap();
        assert!(plan.is_empty());
        let plan = engine()
            .plan(
                &SyncEvent::PopularityWindow {
                    top: vec!["a".into(), "b".into()],
                },
                now(),
            )
            .unwrap();
        assert_eq!(
            plan[0],
            CacheOp::Set {
                key: keys::POPULAR_AUCTIONS.into(),
                value: r#"["a","b"]"#.into(),
                ttl: None,
            }
        );
        assert_eq!(
            plan[1],
            CacheOp::Delete {
                key: keys::POPULAR_RANKING_CLOSING.into()
            }
        );
    }

    #[test]
    fn test_deletion_marker_is_set_if_absent() {
        let plan = engine()
            .plan(
                &SyncEvent::UserDeletionRecorded {
                    user_id: "u-9".into(),
                },
                now(),
            )
            .unwrap();
        assert!(matches!(
            &plan[0],
            CacheOp::SetIfAbsent { key, ttl: None, .. } if key == "user-deleted:u-9"
        ));
        assert_eq!(
            plan[1],
            CacheOp::Delete {
                key: "user:u-9".into()
            }
        );
    }
}
