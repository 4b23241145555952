use super::ops::{CacheOp, InvalidationPlan};
use crate::error::SyncError;
use crate::stores::CacheStore;
use tracing::{debug, warn};

/// What happened while applying a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Operations that ran.
    pub applied: usize,
    /// Conditional writes that lost to newer state: a newer cached snapshot,
    /// a live guard key, a counted token or a fresh touch stamp.
    pub superseded: usize,
}

/// Apply `plan` in order, stopping at the first failure.
///
/// Operations before the failing one stay applied. Plans are ordered so that
/// any prefix leaves the cache stale rather than wrong, and every operation
/// is idempotent, so the caller can simply apply the whole plan again.
pub async fn apply_plan(
    cache: &dyn CacheStore,
    plan: &InvalidationPlan,
) -> Result<ApplyReport, SyncError> {
    let mut report = ApplyReport::default();
    for op in plan {
        let result = match op {
            CacheOp::PutVersioned {
                key,
                value,
                version,
                ttl,
            } => cache
                .put_versioned(key, value, *version, *ttl)
                .await
                .map(|written| {
                    if !written {
                        debug!(key = %key, version, "Cached snapshot is newer, keeping it");
                        report.superseded += 1;
                    }
                }),
            CacheOp::PutVersionedUnless {
                key,
                value,
                version,
                ttl,
                guard,
            } => cache
                .put_versioned_unless(key, value, *version, *ttl, guard)
                .await
                .map(|written| {
                    if !written {
                        debug!(key = %key, guard = %guard, version, "Guarded write skipped");
                        report.superseded += 1;
                    }
                }),
            CacheOp::Set { key, value, ttl } => cache.set(key, value, *ttl).await,
            CacheOp::SetIfAbsent { key, value, ttl } => {
                cache.set_if_absent(key, value, *ttl).await.map(|_| ())
            }
            CacheOp::Delete { key } => cache.del(key).await.map(|_| ()),
            CacheOp::IndexAdd {
                index,
                member,
                score,
            } => cache.zadd(index, member, *score).await.map(|_| ()),
            CacheOp::IndexRemove { index, member } => {
                cache.zrem(index, member).await.map(|_| ())
            }
            CacheOp::IndexIncrementOnce {
                index,
                member,
                delta,
                token,
                ttl,
            } => cache
                .zincrby_once(index, member, *delta, token, *ttl)
                .await
                .map(|counted| {
                    if !counted {
                        debug!(token = %token, "Already counted");
                        report.superseded += 1;
                    }
                }),
            CacheOp::IndexAddUntouched {
                index,
                touched,
                member,
                score,
                since,
            } => cache
                .zadd_untouched(index, touched, member, *score, *since)
                .await
                .map(|written| {
                    if !written {
                        debug!(member = %member, "Touched since, leaving it");
                        report.superseded += 1;
                    }
                }),
            CacheOp::IndexRemoveUntouched {
                index,
                touched,
                member,
                since,
            } => cache
                .zrem_untouched(index, touched, member, *since)
                .await
                .map(|removed| {
                    if !removed {
                        debug!(member = %member, "Touched since, leaving it");
                        report.superseded += 1;
                    }
                }),
            CacheOp::IndexTrim { index, keep } => {
                cache.ztrim_lowest(index, *keep).await.map(|_| ())
            }
        };
        if let Err(e) = result {
            warn!(
                op = op.name(),
                key = op.key(),
                applied = report.applied,
                remaining = plan.len() - report.applied,
                error = %e,
                "Cache operation failed, plan left partially applied"
            );
            return Err(e.into());
        }
        report.applied += 1;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::keys;
    use crate::stores::memory::MemoryCacheStore;
    use smallvec::smallvec;

    #[tokio::test]
    async fn test_applies_in_order() {
        let cache = MemoryCacheStore::new();
        let plan: InvalidationPlan = smallvec![
            CacheOp::IndexAdd {
                index: keys::RECENT_AUCTIONS,
                member: "a".into(),
                score: 1.0,
            },
            CacheOp::IndexAdd {
                index: keys::RECENT_AUCTIONS,
                member: "b".into(),
                score: 2.0,
            },
            CacheOp::IndexTrim {
                index: keys::RECENT_AUCTIONS,
                keep: 1,
            },
        ];
        let report = apply_plan(&cache, &plan).await.unwrap();
        assert_eq!(report.applied, 3);
        let left = cache.zrevrange(keys::RECENT_AUCTIONS, 10).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].member, "b");
    }

    #[tokio::test]
    async fn test_counts_superseded_snapshots() {
        let cache = MemoryCacheStore::new();
        cache.put_versioned("auction:a", "new", 9, None).await.unwrap();
        let plan: InvalidationPlan = smallvec![CacheOp::PutVersioned {
            key: "auction:a".into(),
            value: "old".into(),
            version: 3,
            ttl: None,
        }];
        let report = apply_plan(&cache, &plan).await.unwrap();
        assert_eq!(report.superseded, 1);
        assert_eq!(cache.get("auction:a").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_counts_conditional_writes_that_yield() {
        let cache = MemoryCacheStore::new();
        cache.set("user-deleted:u", "{}", None).await.unwrap();
        cache.zadd(keys::ABOUT_TO_CLOSE_TOUCHED, "a", 500.0).await.unwrap();
        let plan: InvalidationPlan = smallvec![
            CacheOp::PutVersionedUnless {
                key: "user:u".into(),
                value: "{}".into(),
                version: 1,
                ttl: None,
                guard: "user-deleted:u".into(),
            },
            CacheOp::IndexAddUntouched {
                index: keys::ABOUT_TO_CLOSE,
                touched: keys::ABOUT_TO_CLOSE_TOUCHED,
                member: "a".into(),
                score: 9.0,
                since: 100.0,
            },
            CacheOp::IndexIncrementOnce {
                index: keys::POPULAR_RANKING,
                member: "a".into(),
                delta: 1.0,
                token: "popular-bid:b".into(),
                ttl: None,
            },
        ];
        let report = apply_plan(&cache, &plan).await.unwrap();
        assert_eq!(report.applied, 3);
        assert_eq!(report.superseded, 2);
        assert_eq!(cache.get("user:u").await.unwrap(), None);
        assert_eq!(cache.zscore(keys::ABOUT_TO_CLOSE, "a").await.unwrap(), None);
        assert_eq!(cache.zscore(keys::POPULAR_RANKING, "a").await.unwrap(), Some(1.0));
    }

    #[tokio::test]
    async fn test_stops_at_first_failure() {
        let cache = MemoryCacheStore::new();
        cache.fail_after(1).await;
        let plan: InvalidationPlan = smallvec![
            CacheOp::Set {
                key: "a".into(),
                value: "1".into(),
                ttl: None,
            },
            CacheOp::Set {
                key: "b".into(),
                value: "2".into(),
                ttl: None,
            },
        ];
        let err = apply_plan(&cache, &plan).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::TransientIo);
        cache.set_available(true).await;
        assert_eq!(cache.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(cache.get("b").await.unwrap(), None);
    }
}
