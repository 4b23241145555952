use crate::error::CacheError;
use async_trait::async_trait;
use std::time::Duration;

/// A sorted-set member together with its score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    pub member: String,
    pub score: f64,
}

impl ScoredMember {
    pub fn new(member: impl Into<String>, score: f64) -> Self {
        Self {
            member: member.into(),
            score,
        }
    }
}

/// Key/value plus sorted-set cache.
///
/// Each call either fully applies or fails; there is no partial application
/// of a single call. Expired keys behave as absent.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Write only if the key is absent. Returns whether the value was written.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError>;

    /// Write unless the key already holds a strictly newer `version`.
    /// Returns whether the value was written.
    async fn put_versioned(
        &self,
        key: &str,
        value: &str,
        version: i64,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError>;

    /// Like [`put_versioned`](Self::put_versioned), but writes nothing while
    /// `guard` holds a live value. The check and the write are one step.
    async fn put_versioned_unless(
        &self,
        key: &str,
        value: &str,
        version: i64,
        ttl: Option<Duration>,
        guard: &str,
    ) -> Result<bool, CacheError>;

    /// Remove a key of any type. Returns whether something was removed.
    async fn del(&self, key: &str) -> Result<bool, CacheError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;

    /// Add or re-score a member. Returns whether the member was new.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<bool, CacheError>;

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, CacheError>;

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, CacheError>;

    /// Add `delta` to a member's score, creating it at `delta`. Returns the new score.
    async fn zincrby(&self, key: &str, member: &str, delta: f64) -> Result<f64, CacheError>;

    /// Add `delta` to a member's score the first time `token` is seen.
    /// `token` is kept for `ttl`. Returns whether the score changed.
    async fn zincrby_once(
        &self,
        key: &str,
        member: &str,
        delta: f64,
        token: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError>;

    /// Add `member` to `index` and stamp it in `touched` at `since`, unless
    /// `touched` already stamps it at or after `since`. The check and both
    /// writes are one step. Returns whether anything was written.
    async fn zadd_untouched(
        &self,
        index: &str,
        touched: &str,
        member: &str,
        score: f64,
        since: f64,
    ) -> Result<bool, CacheError>;

    /// Remove `member` from `index` and drop its stamp from `touched`, unless
    /// `touched` stamps it at or after `since`. The check and both removals
    /// are one step. Returns whether the check passed.
    async fn zrem_untouched(
        &self,
        index: &str,
        touched: &str,
        member: &str,
        since: f64,
    ) -> Result<bool, CacheError>;

    /// Move the sorted set at `from` to `to`, unless `to` already exists.
    /// Returns whether anything moved.
    async fn zrename_if_absent(&self, from: &str, to: &str) -> Result<bool, CacheError>;

    /// Members with `min <= score <= max`, lowest score first.
    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<ScoredMember>, CacheError>;

    /// At most `limit` members, highest score first.
    async fn zrevrange(&self, key: &str, limit: usize) -> Result<Vec<ScoredMember>, CacheError>;

    /// Keep only the `keep` highest-scored members. Returns how many were removed.
    async fn ztrim_lowest(&self, key: &str, keep: usize) -> Result<u64, CacheError>;

    /// Drop expired keys from backing storage. Returns how many were dropped.
    async fn purge_expired(&self) -> Result<u64, CacheError> {
        Ok(0)
    }
}
