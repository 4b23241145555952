use crate::error::CacheError;
use crate::stores::cache::{CacheStore, ScoredMember};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Value {
    Text { value: String, version: Option<i64> },
    Sorted(HashMap<String, f64>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    /// Calls left before the store starts failing; `None` means never.
    calls_until_failure: Option<usize>,
}

impl State {
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let now = Instant::now();
        if self.entries.get(key).is_some_and(|e| !e.is_live(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn sorted(&mut self, key: &str) -> Result<Option<&mut HashMap<String, f64>>, CacheError> {
        match self.live(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Sorted(set),
                ..
            }) => Ok(Some(set)),
            Some(_) => Err(wrong_type(key, "sorted set")),
        }
    }

    fn sorted_or_create(&mut self, key: &str) -> Result<&mut HashMap<String, f64>, CacheError> {
        if self.live(key).is_none() {
            self.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Sorted(HashMap::new()),
                    expires_at: None,
                },
            );
        }
        self.sorted(key)?
            .ok_or_else(|| CacheError::Unavailable(format!("sorted set {key} vanished")))
    }

    fn drop_if_empty(&mut self, key: &str) {
        let empty = matches!(
            self.entries.get(key),
            Some(Entry { value: Value::Sorted(set), .. }) if set.is_empty()
        );
        if empty {
            self.entries.remove(key);
        }
    }

    fn write_versioned(
        &mut self,
        key: &str,
        value: &str,
        version: i64,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        match self.live(key) {
            Some(Entry {
                value: Value::Text {
                    version: Some(current),
                    ..
                },
                ..
            }) if *current > version => return Ok(false),
            Some(Entry {
                value: Value::Sorted(_),
                ..
            }) => return Err(wrong_type(key, "string")),
            _ => {}
        }
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text {
                    value: value.to_string(),
                    version: Some(version),
                },
                expires_at: deadline(ttl),
            },
        );
        Ok(true)
    }

    fn touched_since(&mut self, touched: &str, member: &str, since: f64) -> Result<bool, CacheError> {
        Ok(self
            .sorted(touched)?
            .and_then(|set| set.get(member).copied())
            .is_some_and(|stamp| stamp >= since))
    }

    fn remove_member(&mut self, key: &str, member: &str) -> Result<bool, CacheError> {
        let removed = match self.sorted(key)? {
            Some(set) => set.remove(member).is_some(),
            None => false,
        };
        self.drop_if_empty(key);
        Ok(removed)
    }

    fn sorted_members(&mut self, key: &str) -> Result<Vec<ScoredMember>, CacheError> {
        let mut members: Vec<ScoredMember> = match self.sorted(key)? {
            Some(set) => set
                .iter()
                .map(|(member, score)| ScoredMember::new(member.clone(), *score))
                .collect(),
            None => Vec::new(),
        };
        members.sort_by(by_score_then_member);
        Ok(members)
    }
}

fn wrong_type(key: &str, expected: &str) -> CacheError {
    CacheError::InvalidValue {
        key: key.to_string(),
        reason: format!("key does not hold a {expected}"),
    }
}

fn by_score_then_member(a: &ScoredMember, b: &ScoredMember) -> Ordering {
    a.score
        .total_cmp(&b.score)
        .then_with(|| a.member.cmp(&b.member))
}

fn deadline(ttl: Option<Duration>) -> Option<Instant> {
    ttl.map(|ttl| Instant::now() + ttl)
}

/// A [`CacheStore`] held in process memory.
///
/// Expiry follows the tokio clock, so tests running with a paused clock can
/// move past a TTL with `tokio::time::advance`.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    state: Mutex<State>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with [`CacheError::Unavailable`] until reset.
    pub async fn set_available(&self, available: bool) {
        self.state.lock().await.calls_until_failure = if available { None } else { Some(0) };
    }

    /// Let `calls` more calls succeed, then fail every call after them.
    pub async fn fail_after(&self, calls: usize) {
        self.state.lock().await.calls_until_failure = Some(calls);
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.state
            .lock()
            .await
            .entries
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn state(&self) -> Result<MutexGuard<'_, State>, CacheError> {
        let mut state = self.state.lock().await;
        if let Some(left) = state.calls_until_failure.as_mut() {
            if *left == 0 {
                return Err(CacheError::Unavailable("cache offline".into()));
            }
            *left -= 1;
        }
        Ok(state)
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut state = self.state().await?;
        match state.live(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Text { value, .. },
                ..
            }) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type(key, "string")),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut state = self.state().await?;
        state.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text {
                    value: value.to_string(),
                    version: None,
                },
                expires_at: deadline(ttl),
            },
        );
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let mut state = self.state().await?;
        if state.live(key).is_some() {
            return Ok(false);
        }
        state.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text {
                    value: value.to_string(),
                    version: None,
                },
                expires_at: deadline(ttl),
            },
        );
        Ok(true)
    }

    async fn put_versioned(
        &self,
        key: &str,
        value: &str,
        version: i64,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let mut state = self.state().await?;
        state.write_versioned(key, value, version, ttl)
    }

    async fn put_versioned_unless(
        &self,
        key: &str,
        value: &str,
        version: i64,
        ttl: Option<Duration>,
        guard: &str,
    ) -> Result<bool, CacheError> {
        let mut state = self.state().await?;
        if state.live(guard).is_some() {
            return Ok(false);
        }
        state.write_versioned(key, value, version, ttl)
    }

    async fn del(&self, key: &str) -> Result<bool, CacheError> {
        let mut state = self.state().await?;
        let existed = state.live(key).is_some();
        state.entries.remove(key);
        Ok(existed)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut state = self.state().await?;
        match state.live(key) {
            Some(entry) => {
                entry.expires_at = deadline(Some(ttl));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<bool, CacheError> {
        let mut state = self.state().await?;
        let set = state.sorted_or_create(key)?;
        Ok(set.insert(member.to_string(), score).is_none())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        let mut state = self.state().await?;
        state.remove_member(key, member)
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, CacheError> {
        let mut state = self.state().await?;
        Ok(state
            .sorted(key)?
            .and_then(|set| set.get(member).copied()))
    }

    async fn zincrby(&self, key: &str, member: &str, delta: f64) -> Result<f64, CacheError> {
        let mut state = self.state().await?;
        let set = state.sorted_or_create(key)?;
        let score = set.entry(member.to_string()).or_insert(0.0);
        *score += delta;
        Ok(*score)
    }

    async fn zincrby_once(
        &self,
        key: &str,
        member: &str,
        delta: f64,
        token: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let mut state = self.state().await?;
        if state.live(token).is_some() {
            return Ok(false);
        }
        *state
            .sorted_or_create(key)?
            .entry(member.to_string())
            .or_insert(0.0) += delta;
        state.entries.insert(
            token.to_string(),
            Entry {
                value: Value::Text {
                    value: String::new(),
                    version: None,
                },
                expires_at: deadline(ttl),
            },
        );
        Ok(true)
    }

    async fn zadd_untouched(
        &self,
        index: &str,
        touched: &str,
        member: &str,
        score: f64,
        since: f64,
    ) -> Result<bool, CacheError> {
        let mut state = self.state().await?;
        if state.touched_since(touched, member, since)? {
            return Ok(false);
        }
        state
            .sorted_or_create(touched)?
            .insert(member.to_string(), since);
        state
            .sorted_or_create(index)?
            .insert(member.to_string(), score);
        Ok(true)
    }

    async fn zrem_untouched(
        &self,
        index: &str,
        touched: &str,
        member: &str,
        since: f64,
    ) -> Result<bool, CacheError> {
        let mut state = self.state().await?;
        if state.touched_since(touched, member, since)? {
            return Ok(false);
        }
        state.remove_member(index, member)?;
        state.remove_member(touched, member)?;
        Ok(true)
    }

    async fn zrename_if_absent(&self, from: &str, to: &str) -> Result<bool, CacheError> {
        let mut state = self.state().await?;
        if state.live(to).is_some() {
            return Ok(false);
        }
        if state.sorted(from)?.is_none() {
            return Ok(false);
        }
        match state.entries.remove(from) {
            Some(entry) => {
                state.entries.insert(to.to_string(), entry);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<ScoredMember>, CacheError> {
        let mut state = self.state().await?;
        let members = state.sorted_members(key)?;
        Ok(members
            .into_iter()
            .filter(|m| m.score >= min && m.score <= max)
            .collect())
    }

    async fn zrevrange(&self, key: &str, limit: usize) -> Result<Vec<ScoredMember>, CacheError> {
        let mut state = self.state().await?;
        let mut members = state.sorted_members(key)?;
        members.reverse();
        members.truncate(limit);
        Ok(members)
    }

    async fn ztrim_lowest(&self, key: &str, keep: usize) -> Result<u64, CacheError> {
        let mut state = self.state().await?;
        let members = state.sorted_members(key)?;
        let excess = members.len().saturating_sub(keep);
        if excess == 0 {
            return Ok(0);
        }
        if let Some(set) = state.sorted(key)? {
            for m in &members[..excess] {
                set.remove(&m.member);
            }
        }
        state.drop_if_empty(key);
        Ok(excess as u64)
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        let mut state = self.state().await?;
        let now = Instant::now();
        let before = state.entries.len();
        state.entries.retain(|_, e| e.is_live(now));
        Ok((before - state.entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_versioned_keeps_newer_value() {
        let cache = MemoryCacheStore::new();
        assert!(cache.put_versioned("auction:a", "v5", 5, None).await.unwrap());
        assert!(!cache.put_versioned("auction:a", "v4", 4, None).await.unwrap());
        assert_eq!(cache.get("auction:a").await.unwrap().as_deref(), Some("v5"));
        // Equal version rewrites so a redelivered notification stays idempotent.
        assert!(cache.put_versioned("auction:a", "v5'", 5, None).await.unwrap());
        assert!(cache.put_versioned("auction:a", "v6", 6, None).await.unwrap());
        assert_eq!(cache.get("auction:a").await.unwrap().as_deref(), Some("v6"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_keys_read_as_absent() {
        let cache = MemoryCacheStore::new();
        cache
            .set("user:u", "x", Some(Duration::from_secs(10)))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get("user:u").await.unwrap(), None);
        assert!(cache.set_if_absent("user:u", "y", None).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired_counts_dropped_keys() {
        let cache = MemoryCacheStore::new();
        cache.set("a", "1", Some(Duration::from_secs(1))).await.unwrap();
        cache.set("b", "2", None).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_sorted_set_ordering_and_trim() {
        let cache = MemoryCacheStore::new();
        for (member, score) in [("a", 3.0), ("b", 1.0), ("c", 2.0), ("d", 4.0)] {
            cache.zadd("recent", member, score).await.unwrap();
        }
        let top = cache.zrevrange("recent", 2).await.unwrap();
        assert_eq!(
            top,
            vec![ScoredMember::new("d", 4.0), ScoredMember::new("a", 3.0)]
        );
        assert_eq!(cache.ztrim_lowest("recent", 2).await.unwrap(), 2);
        let left = cache
            .zrange_by_score("recent", f64::NEG_INFINITY, f64::INFINITY)
            .await
            .unwrap();
        assert_eq!(
            left,
            vec![ScoredMember::new("a", 3.0), ScoredMember::new("d", 4.0)]
        );
    }

    #[tokio::test]
    async fn test_zincrby_creates_and_accumulates() {
        let cache = MemoryCacheStore::new();
        assert_eq!(cache.zincrby("rank", "a", 1.0).await.unwrap(), 1.0);
        assert_eq!(cache.zincrby("rank", "a", 1.0).await.unwrap(), 2.0);
        assert_eq!(cache.zscore("rank", "a").await.unwrap(), Some(2.0));
    }

    #[tokio::test]
    async fn test_last_zrem_drops_the_key() {
        let cache = MemoryCacheStore::new();
        cache.zadd("s", "a", 1.0).await.unwrap();
        assert!(cache.zrem("s", "a").await.unwrap());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_guarded_put_yields_to_live_guard() {
        let cache = MemoryCacheStore::new();
        assert!(cache
            .put_versioned_unless("user:u", "v1", 1, None, "user-deleted:u")
            .await
            .unwrap());
        cache.set("user-deleted:u", "{}", None).await.unwrap();
        cache.del("user:u").await.unwrap();
        assert!(!cache
            .put_versioned_unless("user:u", "v2", 2, None, "user-deleted:u")
            .await
            .unwrap());
        assert_eq!(cache.get("user:u").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zincrby_once_counts_each_token_once() {
        let cache = MemoryCacheStore::new();
        let ttl = Some(Duration::from_secs(60));
        assert!(cache.zincrby_once("rank", "a", 1.0, "bid:1", ttl).await.unwrap());
        assert!(!cache.zincrby_once("rank", "a", 1.0, "bid:1", ttl).await.unwrap());
        assert!(cache.zincrby_once("rank", "a", 1.0, "bid:2", ttl).await.unwrap());
        assert_eq!(cache.zscore("rank", "a").await.unwrap(), Some(2.0));
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.zincrby_once("rank", "a", 1.0, "bid:1", ttl).await.unwrap());
        assert_eq!(cache.zscore("rank", "a").await.unwrap(), Some(3.0));
    }

    #[tokio::test]
    async fn test_untouched_writes_respect_fresh_stamps() {
        let cache = MemoryCacheStore::new();
        cache.zadd("touched", "fresh", 200.0).await.unwrap();
        cache.zadd("touched", "old", 50.0).await.unwrap();
        cache.zadd("index", "old", 1.0).await.unwrap();

        assert!(!cache.zadd_untouched("index", "touched", "fresh", 9.0, 100.0).await.unwrap());
        assert_eq!(cache.zscore("index", "fresh").await.unwrap(), None);
        assert_eq!(cache.zscore("touched", "fresh").await.unwrap(), Some(200.0));

        assert!(cache.zadd_untouched("index", "touched", "new", 9.0, 100.0).await.unwrap());
        assert_eq!(cache.zscore("index", "new").await.unwrap(), Some(9.0));
        assert_eq!(cache.zscore("touched", "new").await.unwrap(), Some(100.0));

        assert!(cache.zrem_untouched("index", "touched", "old", 100.0).await.unwrap());
        assert_eq!(cache.zscore("index", "old").await.unwrap(), None);
        assert_eq!(cache.zscore("touched", "old").await.unwrap(), None);

        cache.zadd("index", "fresh", 5.0).await.unwrap();
        assert!(!cache.zrem_untouched("index", "touched", "fresh", 100.0).await.unwrap());
        assert_eq!(cache.zscore("index", "fresh").await.unwrap(), Some(5.0));
    }

    #[tokio::test]
    async fn test_rename_keeps_an_unfinished_target() {
        let cache = MemoryCacheStore::new();
        cache.zadd("live", "a", 1.0).await.unwrap();
        assert!(cache.zrename_if_absent("live", "closing").await.unwrap());
        assert_eq!(cache.zscore("closing", "a").await.unwrap(), Some(1.0));
        assert!(cache.zrevrange("live", 10).await.unwrap().is_empty());

        cache.zadd("live", "b", 1.0).await.unwrap();
        assert!(!cache.zrename_if_absent("live", "closing").await.unwrap());
        assert_eq!(cache.zscore("live", "b").await.unwrap(), Some(1.0));
        assert!(!cache.zrename_if_absent("missing", "other").await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_type_is_rejected() {
        let cache = MemoryCacheStore::new();
        cache.set("k", "v", None).await.unwrap();
        assert!(matches!(
            cache.zadd("k", "m", 1.0).await,
            Err(CacheError::InvalidValue { .. })
        ));
    }

    #[tokio::test]
    async fn test_fail_after_budget() {
        let cache = MemoryCacheStore::new();
        cache.fail_after(1).await;
        cache.set("a", "1", None).await.unwrap();
        assert!(matches!(
            cache.set("b", "2", None).await,
            Err(CacheError::Unavailable(_))
        ));
        cache.set_available(true).await;
        assert_eq!(cache.get("a").await.unwrap().as_deref(), Some("1"));
    }
}
