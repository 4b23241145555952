use compact_str::CompactString;
use smallvec::SmallVec;
use std::time::Duration;

/// One cache mutation. Every variant is idempotent on its own.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheOp {
    /// Write a snapshot unless a strictly newer version is cached.
    PutVersioned {
        key: String,
        value: String,
        version: i64,
        ttl: Option<Duration>,
    },
    /// [`CacheOp::PutVersioned`] that yields while `guard` is live.
    PutVersionedUnless {
        key: String,
        value: String,
        version: i64,
        ttl: Option<Duration>,
        guard: String,
    },
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    SetIfAbsent {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Delete {
        key: String,
    },
    IndexAdd {
        index: &'static str,
        member: CompactString,
        score: f64,
    },
    IndexRemove {
        index: &'static str,
        member: CompactString,
    },
    /// Count towards a member once per `token`.
    IndexIncrementOnce {
        index: &'static str,
        member: CompactString,
        delta: f64,
        token: String,
        ttl: Option<Duration>,
    },
    /// Add a member unless `touched` stamps it at or after `since`.
    IndexAddUntouched {
        index: &'static str,
        touched: &'static str,
        member: CompactString,
        score: f64,
        since: f64,
    },
    /// Remove a member unless `touched` stamps it at or after `since`.
    IndexRemoveUntouched {
        index: &'static str,
        touched: &'static str,
        member: CompactString,
        since: f64,
    },
    /// Keep only the `keep` highest-scored members.
    IndexTrim {
        index: &'static str,
        keep: usize,
    },
}

impl CacheOp {
    /// The key this operation writes.
    pub fn key(&self) -> &str {
        match self {
            CacheOp::PutVersioned { key, .. }
            | CacheOp::PutVersionedUnless { key, .. }
            | CacheOp::Set { key, .. }
            | CacheOp::SetIfAbsent { key, .. }
            | CacheOp::Delete { key } => key,
            CacheOp::IndexAdd { index, .. }
            | CacheOp::IndexRemove { index, .. }
            | CacheOp::IndexIncrementOnce { index, .. }
            | CacheOp::IndexAddUntouched { index, .. }
            | CacheOp::IndexRemoveUntouched { index, .. }
            | CacheOp::IndexTrim { index, .. } => index,
        }
    }

    /// Short label used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            CacheOp::PutVersioned { .. } => "put_versioned",
            CacheOp::PutVersionedUnless { .. } => "put_versioned_unless",
            CacheOp::Set { .. } => "set",
            CacheOp::SetIfAbsent { .. } => "set_if_absent",
            CacheOp::Delete { .. } => "del",
            CacheOp::IndexAdd { .. } => "zadd",
            CacheOp::IndexRemove { .. } => "zrem",
            CacheOp::IndexIncrementOnce { .. } => "zincrby_once",
            CacheOp::IndexAddUntouched { .. } => "zadd_untouched",
            CacheOp::IndexRemoveUntouched { .. } => "zrem_untouched",
            CacheOp::IndexTrim { .. } => "ztrim",
        }
    }
}

/// Ordered cache mutations for one event. Most events need five or fewer.
pub type InvalidationPlan = SmallVec<[CacheOp; 5]>;
