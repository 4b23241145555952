use crate::error::CacheError;
use crate::framework::DatabaseProcessor;
use crate::stores::cache::{CacheStore, ScoredMember};
use crate::utils::timeout::bounded;
use async_trait::async_trait;
use kanau::processor::Processor;
use sqlx::PgPool;
use std::time::Duration;

/// Expiry offset in seconds, as bound into `now() + make_interval(...)`.
fn ttl_secs(ttl: Option<Duration>) -> Option<f64> {
    ttl.map(|ttl| ttl.as_secs_f64())
}

#[derive(Debug, Clone)]
pub struct GetCacheEntry {
    pub key: String,
}

impl Processor<GetCacheEntry> for DatabaseProcessor {
    type Output = Option<String>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetCacheEntry")]
    async fn process(&self, query: GetCacheEntry) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT value FROM cache_entries
            WHERE key = $1 AND (expires_at IS NULL OR expires_at > now())
            "#,
        )
        .bind(&query.key)
        .fetch_optional(&self.pool)
        .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Overwrite unconditionally.
    Always,
    /// Write only if no live entry exists.
    IfAbsent,
    /// Write unless the live entry carries a strictly newer version.
    IfNotNewer(i64),
}

#[derive(Debug, Clone)]
/// Upsert a key/value entry. Returns whether the row was written.
pub struct PutCacheEntry {
    pub key: String,
    pub value: String,
    pub ttl_secs: Option<f64>,
    pub mode: WriteMode,
}

impl Processor<PutCacheEntry> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:PutCacheEntry")]
    async fn process(&self, cmd: PutCacheEntry) -> Result<bool, sqlx::Error> {
        let version = match cmd.mode {
            WriteMode::IfNotNewer(version) => Some(version),
            _ => None,
        };
        let condition = match cmd.mode {
            WriteMode::Always => "",
            WriteMode::IfAbsent => {
                "WHERE cache_entries.expires_at IS NOT NULL AND cache_entries.expires_at <= now()"
            }
            WriteMode::IfNotNewer(_) => {
                "WHERE cache_entries.version IS NULL \
                 OR cache_entries.version <= EXCLUDED.version \
                 OR (cache_entries.expires_at IS NOT NULL AND cache_entries.expires_at <= now())"
            }
        };
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO cache_entries (key, value, version, expires_at)
            VALUES ($1, $2, $3, now() + make_interval(secs => $4))
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value,
                version = EXCLUDED.version,
                expires_at = EXCLUDED.expires_at
            {condition}
            "#
        ))
        .bind(&cmd.key)
        .bind(&cmd.value)
        .bind(version)
        .bind(cmd.ttl_secs)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, Clone)]
/// Remove a key from both the entry and the sorted-set tables.
pub struct DeleteCacheKey {
    pub key: String,
}

impl Processor<DeleteCacheKey> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:DeleteCacheKey")]
    async fn process(&self, cmd: DeleteCacheKey) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let entries = sqlx::query(
            "DELETE FROM cache_entries WHERE key = $1 AND (expires_at IS NULL OR expires_at > now())",
        )
        .bind(&cmd.key)
        .execute(&mut *tx)
        .await?;
        let members = sqlx::query("DELETE FROM cache_sorted_sets WHERE set_key = $1")
            .bind(&cmd.key)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(entries.rows_affected() + members.rows_affected() > 0)
    }
}

#[derive(Debug, Clone)]
pub struct ExpireCacheEntry {
    pub key: String,
    pub ttl_secs: f64,
}

impl Processor<ExpireCacheEntry> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ExpireCacheEntry")]
    async fn process(&self, cmd: ExpireCacheEntry) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE cache_entries
            SET expires_at = now() + make_interval(secs => $2)
            WHERE key = $1 AND (expires_at IS NULL OR expires_at > now())
            "#,
        )
        .bind(&cmd.key)
        .bind(cmd.ttl_secs)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, Clone)]
/// Delete every expired entry.
pub struct PurgeExpiredCacheEntries;

impl Processor<PurgeExpiredCacheEntries> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:PurgeExpiredCacheEntries")]
    async fn process(&self, _: PurgeExpiredCacheEntries) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
/// Insert or re-score a member. Returns whether the member was new.
pub struct UpsertSortedMember {
    pub set_key: String,
    pub member: String,
    pub score: f64,
}

impl Processor<UpsertSortedMember> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:UpsertSortedMember")]
    async fn process(&self, cmd: UpsertSortedMember) -> Result<bool, sqlx::Error> {
        // xmax = 0 only for a freshly inserted row.
        sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO cache_sorted_sets (set_key, member, score)
            VALUES ($1, $2, $3)
            ON CONFLICT (set_key, member) DO UPDATE SET score = EXCLUDED.score
            RETURNING (xmax = 0)
            "#,
        )
        .bind(&cmd.set_key)
        .bind(&cmd.member)
        .bind(cmd.score)
        .fetch_one(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
pub struct IncrementSortedMember {
    pub set_key: String,
    pub member: String,
    pub delta: f64,
}

impl Processor<IncrementSortedMember> for DatabaseProcessor {
    type Output = f64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:IncrementSortedMember")]
    async fn process(&self, cmd: IncrementSortedMember) -> Result<f64, sqlx::Error> {
        sqlx::query_scalar::<_, f64>(
            r#"
            INSERT INTO cache_sorted_sets (set_key, member, score)
            VALUES ($1, $2, $3)
            ON CONFLICT (set_key, member)
            DO UPDATE SET score = cache_sorted_sets.score + EXCLUDED.score
            RETURNING score
            "#,
        )
        .bind(&cmd.set_key)
        .bind(&cmd.member)
        .bind(cmd.delta)
        .fetch_one(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
pub struct RemoveSortedMember {
    pub set_key: String,
    pub member: String,
}

impl Processor<RemoveSortedMember> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:RemoveSortedMember")]
    async fn process(&self, cmd: RemoveSortedMember) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM cache_sorted_sets WHERE set_key = $1 AND member = $2")
                .bind(&cmd.set_key)
                .bind(&cmd.member)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, Clone)]
pub struct GetSortedMemberScore {
    pub set_key: String,
    pub member: String,
}

impl Processor<GetSortedMemberScore> for DatabaseProcessor {
    type Output = Option<f64>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetSortedMemberScore")]
    async fn process(&self, query: GetSortedMemberScore) -> Result<Option<f64>, sqlx::Error> {
        sqlx::query_scalar::<_, f64>(
            "SELECT score FROM cache_sorted_sets WHERE set_key = $1 AND member = $2",
        )
        .bind(&query.set_key)
        .bind(&query.member)
        .fetch_optional(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Versioned upsert that writes nothing while `guard_key` holds a live entry.
pub struct PutGuardedCacheEntry {
    pub key: String,
    pub value: String,
    pub version: i64,
    pub ttl_secs: Option<f64>,
    pub guard_key: String,
}

impl Processor<PutGuardedCacheEntry> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:PutGuardedCacheEntry")]
    async fn process(&self, cmd: PutGuardedCacheEntry) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO cache_entries (key, value, version, expires_at)
            SELECT $1, $2, $3, now() + make_interval(secs => $4)
            WHERE NOT EXISTS (
                SELECT 1 FROM cache_entries
                WHERE key = $5 AND (expires_at IS NULL OR expires_at > now())
            )
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value,
                version = EXCLUDED.version,
                expires_at = EXCLUDED.expires_at
            WHERE cache_entries.version IS NULL
               OR cache_entries.version <= EXCLUDED.version
               OR (cache_entries.expires_at IS NOT NULL AND cache_entries.expires_at <= now())
            "#,
        )
        .bind(&cmd.key)
        .bind(&cmd.value)
        .bind(cmd.version)
        .bind(cmd.ttl_secs)
        .bind(&cmd.guard_key)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, Clone)]
/// Increment a member once per `token_key`. Returns whether it was counted.
pub struct IncrementSortedMemberOnce {
    pub set_key: String,
    pub member: String,
    pub delta: f64,
    pub token_key: String,
    pub token_ttl_secs: Option<f64>,
}

impl Processor<IncrementSortedMemberOnce> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:IncrementSortedMemberOnce")]
    async fn process(&self, cmd: IncrementSortedMemberOnce) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let claimed = sqlx::query(
            r#"
            INSERT INTO cache_entries (key, value, version, expires_at)
            VALUES ($1, '', NULL, now() + make_interval(secs => $2))
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value, version = NULL, expires_at = EXCLUDED.expires_at
            WHERE cache_entries.expires_at IS NOT NULL AND cache_entries.expires_at <= now()
            "#,
        )
        .bind(&cmd.token_key)
        .bind(cmd.token_ttl_secs)
        .execute(&mut *tx)
        .await?;
        if claimed.rows_affected() == 0 {
            tx.commit().await?;
            return Ok(false);
        }
        sqlx::query(
            r#"
            INSERT INTO cache_sorted_sets (set_key, member, score)
            VALUES ($1, $2, $3)
            ON CONFLICT (set_key, member)
            DO UPDATE SET score = cache_sorted_sets.score + EXCLUDED.score
            "#,
        )
        .bind(&cmd.set_key)
        .bind(&cmd.member)
        .bind(cmd.delta)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(true)
    }
}

#[derive(Debug, Clone)]
/// Add (`score` is `Some`) or remove an index member unless its stamp in
/// `touched_key` is at or after `since`.
pub struct WriteUntouchedMember {
    pub index_key: String,
    pub touched_key: String,
    pub member: String,
    pub score: Option<f64>,
    pub since: f64,
}

impl Processor<WriteUntouchedMember> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:WriteUntouchedMember")]
    async fn process(&self, cmd: WriteUntouchedMember) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        // Row locks make a concurrent stamp or index write wait for this
        // transaction instead of interleaving with it.
        let stamp = sqlx::query_scalar::<_, f64>(
            r#"
            SELECT score FROM cache_sorted_sets
            WHERE set_key = $1 AND member = $2
            FOR UPDATE
            "#,
        )
        .bind(&cmd.touched_key)
        .bind(&cmd.member)
        .fetch_optional(&mut *tx)
        .await?;
        if stamp.is_some_and(|stamp| stamp >= cmd.since) {
            tx.commit().await?;
            return Ok(false);
        }
        sqlx::query("SELECT 1 FROM cache_sorted_sets WHERE set_key = $1 AND member = $2 FOR UPDATE")
            .bind(&cmd.index_key)
            .bind(&cmd.member)
            .execute(&mut *tx)
            .await?;

        let Some(score) = cmd.score else {
            sqlx::query("DELETE FROM cache_sorted_sets WHERE set_key = $1 AND member = $2")
                .bind(&cmd.index_key)
                .bind(&cmd.member)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "DELETE FROM cache_sorted_sets WHERE set_key = $1 AND member = $2 AND score < $3",
            )
            .bind(&cmd.touched_key)
            .bind(&cmd.member)
            .bind(cmd.since)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            return Ok(true);
        };

        let stamped = if stamp.is_some() {
            sqlx::query(
                "UPDATE cache_sorted_sets SET score = $3 WHERE set_key = $1 AND member = $2",
            )
            .bind(&cmd.touched_key)
            .bind(&cmd.member)
            .bind(cmd.since)
            .execute(&mut *tx)
            .await?
        } else {
            // A stamp inserted since the check above wins.
            sqlx::query(
                r#"
                INSERT INTO cache_sorted_sets (set_key, member, score)
                VALUES ($1, $2, $3)
                ON CONFLICT (set_key, member) DO NOTHING
                "#,
            )
            .bind(&cmd.touched_key)
            .bind(&cmd.member)
            .bind(cmd.since)
            .execute(&mut *tx)
            .await?
        };
        if stamped.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        sqlx::query(
            r#"
            INSERT INTO cache_sorted_sets (set_key, member, score)
            VALUES ($1, $2, $3)
            ON CONFLICT (set_key, member) DO UPDATE SET score = EXCLUDED.score
            "#,
        )
        .bind(&cmd.index_key)
        .bind(&cmd.member)
        .bind(score)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(true)
    }
}

#[derive(Debug, Clone)]
/// Move every member of `from` under `to`, unless `to` already has members.
pub struct RenameSortedSet {
    pub from: String,
    pub to: String,
}

impl Processor<RenameSortedSet> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:RenameSortedSet")]
    async fn process(&self, cmd: RenameSortedSet) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let occupied = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM cache_sorted_sets WHERE set_key = $1)",
        )
        .bind(&cmd.to)
        .fetch_one(&mut *tx)
        .await?;
        if occupied {
            tx.commit().await?;
            return Ok(false);
        }
        let moved = sqlx::query("UPDATE cache_sorted_sets SET set_key = $2 WHERE set_key = $1")
            .bind(&cmd.from)
            .bind(&cmd.to)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(moved.rows_affected() > 0)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct SortedMemberRow {
    member: String,
    score: f64,
}

impl From<SortedMemberRow> for ScoredMember {
    fn from(row: SortedMemberRow) -> Self {
        ScoredMember::new(row.member, row.score)
    }
}

#[derive(Debug, Clone)]
/// Members with a score in `[min, max]`, lowest first.
pub struct ListSortedMembersByScore {
    pub set_key: String,
    pub min: f64,
    pub max: f64,
}

impl Processor<ListSortedMembersByScore> for DatabaseProcessor {
    type Output = Vec<ScoredMember>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListSortedMembersByScore")]
    async fn process(
        &self,
        query: ListSortedMembersByScore,
    ) -> Result<Vec<ScoredMember>, sqlx::Error> {
        let rows = sqlx::query_as::<_, SortedMemberRow>(
            r#"
            SELECT member, score FROM cache_sorted_sets
            WHERE set_key = $1 AND score >= $2 AND score <= $3
            ORDER BY score, member
            "#,
        )
        .bind(&query.set_key)
        .bind(query.min)
        .bind(query.max)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ScoredMember::from).collect())
    }
}

#[derive(Debug, Clone)]
/// The highest-scored members, highest first.
pub struct ListTopSortedMembers {
    pub set_key: String,
    pub limit: i64,
}

impl Processor<ListTopSortedMembers> for DatabaseProcessor {
    type Output = Vec<ScoredMember>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListTopSortedMembers")]
    async fn process(&self, query: ListTopSortedMembers) -> Result<Vec<ScoredMember>, sqlx::Error> {
        let rows = sqlx::query_as::<_, SortedMemberRow>(
            r#"
            SELECT member, score FROM cache_sorted_sets
            WHERE set_key = $1
            ORDER BY score DESC, member DESC
            LIMIT $2
            "#,
        )
        .bind(&query.set_key)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ScoredMember::from).collect())
    }
}

#[derive(Debug, Clone)]
/// Keep only the `keep` highest-scored members of a set.
pub struct TrimSortedSet {
    pub set_key: String,
    pub keep: i64,
}

impl Processor<TrimSortedSet> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:TrimSortedSet")]
    async fn process(&self, cmd: TrimSortedSet) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM cache_sorted_sets
            WHERE set_key = $1
              AND member NOT IN (
                  SELECT member FROM cache_sorted_sets
                  WHERE set_key = $1
                  ORDER BY score DESC, member DESC
                  LIMIT $2
              )
            "#,
        )
        .bind(&cmd.set_key)
        .bind(cmd.keep)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

/// [`CacheStore`] over the unlogged `cache_entries` and `cache_sorted_sets`
/// tables, for deployments where several workers share one cache.
///
/// Sorted sets never expire; `expire` only applies to key/value entries.
#[derive(Debug, Clone)]
pub struct PgCacheStore {
    db: DatabaseProcessor,
    call_timeout: Duration,
}

impl PgCacheStore {
    pub fn new(pool: PgPool, call_timeout: Duration) -> Self {
        Self {
            db: DatabaseProcessor::new(pool),
            call_timeout,
        }
    }

    async fn run<Q, T>(&self, query: Q) -> Result<T, CacheError>
    where
        Q: Send,
        T: Send,
        DatabaseProcessor: Processor<Q, Output = T, Error = sqlx::Error>,
    {
        bounded(self.call_timeout, async {
            Ok::<_, CacheError>(self.db.process(query).await?)
        })
        .await
    }
}

#[async_trait]
impl CacheStore for PgCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.run(GetCacheEntry { key: key.into() }).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.run(PutCacheEntry {
            key: key.into(),
            value: value.into(),
            ttl_secs: ttl_secs(ttl),
            mode: WriteMode::Always,
        })
        .await
        .map(|_| ())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        self.run(PutCacheEntry {
            key: key.into(),
            value: value.into(),
            ttl_secs: ttl_secs(ttl),
            mode: WriteMode::IfAbsent,
        })
        .await
    }

    async fn put_versioned(
        &self,
        key: &str,
        value: &str,
        version: i64,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        self.run(PutCacheEntry {
            key: key.into(),
            value: value.into(),
            ttl_secs: ttl_secs(ttl),
            mode: WriteMode::IfNotNewer(version),
        })
        .await
    }

    async fn put_versioned_unless(
        &self,
        key: &str,
        value: &str,
        version: i64,
        ttl: Option<Duration>,
        guard: &str,
    ) -> Result<bool, CacheError> {
        self.run(PutGuardedCacheEntry {
            key: key.into(),
            value: value.into(),
            version,
            ttl_secs: ttl_secs(ttl),
            guard_key: guard.into(),
        })
        .await
    }

    async fn del(&self, key: &str) -> Result<bool, CacheError> {
        self.run(DeleteCacheKey { key: key.into() }).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.run(ExpireCacheEntry {
            key: key.into(),
            ttl_secs: ttl.as_secs_f64(),
        })
        .await
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<bool, CacheError> {
        self.run(UpsertSortedMember {
            set_key: key.into(),
            member: member.into(),
            score,
        })
        .await
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        self.run(RemoveSortedMember {
            set_key: key.into(),
            member: member.into(),
        })
        .await
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, CacheError> {
        self.run(GetSortedMemberScore {
            set_key: key.into(),
            member: member.into(),
        })
        .await
    }

    async fn zincrby(&self, key: &str, member: &str, delta: f64) -> Result<f64, CacheError> {
        self.run(IncrementSortedMember {
            set_key: key.into(),
            member: member.into(),
            delta,
        })
        .await
    }

    async fn zincrby_once(
        &self,
        key: &str,
        member: &str,
        delta: f64,
        token: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        self.run(IncrementSortedMemberOnce {
            set_key: key.into(),
            member: member.into(),
            delta,
            token_key: token.into(),
            token_ttl_secs: ttl_secs(ttl),
        })
        .await
    }

    async fn zadd_untouched(
        &self,
        index: &str,
        touched: &str,
        member: &str,
        score: f64,
        since: f64,
    ) -> Result<bool, CacheError> {
        self.run(WriteUntouchedMember {
            index_key: index.into(),
            touched_key: touched.into(),
            member: member.into(),
            score: Some(score),
            since,
        })
        .await
    }

    async fn zrem_untouched(
        &self,
        index: &str,
        touched: &str,
        member: &str,
        since: f64,
    ) -> Result<bool, CacheError> {
        self.run(WriteUntouchedMember {
            index_key: index.into(),
            touched_key: touched.into(),
            member: member.into(),
            score: None,
            since,
        })
        .await
    }

    async fn zrename_if_absent(&self, from: &str, to: &str) -> Result<bool, CacheError> {
        self.run(RenameSortedSet {
            from: from.into(),
            to: to.into(),
        })
        .await
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<ScoredMember>, CacheError> {
        self.run(ListSortedMembersByScore {
            set_key: key.into(),
            min,
            max,
        })
        .await
    }

    async fn zrevrange(&self, key: &str, limit: usize) -> Result<Vec<ScoredMember>, CacheError> {
        self.run(ListTopSortedMembers {
            set_key: key.into(),
            limit: i64::try_from(limit).unwrap_or(i64::MAX),
        })
        .await
    }

    async fn ztrim_lowest(&self, key: &str, keep: usize) -> Result<u64, CacheError> {
        self.run(TrimSortedSet {
            set_key: key.into(),
            keep: i64::try_from(keep).unwrap_or(i64::MAX),
        })
        .await
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        self.run(PurgeExpiredCacheEntries).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn test_store_calls_are_send() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/gavel")
            .unwrap();
        let store = PgCacheStore::new(pool, Duration::from_secs(1));
        let get = store.run(GetCacheEntry { key: "k".into() });
        assert_send(&get);
        let rename = store.run(RenameSortedSet {
            from: "a".into(),
            to: "b".into(),
        });
        assert_send(&rename);
    }

    #[test]
    fn test_ttl_conversion() {
        assert_eq!(ttl_secs(None), None);
        assert_eq!(ttl_secs(Some(Duration::from_millis(1500))), Some(1.5));
    }
}
