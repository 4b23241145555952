use crate::error::QueueError;
use crate::framework::DatabaseProcessor;
use crate::stores::feed::{ChangeBatch, ChangeFeed};
use crate::utils::timeout::bounded;
use async_trait::async_trait;
use gavel_sdk::objects::{ChangeRecord, Collection};
use kanau::processor::Processor;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use std::time::Duration;
use tracing::{debug, warn};

/// `pg_notify` channel the change-log trigger signals on.
pub const CHANGE_CHANNEL: &str = "gavel_changes";

#[derive(Debug, Clone)]
pub struct GetFeedCheckpoint {
    pub consumer: String,
}

impl Processor<GetFeedCheckpoint> for DatabaseProcessor {
    type Output = i64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetFeedCheckpoint")]
    async fn process(&self, query: GetFeedCheckpoint) -> Result<i64, sqlx::Error> {
        let sequence = sqlx::query_scalar::<_, i64>(
            "SELECT sequence FROM change_feed_checkpoints WHERE consumer = $1",
        )
        .bind(&query.consumer)
        .fetch_optional(&self.pool)
        .await?;
        Ok(sequence.unwrap_or(0))
    }
}

#[derive(Debug, Clone)]
/// Move a consumer's checkpoint forward; it never moves back.
pub struct AdvanceFeedCheckpoint {
    pub consumer: String,
    pub sequence: i64,
}

impl Processor<AdvanceFeedCheckpoint> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:AdvanceFeedCheckpoint")]
    async fn process(&self, cmd: AdvanceFeedCheckpoint) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO change_feed_checkpoints (consumer, sequence)
            VALUES ($1, $2)
            ON CONFLICT (consumer) DO UPDATE
            SET sequence = GREATEST(change_feed_checkpoints.sequence, EXCLUDED.sequence),
                updated_at = now()
            "#,
        )
        .bind(&cmd.consumer)
        .bind(cmd.sequence)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChangeLogRow {
    pub sequence: i64,
    pub collection: String,
    pub partition: i32,
    pub document: serde_json::Value,
}

#[derive(Debug, Clone)]
/// Records after a checkpoint, oldest first.
///
/// Records younger than the settle window are held back so that rows from
/// transactions still committing with lower sequences are not skipped.
pub struct FetchChangeRecords {
    pub after_sequence: i64,
    pub partitions: Option<Vec<i32>>,
    pub settle_secs: f64,
    pub limit: i64,
}

impl Processor<FetchChangeRecords> for DatabaseProcessor {
    type Output = Vec<ChangeLogRow>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:FetchChangeRecords")]
    async fn process(&self, query: FetchChangeRecords) -> Result<Vec<ChangeLogRow>, sqlx::Error> {
        sqlx::query_as::<_, ChangeLogRow>(
            r#"
            SELECT sequence, collection, partition, document
            FROM change_log
            WHERE sequence > $1
              AND ($2::int4[] IS NULL OR partition = ANY($2))
              AND recorded_at <= now() - make_interval(secs => $3)
            ORDER BY sequence
            LIMIT $4
            "#,
        )
        .bind(query.after_sequence)
        .bind(query.partitions)
        .bind(query.settle_secs)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await
    }
}

fn parse_collection(name: &str) -> Option<Collection> {
    match name {
        "auctions" => Some(Collection::Auctions),
        "users" => Some(Collection::Users),
        "bids" => Some(Collection::Bids),
        "questions" => Some(Collection::Questions),
        _ => None,
    }
}

/// Settings for one [`PgChangeFeed`] subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct PgChangeFeedOptions {
    /// Checkpoint name; consumers sharing a name share progress.
    pub consumer: String,
    pub batch_size: u32,
    /// How long an idle `next_batch` waits for a notification.
    pub wait: Duration,
    pub settle: Duration,
    /// Only read these partitions; `None` reads all of them.
    pub partitions: Option<Vec<i32>>,
}

impl Default for PgChangeFeedOptions {
    fn default() -> Self {
        Self {
            consumer: "cache-sync".into(),
            batch_size: 100,
            wait: Duration::from_secs(1),
            settle: Duration::from_millis(500),
            partitions: None,
        }
    }
}

/// [`ChangeFeed`] over the trigger-fed `change_log` table.
///
/// `LISTEN` wake-ups cut latency; polling on every wait keeps the feed
/// moving when the listener connection is down.
pub struct PgChangeFeed {
    db: DatabaseProcessor,
    options: PgChangeFeedOptions,
    call_timeout: Duration,
    listener: Option<PgListener>,
    checkpoint: Option<i64>,
}

impl PgChangeFeed {
    pub fn new(pool: PgPool, options: PgChangeFeedOptions, call_timeout: Duration) -> Self {
        Self {
            db: DatabaseProcessor::new(pool),
            options,
            call_timeout,
            listener: None,
            checkpoint: None,
        }
    }

    async fn run<Q, T>(&self, query: Q) -> Result<T, QueueError>
    where
        Q: Send,
        T: Send,
        DatabaseProcessor: Processor<Q, Output = T, Error = sqlx::Error>,
    {
        bounded(self.call_timeout, async {
            Ok::<_, QueueError>(self.db.process(query).await?)
        })
        .await
    }

    async fn checkpoint(&mut self) -> Result<i64, QueueError> {
        if let Some(sequence) = self.checkpoint {
            return Ok(sequence);
        }
        let sequence = self
            .run(GetFeedCheckpoint {
                consumer: self.options.consumer.clone(),
            })
            .await?;
        self.checkpoint = Some(sequence);
        Ok(sequence)
    }

    async fn fetch(&mut self) -> Result<Option<ChangeBatch>, QueueError> {
        let after_sequence = self.checkpoint().await?;
        let rows = self
            .run(FetchChangeRecords {
                after_sequence,
                partitions: self.options.partitions.clone(),
                settle_secs: self.options.settle.as_secs_f64(),
                limit: i64::from(self.options.batch_size.max(1)),
            })
            .await?;
        if rows.is_empty() {
            return Ok(None);
        }
        let records = rows
            .into_iter()
            .filter_map(|row| match parse_collection(&row.collection) {
                Some(collection) => Some(ChangeRecord::new(
                    collection,
                    row.partition,
                    row.sequence,
                    row.document,
                )),
                None => {
                    warn!(
                        sequence = row.sequence,
                        collection = %row.collection,
                        "Dropping change record from unknown collection"
                    );
                    None
                }
            })
            .collect();
        Ok(Some(ChangeBatch::new(records)))
    }

    async fn wait_for_notification(&mut self) {
        if self.listener.is_none() {
            match connect_listener(&self.db.pool).await {
                Ok(listener) => self.listener = Some(listener),
                Err(e) => {
                    warn!(error = %e, "Change listener unavailable, polling");
                }
            }
        }
        let Some(listener) = self.listener.as_mut() else {
            tokio::time::sleep(self.options.wait).await;
            return;
        };
        match tokio::time::timeout(self.options.wait, listener.recv()).await {
            Ok(Ok(notification)) => {
                debug!(sequence = notification.payload(), "Change notification");
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Change listener failed, reconnecting on next wait");
                self.listener = None;
            }
            Err(_) => {}
        }
    }
}

async fn connect_listener(pool: &PgPool) -> Result<PgListener, sqlx::Error> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(CHANGE_CHANNEL).await?;
    Ok(listener)
}

#[async_trait]
impl ChangeFeed for PgChangeFeed {
    async fn next_batch(&mut self) -> Result<Option<ChangeBatch>, QueueError> {
        if let Some(batch) = self.fetch().await? {
            return Ok(Some(batch));
        }
        self.wait_for_notification().await;
        self.fetch().await
    }

    async fn commit(&mut self, batch: &ChangeBatch) -> Result<(), QueueError> {
        let Some(sequence) = batch.last_sequence() else {
            return Ok(());
        };
        self.run(AdvanceFeedCheckpoint {
            consumer: self.options.consumer.clone(),
            sequence,
        })
        .await?;
        self.checkpoint = Some(self.checkpoint.unwrap_or(0).max(sequence));
        Ok(())
    }
}
