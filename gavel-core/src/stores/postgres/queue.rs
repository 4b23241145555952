use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::framework::DatabaseProcessor;
use crate::stores::queue::{CommandQueue, Delivery};
use crate::utils::timeout::bounded;
use async_trait::async_trait;
use bytes::Bytes;
use gavel_sdk::objects::CommandMessage;
use kanau::processor::Processor;
use sqlx::PgPool;
use std::time::Duration;
use tracing::warn;

/// How often an idle receive re-polls the queue table.
const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct EnqueueCommand {
    pub body: Vec<u8>,
}

impl Processor<EnqueueCommand> for DatabaseProcessor {
    type Output = i64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:EnqueueCommand")]
    async fn process(&self, cmd: EnqueueCommand) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("INSERT INTO command_queue (body) VALUES ($1) RETURNING id")
            .bind(cmd.body)
            .fetch_one(&self.pool)
            .await
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClaimedCommand {
    pub id: i64,
    pub body: Vec<u8>,
    pub delivery_count: i32,
}

#[derive(Debug, Clone)]
/// Claim the oldest visible message, hiding it for the visibility timeout
/// and counting the delivery.
pub struct ClaimNextCommand {
    pub visibility_timeout_secs: f64,
}

impl Processor<ClaimNextCommand> for DatabaseProcessor {
    type Output = Option<ClaimedCommand>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ClaimNextCommand")]
    async fn process(&self, cmd: ClaimNextCommand) -> Result<Option<ClaimedCommand>, sqlx::Error> {
        sqlx::query_as::<_, ClaimedCommand>(
            r#"
            UPDATE command_queue
            SET delivery_count = delivery_count + 1,
                visible_at = now() + make_interval(secs => $1)
            WHERE id = (
                SELECT id FROM command_queue
                WHERE visible_at <= now()
                ORDER BY visible_at, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, body, delivery_count
            "#,
        )
        .bind(cmd.visibility_timeout_secs)
        .fetch_optional(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
pub struct DeleteCommand {
    pub id: i64,
}

impl Processor<DeleteCommand> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:DeleteCommand")]
    async fn process(&self, cmd: DeleteCommand) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM command_queue WHERE id = $1")
            .bind(cmd.id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, Clone)]
/// Make a claimed message visible again right away.
pub struct ReleaseCommand {
    pub id: i64,
}

impl Processor<ReleaseCommand> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ReleaseCommand")]
    async fn process(&self, cmd: ReleaseCommand) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE command_queue SET visible_at = now() WHERE id = $1")
            .bind(cmd.id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, Clone)]
/// Move a message to the dead-letter table.
pub struct DeadLetterCommand {
    pub id: i64,
    pub reason: String,
}

impl Processor<DeadLetterCommand> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:DeadLetterCommand")]
    async fn process(&self, cmd: DeadLetterCommand) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            WITH moved AS (
                DELETE FROM command_queue WHERE id = $1
                RETURNING id, body, delivery_count, enqueued_at
            )
            INSERT INTO command_dead_letters (id, body, delivery_count, reason, enqueued_at)
            SELECT id, body, delivery_count, $2, enqueued_at FROM moved
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(cmd.id)
        .bind(&cmd.reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// [`CommandQueue`] over the `command_queue` table.
///
/// A claim hides a message for the visibility timeout; if the claimer dies
/// the message becomes visible again on its own. A message claimed more
/// than `max_deliveries` times is moved to `command_dead_letters`.
#[derive(Debug, Clone)]
pub struct PgCommandQueue {
    db: DatabaseProcessor,
    config: QueueConfig,
    call_timeout: Duration,
}

impl PgCommandQueue {
    pub fn new(pool: PgPool, config: QueueConfig, call_timeout: Duration) -> Self {
        Self {
            db: DatabaseProcessor::new(pool),
            config,
            call_timeout,
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

    async fn claim(&self) -> Result<Option<Delivery>, QueueError> {
        loop {
            let Some(claimed) = self
                .run(ClaimNextCommand {
                    visibility_timeout_secs: self.config.visibility_timeout.as_secs_f64(),
                })
                .await?
            else {
                return Ok(None);
            };
            let delivery_count = u32::try_from(claimed.delivery_count).unwrap_or(u32::MAX);
            if delivery_count > self.config.max_deliveries {
                warn!(
                    delivery_id = claimed.id,
                    deliveries = delivery_count - 1,
                    "Message exceeded max deliveries, dead-lettering"
                );
                self.run(DeadLetterCommand {
                    id: claimed.id,
                    reason: "max deliveries exceeded".into(),
                })
                .await?;
                continue;
            }
            return Ok(Some(Delivery {
                delivery_id: claimed.id,
                body: Bytes::from(claimed.body),
                delivery_count,
            }));
        }
    }
}

#[async_trait]
impl CommandQueue for PgCommandQueue {
    async fn publish(&self, message: &CommandMessage) -> Result<(), QueueError> {
        let body = message.to_bytes()?;
        self.run(EnqueueCommand {
            body: body.to_vec(),
        })
        .await
        .map(|_| ())
    }

    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        let deadline = tokio::time::Instant::now() + self.config.receive_wait;
        loop {
            if let Some(delivery) = self.claim().await? {
                return Ok(Some(delivery));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(RECEIVE_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        if self
            .run(DeleteCommand {
                id: delivery.delivery_id,
            })
            .await?
        {
            Ok(())
        } else {
            Err(QueueError::UnknownDelivery(delivery.delivery_id.to_string()))
        }
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        if self
            .run(ReleaseCommand {
                id: delivery.delivery_id,
            })
            .await?
        {
            Ok(())
        } else {
            Err(QueueError::UnknownDelivery(delivery.delivery_id.to_string()))
        }
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        if self
            .run(DeadLetterCommand {
                id: delivery.delivery_id,
                reason: reason.to_string(),
            })
            .await?
        {
            Ok(())
        } else {
            Err(QueueError::UnknownDelivery(delivery.delivery_id.to_string()))
        }
    }
}
