//! EventQueueConsumer processor.
//!
//! The EventQueueConsumer is responsible for:
//! - Pulling command messages from the [`CommandQueue`] one at a time
//! - Applying close-auction, delete-user and scrub-user to the primary store
//!   with conditional updates, then to the cache
//! - Acknowledging only once the durable change is committed
//! - Retrying transient failures a bounded number of times before handing
//!   the message back, and dead-lettering messages that cannot be parsed
//!
//! Not-found and lost-race outcomes are logged and acknowledged.

use super::stats::PipelineStats;
use crate::config::{ConfigStore, PipelineConfig};
use crate::entities::keys;
use crate::error::{Disposition, SyncError};
use crate::events::{ShutdownReceiver, SyncEvent, sleep_unless_shutdown};
use crate::invalidation::{InvalidationEngine, apply_plan};
use crate::stores::{CacheStore, CasOutcome, CommandQueue, Delivery, PrimaryStore};
use crate::utils::backoff::{BASE_RETRY_DELAY, retry_delay, retry_transient};
use crate::utils::clock::Clock;
use gavel_sdk::objects::{
    AuctionDocument, CommandKind, CommandMessage, DELETED_USER_NAME, UserDocument,
};
use kanau::processor::Processor;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Conditional updates re-read and retry this many times before giving up
/// with a conflict.
const MAX_CAS_ATTEMPTS: u32 = 3;

/// How a successfully handled command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// This delivery made the state change.
    Applied,
    /// The state change had already happened; only idempotent cache writes ran.
    AlreadyDone,
}

pub struct EventQueueConsumer {
    primary: Arc<dyn PrimaryStore>,
    cache: Arc<dyn CacheStore>,
    queue: Arc<dyn CommandQueue>,
    config: ConfigStore<PipelineConfig>,
    clock: Arc<dyn Clock>,
    stats: Arc<PipelineStats>,
}

impl EventQueueConsumer {
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

    /// Receive and handle messages until shutdown. A message already
    /// received is always finished before the loop exits.
    pub async fn run(self, mut shutdown_rx: ShutdownReceiver) {
        info!("EventQueueConsumer started");
        let mut consecutive_failures = 0u32;

        loop {
            let received = tokio::select! {
                biased;

                res = shutdown_rx.changed() => {
                    if res.is_err() || *shutdown_rx.borrow() {
                        info!("EventQueueConsumer received shutdown signal");
                        break;
                    }
                    continue;
                }

                received = self.queue.receive() => received,
            };

            match received {
                Ok(Some(delivery)) => {
                    consecutive_failures = 0;
                    self.handle_delivery(delivery).await;
                }
                Ok(None) => consecutive_failures = 0,
                Err(e) => {
                    warn!(error = %e, "Failed to receive from command queue");
                    let delay = retry_delay(consecutive_failures, BASE_RETRY_DELAY);
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    if sleep_unless_shutdown(&mut shutdown_rx, delay).await {
                        info!("EventQueueConsumer received shutdown signal");
                        break;
                    }
                }
            }
        }

        info!("EventQueueConsumer shutdown complete");
    }

    /// Parse, execute and settle one delivery.
    pub async fn handle_delivery(&self, delivery: Delivery) {
        let message = match CommandMessage::from_slice(&delivery.body) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    delivery_id = delivery.delivery_id,
                    error = %e,
                    "Malformed command, dead-lettering"
                );
                self.stats.record_malformed();
                self.settle_dead_letter(&delivery, &format!("malformed command: {e}"))
                    .await;
                return;
            }
        };

        let retries = self.config.snapshot().await.max_transient_retries;
        let this = self;
        let command = &message;
        let what = message.command.to_string();
        let result = retry_transient(&what, retries, move || this.execute(command)).await;

        match result {
            Ok(outcome) => {
                debug!(
                    command = %message.command,
                    target_id = %message.target_id,
                    outcome = ?outcome,
                    delivery_count = delivery.delivery_count,
                    "Command handled"
                );
                self.settle_ack(&delivery).await;
            }
            Err(e) => match e.disposition() {
                Disposition::Acknowledge => {
                    info!(
                        command = %message.command,
                        target_id = %message.target_id,
                        kind = %e.kind(),
                        error = %e,
                        "Command is redundant, acknowledging"
                    );
                    self.settle_ack(&delivery).await;
                }
                Disposition::Retry => {
                    warn!(
                        command = %message.command,
                        target_id = %message.target_id,
                        delivery_count = delivery.delivery_count,
                        error = %e,
                        "Command failed after retries, handing it back to the queue"
                    );
                    self.stats.command_nacked();
                    if let Err(e) = self.queue.nack(&delivery).await {
                        warn!(error = %e, "Failed to nack command; it reappears after the visibility timeout");
                    }
                }
                Disposition::Skip => {
                    warn!(
                        command = %message.command,
                        target_id = %message.target_id,
                        error = %e,
                        "Command cannot be applied, dead-lettering"
                    );
                    self.settle_dead_letter(&delivery, &e.to_string()).await;
                }
            },
        }
    }

    async fn settle_ack(&self, delivery: &Delivery) {
        match self.queue.ack(delivery).await {
            Ok(()) => self.stats.command_acked(),
            Err(e) => warn!(
                delivery_id = delivery.delivery_id,
                error = %e,
                "Failed to ack command; it will be redelivered"
            ),
        }
    }

    async fn settle_dead_letter(&self, delivery: &Delivery, reason: &str) {
        match self.queue.dead_letter(delivery, reason).await {
            Ok(()) => self.stats.command_dead_lettered(),
            Err(e) => warn!(
                delivery_id = delivery.delivery_id,
                error = %e,
                "Failed to dead-letter command; it will be redelivered"
            ),
        }
    }

    /// Run one command against the primary store and the cache.
    pub async fn execute(&self, message: &CommandMessage) -> Result<CommandOutcome, SyncError> {
        match message.command {
            CommandKind::CloseAuction => self.close_auction(&message.target_id).await,
            CommandKind::DeleteUser => self.delete_user(&message.target_id).await,
            CommandKind::ScrubUser => self.scrub_user(&message.target_id).await,
        }
    }

    async fn engine(&self) -> InvalidationEngine {
        InvalidationEngine::new(&self.config.snapshot().await)
    }

    async fn close_auction(&self, auction_id: &str) -> Result<CommandOutcome, SyncError> {
        let mut attempt = 0;
        let (closed, outcome) = loop {
            let doc = self
                .primary
                .get_auction(auction_id)
                .await?
                .ok_or_else(|| SyncError::auction_not_found(auction_id))?;
            if !doc.is_open() {
                break (doc, CommandOutcome::AlreadyDone);
            }
            match self.primary.close_auction(auction_id, doc.version).await? {
                CasOutcome::Applied(closed) => break (closed, CommandOutcome::Applied),
                CasOutcome::Rejected => {
                    attempt += 1;
                    if attempt >= MAX_CAS_ATTEMPTS {
                        return Err(SyncError::Conflict {
                            entity: "auction",
                            id: auction_id.to_string(),
                        });
                    }
                    debug!(auction_id, attempt, "Close lost a race, re-reading");
                }
            }
        };

        self.apply_auction_closed(closed).await?;
        if outcome == CommandOutcome::Applied {
            info!(auction_id, "Auction closed");
        }
        Ok(outcome)
    }

    async fn apply_auction_closed(&self, closed: AuctionDocument) -> Result<(), SyncError> {
        let plan = self
            .engine()
            .await
            .plan(&SyncEvent::AuctionClosed(closed), self.clock.now())?;
        apply_plan(self.cache.as_ref(), &plan).await?;
        Ok(())
    }

    async fn delete_user(&self, user_id: &str) -> Result<CommandOutcome, SyncError> {
        if self.cache.get(&keys::user_deleted(user_id)).await?.is_some() {
            debug!(user_id, "User deletion already processed");
            return Ok(CommandOutcome::AlreadyDone);
        }

        let mut attempt = 0;
        let outcome = loop {
            let user: UserDocument = self
                .primary
                .get_user(user_id)
                .await?
                .ok_or_else(|| SyncError::user_not_found(user_id))?;
            if !user.is_active() {
                break CommandOutcome::AlreadyDone;
            }
            match self.primary.deactivate_user(user_id, user.version).await? {
                CasOutcome::Applied(_) => break CommandOutcome::Applied,
                CasOutcome::Rejected => {
                    attempt += 1;
                    if attempt >= MAX_CAS_ATTEMPTS {
                        return Err(SyncError::Conflict {
                            entity: "user",
                            id: user_id.to_string(),
                        });
                    }
                    debug!(user_id, attempt, "Deactivation lost a race, re-reading");
                }
            }
        };

        let engine = self.engine().await;
        let now = self.clock.now();
        let plan = engine.plan(
            &SyncEvent::UserDeleted {
                user_id: user_id.into(),
            },
            now,
        )?;
        apply_plan(self.cache.as_ref(), &plan).await?;

        if let Err(e) = self.queue.publish(&CommandMessage::scrub_user(user_id)).await {
            // Scrubbing is best-effort; embedded names may keep the old value.
            warn!(user_id, error = %e, "Failed to enqueue scrub-user");
        }

        let plan = engine.plan(
            &SyncEvent::UserDeletionRecorded {
                user_id: user_id.into(),
            },
            now,
        )?;
        apply_plan(self.cache.as_ref(), &plan).await?;

        info!(user_id, "User deleted");
        Ok(outcome)
    }

    async fn scrub_user(&self, user_id: &str) -> Result<CommandOutcome, SyncError> {
        let still_active = self
            .primary
            .get_user(user_id)
            .await?
            .is_some_and(|user| user.is_active());
        if still_active {
            return Err(SyncError::Conflict {
                entity: "user",
                id: user_id.to_string(),
            });
        }
        let rewritten = self
            .primary
            .scrub_user_references(user_id, DELETED_USER_NAME)
            .await?;
        info!(user_id, rewritten, "Scrubbed user references");
        Ok(if rewritten > 0 {
            CommandOutcome::Applied
        } else {
            CommandOutcome::AlreadyDone
        })
    }
}

impl Processor<CommandMessage> for EventQueueConsumer {
    type Output = CommandOutcome;
    type Error = SyncError;

    async fn process(&self, message: CommandMessage) -> Result<CommandOutcome, SyncError> {
        self.execute(&message).await
    }
}
