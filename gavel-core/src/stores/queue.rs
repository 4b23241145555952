use crate::error::QueueError;
use async_trait::async_trait;
use bytes::Bytes;
use gavel_sdk::objects::CommandMessage;

/// A received, not yet acknowledged message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_id: i64,
    pub body: Bytes,
    /// 1 on first delivery.
    pub delivery_count: u32,
}

/// Durable at-least-once command queue.
///
/// A message that is neither acked nor dead-lettered comes back, either
/// after a [`nack`](CommandQueue::nack) or once the consumer that held it
/// disappears. Messages delivered more than the configured number of times
/// are dead-lettered by the queue itself.
#[async_trait]
pub trait CommandQueue: Send + Sync {
    async fn publish(&self, message: &CommandMessage) -> Result<(), QueueError>;

    /// Wait a bounded time for one message. `Ok(None)` means nothing arrived.
    async fn receive(&self) -> Result<Option<Delivery>, QueueError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Hand the message back for redelivery.
    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Remove the message from the queue and park it with a reason.
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError>;
}
