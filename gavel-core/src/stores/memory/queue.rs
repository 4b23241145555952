use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::stores::queue::{CommandQueue, Delivery};
use async_trait::async_trait;
use bytes::Bytes;
use gavel_sdk::objects::CommandMessage;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::warn;

#[derive(Debug, Clone)]
struct Message {
    id: i64,
    body: Bytes,
    delivery_count: u32,
}

/// A message parked after exhausting its deliveries or being rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub body: Bytes,
    pub reason: String,
}

#[derive(Debug, Default)]
struct QueueState {
    next_id: i64,
    ready: VecDeque<Message>,
    in_flight: HashMap<i64, Message>,
    dead: Vec<DeadLetter>,
}

/// A [`CommandQueue`] held in process memory.
#[derive(Debug)]
pub struct MemoryCommandQueue {
    state: Mutex<QueueState>,
    published: Notify,
    max_deliveries: u32,
    receive_wait: Duration,
    available: AtomicBool,
}

impl MemoryCommandQueue {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            published: Notify::new(),
            max_deliveries: config.max_deliveries,
            receive_wait: config.receive_wait,
            available: AtomicBool::new(true),
        }
    }

    /// Make every call fail with [`QueueError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Put every unacknowledged message back, as if its consumer died.
    pub async fn redeliver_in_flight(&self) {
        let mut state = self.state.lock().await;
        let mut held: Vec<Message> = state.in_flight.drain().map(|(_, m)| m).collect();
        held.sort_by_key(|m| m.id);
        state.ready.extend(held);
        drop(state);
        self.published.notify_waiters();
    }

    /// Messages waiting to be received.
    pub async fn ready_len(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    /// Messages received but neither acked nor dead-lettered.
    pub async fn in_flight_len(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead.clone()
    }

    /// Bodies of the messages waiting to be received, oldest first.
    pub async fn ready_messages(&self) -> Vec<Bytes> {
        self.state
            .lock()
            .await
            .ready
            .iter()
            .map(|m| m.body.clone())
            .collect()
    }

    /// Publish a raw body, bypassing command encoding.
    pub async fn publish_raw(&self, body: Bytes) {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = state.next_id;
        state.ready.push_back(Message {
            id,
            body,
            delivery_count: 0,
        });
        drop(state);
        self.published.notify_waiters();
    }

    fn check_available(&self) -> Result<(), QueueError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(QueueError::Unavailable("queue offline".into()))
        }
    }

    async fn try_receive(&self) -> Option<Delivery> {
        let mut state = self.state.lock().await;
        while let Some(mut message) = state.ready.pop_front() {
            message.delivery_count += 1;
            if message.delivery_count > self.max_deliveries {
                warn!(
                    delivery_id = message.id,
                    deliveries = message.delivery_count - 1,
                    "Message exceeded max deliveries, dead-lettering"
                );
                state.dead.push(DeadLetter {
                    body: message.body,
                    reason: "max deliveries exceeded".into(),
                });
                continue;
            }
            let delivery = Delivery {
                delivery_id: message.id,
                body: message.body.clone(),
                delivery_count: message.delivery_count,
            };
            state.in_flight.insert(message.id, message);
            return Some(delivery);
        }
        None
    }
}

#[async_trait]
impl CommandQueue for MemoryCommandQueue {
    async fn publish(&self, message: &CommandMessage) -> Result<(), QueueError> {
        self.check_available()?;
        let body = message.to_bytes()?;
        self.publish_raw(body).await;
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        self.check_available()?;
        let published = self.published.notified();
        tokio::pin!(published);
        published.as_mut().enable();

        if let Some(delivery) = self.try_receive().await {
            return Ok(Some(delivery));
        }
        let _ = tokio::time::timeout(self.receive_wait, published).await;
        Ok(self.try_receive().await)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        state
            .in_flight
            .remove(&delivery.delivery_id)
            .map(|_| ())
            .ok_or_else(|| QueueError::UnknownDelivery(delivery.delivery_id.to_string()))
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let message = state
            .in_flight
            .remove(&delivery.delivery_id)
            .ok_or_else(|| QueueError::UnknownDelivery(delivery.delivery_id.to_string()))?;
        state.ready.push_back(message);
        drop(state);
        self.published.notify_waiters();
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let message = state
            .in_flight
            .remove(&delivery.delivery_id)
            .ok_or_else(|| QueueError::UnknownDelivery(delivery.delivery_id.to_string()))?;
        state.dead.push(DeadLetter {
            body: message.body,
            reason: reason.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(max_deliveries: u32) -> MemoryCommandQueue {
        MemoryCommandQueue::new(&QueueConfig {
            max_deliveries,
            receive_wait: Duration::from_millis(10),
            ..QueueConfig::default()
        })
    }

    #[tokio::test]
    async fn test_ack_removes_message() {
        let q = queue(5);
        q.publish(&CommandMessage::close_auction("a")).await.unwrap();
        let d = q.receive().await.unwrap().unwrap();
        assert_eq!(d.delivery_count, 1);
        assert_eq!(
            CommandMessage::from_slice(&d.body).unwrap(),
            CommandMessage::close_auction("a")
        );
        q.ack(&d).await.unwrap();
        assert!(q.receive().await.unwrap().is_none());
        assert!(matches!(q.ack(&d).await, Err(QueueError::UnknownDelivery(_))));
    }

    #[tokio::test]
    async fn test_nack_redelivers_until_dead_lettered() {
        let q = queue(2);
        q.publish(&CommandMessage::delete_user("u")).await.unwrap();
        for expected in 1..=2 {
            let d = q.receive().await.unwrap().unwrap();
            assert_eq!(d.delivery_count, expected);
            q.nack(&d).await.unwrap();
        }
        assert!(q.receive().await.unwrap().is_none());
        let dead = q.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].reason, "max deliveries exceeded");
    }

    #[tokio::test]
    async fn test_abandoned_delivery_comes_back() {
        let q = queue(5);
        q.publish(&CommandMessage::scrub_user("u")).await.unwrap();
        let _held = q.receive().await.unwrap().unwrap();
        assert_eq!(q.in_flight_len().await, 1);
        q.redeliver_in_flight().await;
        let again = q.receive().await.unwrap().unwrap();
        assert_eq!(again.delivery_count, 2);
    }

    #[tokio::test]
    async fn test_dead_letter_keeps_reason() {
        let q = queue(5);
        q.publish_raw(Bytes::from_static(b"garbage")).await;
        let d = q.receive().await.unwrap().unwrap();
        q.dead_letter(&d, "malformed command").await.unwrap();
        assert_eq!(
            q.dead_letters().await,
            vec![DeadLetter {
                body: Bytes::from_static(b"garbage"),
                reason: "malformed command".into()
            }]
        );
        assert_eq!(q.in_flight_len().await, 0);
    }
}
