use crate::error::QueueError;
use async_trait::async_trait;
use gavel_sdk::objects::ChangeRecord;

/// A batch of change records handed out by a [`ChangeFeed`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeBatch {
    pub records: Vec<ChangeRecord>,
}

impl ChangeBatch {
    pub fn new(records: Vec<ChangeRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Highest sequence number carried by the batch.
    pub fn last_sequence(&self) -> Option<i64> {
        self.records.iter().map(|r| r.sequence).max()
    }
}

/// Subscription to the primary store's change notifications.
///
/// Delivery is at-least-once: a batch that is not committed is handed out
/// again by a later [`next_batch`](ChangeFeed::next_batch), possibly to a
/// restarted consumer. Ordering holds only within a partition.
#[async_trait]
pub trait ChangeFeed: Send {
    /// Wait a bounded time for the next batch. `Ok(None)` means nothing
    /// arrived within the wait.
    async fn next_batch(&mut self) -> Result<Option<ChangeBatch>, QueueError>;

    /// Checkpoint past every record in `batch`.
    async fn commit(&mut self, batch: &ChangeBatch) -> Result<(), QueueError>;
}
