use super::primary::ChangeLog;
use crate::error::QueueError;
use crate::stores::feed::{ChangeBatch, ChangeFeed};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Reads a [`MemoryPrimaryStore`](super::MemoryPrimaryStore)'s change log.
///
/// The read position only moves on [`commit`](ChangeFeed::commit); until then
/// the same records are handed out again.
#[derive(Debug)]
pub struct MemoryChangeFeed {
    log: Arc<ChangeLog>,
    batch_size: usize,
    wait: Duration,
    /// Index of the first uncommitted record.
    position: usize,
}

impl MemoryChangeFeed {
    pub(crate) fn new(log: Arc<ChangeLog>, batch_size: usize, wait: Duration) -> Self {
        Self {
            log,
            batch_size: batch_size.max(1),
            wait,
            position: 0,
        }
    }

    /// Index of the first uncommitted record.
    pub fn position(&self) -> usize {
        self.position
    }

    async fn pending(&self) -> Option<ChangeBatch> {
        let records = self.log.records.lock().await;
        if self.position >= records.len() {
            return None;
        }
        let end = (self.position + self.batch_size).min(records.len());
        Some(ChangeBatch::new(records[self.position..end].to_vec()))
    }
}

#[async_trait]
impl ChangeFeed for MemoryChangeFeed {
    async fn next_batch(&mut self) -> Result<Option<ChangeBatch>, QueueError> {
        let appended = self.log.appended.notified();
        tokio::pin!(appended);
        appended.as_mut().enable();

        if let Some(batch) = self.pending().await {
            return Ok(Some(batch));
        }
        let _ = tokio::time::timeout(self.wait, appended).await;
        Ok(self.pending().await)
    }

    async fn commit(&mut self, batch: &ChangeBatch) -> Result<(), QueueError> {
        let Some(last) = batch.last_sequence() else {
            return Ok(());
        };
        // Sequences are 1-based log indexes.
        let next = usize::try_from(last).unwrap_or(0);
        if next > self.position {
            self.position = next;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::stores::feed::ChangeFeed;
    use crate::stores::memory::MemoryPrimaryStore;
    use gavel_sdk::objects::Collection;
    use std::time::Duration;

    #[tokio::test]
    async fn test_uncommitted_batch_is_redelivered() {
        let store = MemoryPrimaryStore::default();
        store
            .push_raw_record(Collection::Bids, serde_json::json!({"n": 1}))
            .await;
        let mut feed = store.change_feed(10, Duration::from_millis(10));
        let first = feed.next_batch().await.unwrap().unwrap();
        let again = feed.next_batch().await.unwrap().unwrap();
        assert_eq!(first, again);
        feed.commit(&again).await.unwrap();
        assert_eq!(feed.position(), 1);
        assert!(feed.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_batch_size_caps_records() {
        let store = MemoryPrimaryStore::default();
        for n in 0..5 {
            store
                .push_raw_record(Collection::Bids, serde_json::json!({ "n": n }))
                .await;
        }
        let mut feed = store.change_feed(2, Duration::from_millis(10));
        let batch = feed.next_batch().await.unwrap().unwrap();
        assert_eq!(batch.len(), 2);
        feed.commit(&batch).await.unwrap();
        let batch = feed.next_batch().await.unwrap().unwrap();
        assert_eq!(batch.records[0].sequence, 3);
    }
}
