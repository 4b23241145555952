use crate::error::StoreError;
use crate::stores::primary::{CasOutcome, ClosingSoonQuery, PrimaryStore};
use async_trait::async_trait;
use compact_str::CompactString;
use gavel_sdk::objects::{
    AuctionDocument, AuctionStatus, BidDocument, ChangeRecord, Collection, QuestionDocument,
    UserDocument, UserStatus,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

use super::feed::MemoryChangeFeed;

/// Append-only change log shared between the store and its feeds.
#[derive(Debug, Default)]
pub(crate) struct ChangeLog {
    pub(crate) records: Mutex<Vec<ChangeRecord>>,
    pub(crate) appended: Notify,
}

#[derive(Debug, Default)]
struct Documents {
    auctions: BTreeMap<CompactString, AuctionDocument>,
    users: BTreeMap<CompactString, UserDocument>,
    bids: Vec<BidDocument>,
    questions: Vec<QuestionDocument>,
}

/// A [`PrimaryStore`] held in process memory.
///
/// Writes through the store's own methods bump the document version and
/// append a [`ChangeRecord`] to the log that [`MemoryChangeFeed`]s read.
/// Bids and questions only notify on insert, so scrubbing them does not
/// produce notifications.
#[derive(Debug)]
pub struct MemoryPrimaryStore {
    docs: Mutex<Documents>,
    log: Arc<ChangeLog>,
    partitions: i32,
    available: AtomicBool,
}

impl Default for MemoryPrimaryStore {
    fn default() -> Self {
        Self::new(1)
    }
}

impl MemoryPrimaryStore {
    /// A store whose notifications are spread over `partitions` partitions
    /// by document id.
    pub fn new(partitions: i32) -> Self {
        Self {
            docs: Mutex::new(Documents::default()),
            log: Arc::new(ChangeLog::default()),
            partitions: partitions.max(1),
            available: AtomicBool::new(true),
        }
    }

    /// Make every [`PrimaryStore`] call fail with [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// A feed that starts from the beginning of the log.
    pub fn change_feed(&self, batch_size: usize, wait: Duration) -> MemoryChangeFeed {
        MemoryChangeFeed::new(self.log.clone(), batch_size, wait)
    }

    /// Insert or replace an auction. The stored version is one past the
    /// previous one, or `doc.version` for a new document.
    pub async fn put_auction(&self, mut doc: AuctionDocument) -> AuctionDocument {
        let mut docs = self.docs.lock().await;
        if let Some(previous) = docs.auctions.get(&doc.id) {
            doc.version = previous.version + 1;
        }
        docs.auctions.insert(doc.id.clone(), doc.clone());
        drop(docs);
        self.notify(Collection::Auctions, &doc.id, &doc).await;
        doc
    }

    pub async fn put_user(&self, mut doc: UserDocument) -> UserDocument {
        let mut docs = self.docs.lock().await;
        if let Some(previous) = docs.users.get(&doc.id) {
            doc.version = previous.version + 1;
        }
        docs.users.insert(doc.id.clone(), doc.clone());
        drop(docs);
        self.notify(Collection::Users, &doc.id, &doc).await;
        doc
    }

    pub async fn insert_bid(&self, bid: BidDocument) {
        self.docs.lock().await.bids.push(bid.clone());
        self.notify(Collection::Bids, &bid.auction_id, &bid).await;
    }

    pub async fn insert_question(&self, question: QuestionDocument) {
        self.docs.lock().await.questions.push(question.clone());
        self.notify(Collection::Questions, &question.auction_id, &question)
            .await;
    }

    /// Append a notification carrying an arbitrary document body.
    pub async fn push_raw_record(&self, collection: Collection, document: serde_json::Value) {
        self.append(collection, 0, document).await;
    }

    pub async fn bids(&self) -> Vec<BidDocument> {
        self.docs.lock().await.bids.clone()
    }

    pub async fn questions(&self) -> Vec<QuestionDocument> {
        self.docs.lock().await.questions.clone()
    }

    /// Number of notifications appended so far.
    pub async fn log_len(&self) -> usize {
        self.log.records.lock().await.len()
    }

    fn partition_of(&self, id: &str) -> i32 {
        let hash = id
            .bytes()
            .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
        (hash % self.partitions as u32) as i32
    }

    async fn notify<T: Serialize>(&self, collection: Collection, key: &str, doc: &T) {
        let partition = self.partition_of(key);
        // Documents here always serialize; a failure would be a bug in the types.
        if let Ok(document) = serde_json::to_value(doc) {
            self.append(collection, partition, document).await;
        }
    }

    async fn append(&self, collection: Collection, partition: i32, document: serde_json::Value) {
        let mut records = self.log.records.lock().await;
        let sequence = records.len() as i64 + 1;
        records.push(ChangeRecord::new(collection, partition, sequence, document));
        drop(records);
        self.log.appended.notify_waiters();
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("primary store offline".into()))
        }
    }
}

#[async_trait]
impl PrimaryStore for MemoryPrimaryStore {
    async fn get_auction(&self, auction_id: &str) -> Result<Option<AuctionDocument>, StoreError> {
        self.check_available()?;
        Ok(self.docs.lock().await.auctions.get(auction_id).cloned())
    }

    async fn open_auctions_closing_before(
        &self,
        query: &ClosingSoonQuery,
    ) -> Result<Vec<AuctionDocument>, StoreError> {
        self.check_available()?;
        let docs = self.docs.lock().await;
        Ok(docs
            .auctions
            .values()
            .filter(|a| query.after_id.as_ref().is_none_or(|after| a.id > *after))
            .filter(|a| a.status == AuctionStatus::Open && a.end_time <= query.closing_before)
            .take(query.limit as usize)
            .cloned()
            .collect())
    }

    async fn close_auction(
        &self,
        auction_id: &str,
        expected_version: i64,
    ) -> Result<CasOutcome<AuctionDocument>, StoreError> {
        self.check_available()?;
        let mut docs = self.docs.lock().await;
        let Some(doc) = docs.auctions.get_mut(auction_id) else {
            return Ok(CasOutcome::Rejected);
        };
        if doc.version != expected_version || doc.status != AuctionStatus::Open {
            return Ok(CasOutcome::Rejected);
        }
        doc.status = AuctionStatus::Closed;
        doc.version += 1;
        let closed = doc.clone();
        drop(docs);
        self.notify(Collection::Auctions, &closed.id, &closed).await;
        Ok(CasOutcome::Applied(closed))
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserDocument>, StoreError> {
        self.check_available()?;
        Ok(self.docs.lock().await.users.get(user_id).cloned())
    }

    async fn deactivate_user(
        &self,
        user_id: &str,
        expected_version: i64,
    ) -> Result<CasOutcome<UserDocument>, StoreError> {
        self.check_available()?;
        let mut docs = self.docs.lock().await;
        let Some(doc) = docs.users.get_mut(user_id) else {
            return Ok(CasOutcome::Rejected);
        };
        if doc.version != expected_version {
            return Ok(CasOutcome::Rejected);
        }
        doc.status = UserStatus::Inactive;
        doc.version += 1;
        let deactivated = doc.clone();
        drop(docs);
        self.notify(Collection::Users, &deactivated.id, &deactivated)
            .await;
        Ok(CasOutcome::Applied(deactivated))
    }

    async fn scrub_user_references(
        &self,
        user_id: &str,
        display_name: &str,
    ) -> Result<u64, StoreError> {
        self.check_available()?;
        let mut docs = self.docs.lock().await;
        let mut rewritten = 0u64;
        for bid in docs.bids.iter_mut() {
            if bid.user_id == user_id && bid.user_name != display_name {
                bid.user_name = display_name.to_string();
                rewritten += 1;
            }
        }
        for question in docs.questions.iter_mut() {
            if question.user_id == user_id && question.user_name != display_name {
                question.user_name = display_name.to_string();
                rewritten += 1;
            }
        }
        Ok(rewritten)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::feed::ChangeFeed;
    use rust_decimal::Decimal;
    use time::OffsetDateTime;

    fn auction(id: &str, end_secs: i64) -> AuctionDocument {
        AuctionDocument {
            id: id.into(),
            title: format!("lot {id}"),
            description: String::new(),
            seller_id: "seller".into(),
            thumbnail_id: None,
            created_at: OffsetDateTime::from_unix_timestamp(1_000).unwrap(),
            end_time: OffsetDateTime::from_unix_timestamp(end_secs).unwrap(),
            status: AuctionStatus::Open,
            current_price: Decimal::ONE,
            bid_count: 0,
            version: 1,
        }
    }

    #[tokio::test]
    async fn test_close_is_conditional_on_version() {
        let store = MemoryPrimaryStore::default();
        let doc = store.put_auction(auction("a", 5_000)).await;
        assert_eq!(
            store.close_auction("a", doc.version + 1).await.unwrap(),
            CasOutcome::Rejected
        );
        let CasOutcome::Applied(closed) = store.close_auction("a", doc.version).await.unwrap()
        else {
            panic!("close should apply");
        };
        assert_eq!(closed.status, AuctionStatus::Closed);
        assert_eq!(closed.version, doc.version + 1);
        // Already closed.
        assert_eq!(
            store.close_auction("a", closed.version).await.unwrap(),
            CasOutcome::Rejected
        );
    }

    #[tokio::test]
    async fn test_closing_soon_query_pages_by_id() {
        let store = MemoryPrimaryStore::default();
        for id in ["a", "b", "c", "d"] {
            store.put_auction(auction(id, 1_500)).await;
        }
        store.put_auction(auction("late", 9_000)).await;
        let mut query = ClosingSoonQuery {
            closing_before: OffsetDateTime::from_unix_timestamp(2_000).unwrap(),
            after_id: None,
            limit: 3,
        };
        let first = store.open_auctions_closing_before(&query).await.unwrap();
        assert_eq!(first.len(), 3);
        query.after_id = first.last().map(|a| a.id.clone());
        let second = store.open_auctions_closing_before(&query).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, "d");
    }

    #[tokio::test]
    async fn test_writes_are_logged_for_the_feed() {
        let store = MemoryPrimaryStore::default();
        store.put_auction(auction("a", 5_000)).await;
        store.put_auction(auction("a", 6_000)).await;
        let mut feed = store.change_feed(10, Duration::from_millis(10));
        let batch = feed.next_batch().await.unwrap().unwrap();
        assert_eq!(batch.len(), 2);
        let latest: AuctionDocument = batch.records[1].decode().unwrap();
        assert_eq!(latest.version, 2);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_calls() {
        let store = MemoryPrimaryStore::default();
        store.set_available(false);
        assert!(matches!(
            store.get_auction("a").await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
