use crate::error::StoreError;
use async_trait::async_trait;
use compact_str::CompactString;
use gavel_sdk::objects::{AuctionDocument, UserDocument};
use time::OffsetDateTime;

/// Result of a conditional (compare-and-set) update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome<T> {
    /// The precondition held and the new document was written.
    Applied(T),
    /// The document changed since it was read; nothing was written.
    Rejected,
}

/// One page of the "open and closing before" query.
///
/// Results are ordered by id; pass the last id of a page as `after_id` to get
/// the next one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosingSoonQuery {
    pub closing_before: OffsetDateTime,
    pub after_id: Option<CompactString>,
    pub limit: u32,
}

/// The authoritative document store.
#[async_trait]
pub trait PrimaryStore: Send + Sync {
    async fn get_auction(&self, auction_id: &str) -> Result<Option<AuctionDocument>, StoreError>;

    /// Open auctions with `end_time <= closing_before`.
    async fn open_auctions_closing_before(
        &self,
        query: &ClosingSoonQuery,
    ) -> Result<Vec<AuctionDocument>, StoreError>;

    /// Transition an auction from open to closed if it is still at
    /// `expected_version` and open.
    async fn close_auction(
        &self,
        auction_id: &str,
        expected_version: i64,
    ) -> Result<CasOutcome<AuctionDocument>, StoreError>;

    async fn get_user(&self, user_id: &str) -> Result<Option<UserDocument>, StoreError>;

    /// Mark a user inactive if it is still at `expected_version`.
    async fn deactivate_user(
        &self,
        user_id: &str,
        expected_version: i64,
    ) -> Result<CasOutcome<UserDocument>, StoreError>;

    /// Rewrite the denormalized display name in every bid and question made
    /// by `user_id`. Returns the number of documents rewritten.
    async fn scrub_user_references(
        &self,
        user_id: &str,
        display_name: &str,
    ) -> Result<u64, StoreError>;
}
