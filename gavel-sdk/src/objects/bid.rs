//! Bid document as stored in the primary store.

use compact_str::CompactString;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A bid on an auction.
///
/// `user_name` is a denormalized copy of the bidder's display name; it is
/// rewritten to [`DELETED_USER_NAME`](super::DELETED_USER_NAME) some time
/// after the bidder is deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidDocument {
    pub id: CompactString,
    pub auction_id: CompactString,
    pub user_id: CompactString,
    pub user_name: String,
    pub amount: Decimal,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
