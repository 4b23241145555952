//! Auction document as stored in the primary store.

use compact_str::CompactString;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Lifecycle status of an auction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuctionStatus {
    Open,
    Closed,
}

impl std::fmt::Display for AuctionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuctionStatus::Open => write!(f, "open"),
            AuctionStatus::Closed => write!(f, "closed"),
        }
    }
}

/// The authoritative auction record.
///
/// `version` is incremented by the primary store on every write and is the
/// ordering key for cache writes; `bid_count` is the store's running count
/// of accepted bids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionDocument {
    pub id: CompactString,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub seller_id: CompactString,
    #[serde(default)]
    pub thumbnail_id: Option<CompactString>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end_time: OffsetDateTime,
    pub status: AuctionStatus,
    pub current_price: Decimal,
    #[serde(default)]
    pub bid_count: i64,
    pub version: i64,
}

impl AuctionDocument {
    pub fn is_open(&self) -> bool {
        self.status == AuctionStatus::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auction_document_parsing() {
        let json = r#"{
            "id": "a-1",
            "title": "Vintage lamp",
            "sellerId": "u-7",
            "createdAt": "2026-10-19T10:00:00Z",
            "endTime": "2026-10-19T12:00:00Z",
            "status": "open",
            "currentPrice": "12.50",
            "version": 3
        }"#;
        let doc: AuctionDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.id, "a-1");
        assert!(doc.is_open());
        assert_eq!(doc.thumbnail_id, None);
        assert_eq!(doc.bid_count, 0);
        assert_eq!(doc.current_price, Decimal::new(1250, 2));
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let json = r#"{
            "id": "a-1",
            "title": "Vintage lamp",
            "sellerId": "u-7",
            "createdAt": "2026-10-19T10:00:00Z",
            "endTime": "2026-10-19T12:00:00Z",
            "status": "paused",
            "currentPrice": "12.50",
            "version": 3
        }"#;
        assert!(serde_json::from_str::<AuctionDocument>(json).is_err());
    }
}
