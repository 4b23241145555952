use compact_str::CompactString;
use gavel_sdk::objects::{AuctionDocument, AuctionStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Cached read model of an auction, stored as JSON under
/// [`keys::auction`](super::keys::auction).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionSnapshot {
    pub id: CompactString,
    pub title: String,
    #[serde(with = "time::serde::rfc3339")]
    pub end_time: OffsetDateTime,
    pub status: AuctionStatus,
    pub current_price: Decimal,
    pub seller_id: CompactString,
    pub thumbnail_id: Option<CompactString>,
    pub version: i64,
}

impl From<&AuctionDocument> for AuctionSnapshot {
    fn from(doc: &AuctionDocument) -> Self {
        Self {
            id: doc.id.clone(),
            title: doc.title.clone(),
            end_time: doc.end_time,
            status: doc.status,
            current_price: doc.current_price,
            seller_id: doc.seller_id.clone(),
            thumbnail_id: doc.thumbnail_id.clone(),
            version: doc.version,
        }
    }
}

impl AuctionSnapshot {
    pub fn to_cache_value(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_cache_value(value: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(value)
    }
}
