//! Question document as stored in the primary store.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A question asked on an auction, optionally answered by the seller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDocument {
    pub id: CompactString,
    pub auction_id: CompactString,
    pub user_id: CompactString,
    /// Denormalized display name of the asker.
    pub user_name: String,
    pub message: String,
    #[serde(default)]
    pub reply: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
