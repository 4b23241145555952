//! Change notification records emitted by the primary store.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Document collections that emit change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Auctions,
    Users,
    Bids,
    Questions,
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Collection::Auctions => write!(f, "auctions"),
            Collection::Users => write!(f, "users"),
            Collection::Bids => write!(f, "bids"),
            Collection::Questions => write!(f, "questions"),
        }
    }
}

/// A single changed document.
///
/// The document body is kept as raw JSON so that one malformed record can be
/// rejected on its own without failing the batch that carried it.
/// `sequence` increases monotonically within a `partition`; there is no
/// ordering between partitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub collection: Collection,
    pub partition: i32,
    pub sequence: i64,
    pub document: serde_json::Value,
}

impl ChangeRecord {
    pub fn new(
        collection: Collection,
        partition: i32,
        sequence: i64,
        document: serde_json::Value,
    ) -> Self {
        Self {
            collection,
            partition,
            sequence,
            document,
        }
    }

    /// Decode the document body into its typed form.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.document)
    }
}
