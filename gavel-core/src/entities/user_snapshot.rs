use compact_str::CompactString;
use gavel_sdk::objects::UserDocument;
use serde::{Deserialize, Serialize};

/// Cached profile fields of an active user.
///
/// Deleted users have no snapshot at all; there is no tombstone value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSnapshot {
    pub id: CompactString,
    pub name: String,
    pub photo_id: Option<CompactString>,
    pub version: i64,
}

impl From<&UserDocument> for UserSnapshot {
    fn from(doc: &UserDocument) -> Self {
        Self {
            id: doc.id.clone(),
            name: doc.name.clone(),
            photo_id: doc.photo_id.clone(),
            version: doc.version,
        }
    }
}

impl UserSnapshot {
    pub fn to_cache_value(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_cache_value(value: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(value)
    }
}
