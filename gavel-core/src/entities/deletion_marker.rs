use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Records that delete-user processing already ran for a user.
///
/// Stored without expiry under [`keys::user_deleted`](super::keys::user_deleted);
/// the value is the RFC 3339 time at which processing completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionMarker {
    pub deleted_at: OffsetDateTime,
}

impl DeletionMarker {
    pub fn new(deleted_at: OffsetDateTime) -> Self {
        Self { deleted_at }
    }

    pub fn to_cache_value(&self) -> Result<String, time::error::Format> {
        self.deleted_at.format(&Rfc3339)
    }

    pub fn from_cache_value(value: &str) -> Result<Self, time::error::Parse> {
        OffsetDateTime::parse(value, &Rfc3339).map(Self::new)
    }
}
