//! Pipeline error taxonomy.
//!
//! Backend errors (`StoreError`, `CacheError`, `QueueError`) are folded into
//! [`SyncError`], whose [`ErrorKind`] selects a handling [`Disposition`]
//! through one exhaustive table instead of per-call-site type checks.

use gavel_sdk::objects::CommandDecodeError;
use thiserror::Error;

/// Errors raised by a primary store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("primary store call timed out")]
    Timeout,

    #[error("primary store unavailable: {0}")]
    Unavailable(String),

    #[error("stored document is corrupt: {0}")]
    Corrupt(String),
}

/// Errors raised by a cache store implementation.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(#[from] sqlx::Error),

    #[error("cache call timed out")]
    Timeout,

    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cached value under {key} is not valid: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Errors raised by a command queue or change feed transport.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue backend error: {0}")]
    Backend(#[from] sqlx::Error),

    #[error("queue call timed out")]
    Timeout,

    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error("unknown delivery {0}")]
    UnknownDelivery(String),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The closed set of error kinds the pipeline distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Timeout or connection failure on store, cache or queue.
    TransientIo,
    /// The entity vanished between event emission and processing.
    NotFound,
    /// A conditional update lost to a concurrent writer.
    Conflict,
    /// The notification or command payload could not be parsed.
    Malformed,
}

/// What a consumer does with a failed work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Retry with backoff, then hand the item back to the transport.
    Retry,
    /// Log and acknowledge; the work is redundant, not wrong.
    Acknowledge,
    /// Skip this record, count it, and keep going with the rest.
    Skip,
}

impl ErrorKind {
    /// The handling policy for this kind of error.
    pub const fn policy(self) -> Disposition {
        match self {
            ErrorKind::TransientIo => Disposition::Retry,
            ErrorKind::NotFound => Disposition::Acknowledge,
            ErrorKind::Conflict => Disposition::Acknowledge,
            ErrorKind::Malformed => Disposition::Skip,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::TransientIo => write!(f, "transient_io"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::Conflict => write!(f, "conflict"),
            ErrorKind::Malformed => write!(f, "malformed"),
        }
    }
}

/// Errors produced while processing a single notification, command or tick.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} {id} was changed concurrently")]
    Conflict { entity: &'static str, id: String },

    #[error("malformed record: {0}")]
    Malformed(String),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Store(StoreError::Corrupt(_)) => ErrorKind::Malformed,
            SyncError::Store(_) | SyncError::Cache(_) | SyncError::Queue(_) => {
                ErrorKind::TransientIo
            }
            SyncError::NotFound { .. } => ErrorKind::NotFound,
            SyncError::Conflict { .. } => ErrorKind::Conflict,
            SyncError::Malformed(_) => ErrorKind::Malformed,
        }
    }

    pub fn disposition(&self) -> Disposition {
        self.kind().policy()
    }

    pub fn auction_not_found(id: impl Into<String>) -> Self {
        SyncError::NotFound {
            entity: "auction",
            id: id.into(),
        }
    }

    pub fn user_not_found(id: impl Into<String>) -> Self {
        SyncError::NotFound {
            entity: "user",
            id: id.into(),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(value: serde_json::Error) -> Self {
        SyncError::Malformed(value.to_string())
    }
}

impl From<CommandDecodeError> for SyncError {
    fn from(value: CommandDecodeError) -> Self {
        SyncError::Malformed(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_table() {
        assert_eq!(ErrorKind::TransientIo.policy(), Disposition::Retry);
        assert_eq!(ErrorKind::NotFound.policy(), Disposition::Acknowledge);
        assert_eq!(ErrorKind::Conflict.policy(), Disposition::Acknowledge);
        assert_eq!(ErrorKind::Malformed.policy(), Disposition::Skip);
    }

    #[test]
    fn test_backend_errors_are_transient() {
        assert_eq!(
            SyncError::from(CacheError::Timeout).kind(),
            ErrorKind::TransientIo
        );
        assert_eq!(
            SyncError::from(StoreError::Unavailable("reset".into())).kind(),
            ErrorKind::TransientIo
        );
        assert_eq!(
            SyncError::from(QueueError::Timeout).disposition(),
            Disposition::Retry
        );
    }

    #[test]
    fn test_corrupt_document_is_malformed() {
        let err = SyncError::from(StoreError::Corrupt("status 'x'".into()));
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }

    #[test]
    fn test_decode_errors_are_skipped() {
        let err = serde_json::from_str::<u32>("nope").unwrap_err();
        assert_eq!(SyncError::from(err).disposition(), Disposition::Skip);
    }
}
