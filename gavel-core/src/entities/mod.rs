//! Cached projections of primary-store documents and the key scheme they
//! live under.
//!
//! Nothing in here is authoritative: every value can be dropped and rebuilt
//! from the primary store.

pub mod about_to_close;
pub mod auction_snapshot;
pub mod deletion_marker;
pub mod keys;
pub mod user_snapshot;

pub use about_to_close::{AboutToCloseEntry, is_about_to_close};
pub use auction_snapshot::AuctionSnapshot;
pub use deletion_marker::DeletionMarker;
pub use user_snapshot::UserSnapshot;

use time::OffsetDateTime;

/// Sorted-set score for a point in time, in whole seconds.
pub fn score_secs(at: OffsetDateTime) -> f64 {
    at.unix_timestamp() as f64
}

/// Sorted-set score for a point in time, in milliseconds.
pub fn score_millis(at: OffsetDateTime) -> f64 {
    (at.unix_timestamp_nanos() / 1_000_000) as f64
}
