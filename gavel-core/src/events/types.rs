use crate::entities::AboutToCloseEntry;
use compact_str::CompactString;
use gavel_sdk::objects::{AuctionDocument, BidDocument, UserDocument};
use time::OffsetDateTime;

/// Something that happened to the primary store, as seen by the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// An auction document was inserted or updated.
    AuctionChanged(AuctionDocument),
    /// A user document was inserted or updated.
    UserChanged(UserDocument),
    /// A bid was inserted.
    BidPlaced(BidDocument),
    /// close-auction found the auction closed, by its own CAS or an earlier one.
    AuctionClosed(AuctionDocument),
    /// delete-user deactivated the user.
    UserDeleted { user_id: CompactString },
    /// delete-user finished every other step.
    UserDeletionRecorded { user_id: CompactString },
    /// A reconciliation pass computed its corrections.
    Reconciled(ReconciliationDiff),
    /// A popularity window closed with these auctions on top, best first.
    PopularityWindow { top: Vec<CompactString> },
}

/// Corrections to the about-to-close index computed by one reconciliation
/// pass whose query started at `started_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationDiff {
    pub started_at: OffsetDateTime,
    /// Entries to add or re-score.
    pub to_add: Vec<AboutToCloseEntry>,
    /// Indexed auction ids to drop.
    pub to_remove: Vec<CompactString>,
    /// Touch stamps that no longer guard anything.
    pub stale_stamps: Vec<CompactString>,
}

impl ReconciliationDiff {
    pub fn new(started_at: OffsetDateTime) -> Self {
        Self {
            started_at,
            to_add: Vec::new(),
            to_remove: Vec::new(),
            stale_stamps: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty() && self.stale_stamps.is_empty()
    }
}
