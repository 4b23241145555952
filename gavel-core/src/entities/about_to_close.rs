use compact_str::CompactString;
use gavel_sdk::objects::AuctionStatus;
use std::time::Duration;
use time::OffsetDateTime;

/// Whether an auction belongs in the about-to-close index at `now`.
///
/// Open auctions whose end is at most `threshold` away qualify, including
/// ones already past their end that have not been closed yet. Every writer
/// of the index goes through this one predicate.
pub fn is_about_to_close(
    status: AuctionStatus,
    end_time: OffsetDateTime,
    now: OffsetDateTime,
    threshold: Duration,
) -> bool {
    status == AuctionStatus::Open && end_time <= now + threshold
}

/// One member of the about-to-close index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AboutToCloseEntry {
    pub auction_id: CompactString,
    pub end_time: OffsetDateTime,
}

impl AboutToCloseEntry {
    pub fn new(auction_id: impl Into<CompactString>, end_time: OffsetDateTime) -> Self {
        Self {
            auction_id: auction_id.into(),
            end_time,
        }
    }

    pub fn score(&self) -> f64 {
        super::score_secs(self.end_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: Duration = Duration::from_secs(120);

    fn now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_800_000_000).unwrap()
    }

    #[test]
    fn test_open_auction_inside_threshold() {
        let end = now() + time::Duration::seconds(90);
        assert!(is_about_to_close(AuctionStatus::Open, end, now(), THRESHOLD));
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let end = now() + time::Duration::seconds(120);
        assert!(is_about_to_close(AuctionStatus::Open, end, now(), THRESHOLD));
        let end = now() + time::Duration::seconds(121);
        assert!(!is_about_to_close(AuctionStatus::Open, end, now(), THRESHOLD));
    }

    #[test]
    fn test_overdue_open_auction_stays_indexed() {
        let end = now() - time::Duration::seconds(30);
        assert!(is_about_to_close(AuctionStatus::Open, end, now(), THRESHOLD));
    }

    #[test]
    fn test_closed_auction_never_qualifies() {
        let end = now() + time::Duration::seconds(10);
        assert!(!is_about_to_close(AuctionStatus::Closed, end, now(), THRESHOLD));
    }
}
