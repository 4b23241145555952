use crate::entities::{AboutToCloseEntry, score_millis};
use crate::events::ReconciliationDiff;
use crate::stores::ScoredMember;
use compact_str::CompactString;
use std::collections::{HashMap, HashSet};
use time::OffsetDateTime;

/// Compare the authoritative about-to-close set with what the cache holds.
///
/// `desired` is the query result, `indexed` the current index and `stamps`
/// the touch stamps, all read after `started_at` was captured. Members
/// stamped at or after `started_at` were written by a notification or
/// command newer than the query, so the diff neither adds, removes nor
/// re-scores them.
pub fn diff_about_to_close(
    desired: &[AboutToCloseEntry],
    indexed: &[ScoredMember],
    stamps: &[ScoredMember],
    started_at: OffsetDateTime,
) -> ReconciliationDiff {
    let cutoff = score_millis(started_at);
    let touched_since: HashSet<&str> = stamps
        .iter()
        .filter(|s| s.score >= cutoff)
        .map(|s| s.member.as_str())
        .collect();
    let current: HashMap<&str, f64> = indexed
        .iter()
        .map(|m| (m.member.as_str(), m.score))
        .collect();
    let wanted: HashSet<&str> = desired.iter().map(|e| e.auction_id.as_str()).collect();

    let mut diff = ReconciliationDiff::new(started_at);

    for entry in desired {
        if touched_since.contains(entry.auction_id.as_str()) {
            continue;
        }
        match current.get(entry.auction_id.as_str()) {
            Some(score) if *score == entry.score() => {}
            _ => diff.to_add.push(entry.clone()),
        }
    }

    for member in indexed {
        let id = member.member.as_str();
        if !wanted.contains(id) && !touched_since.contains(id) {
            diff.to_remove.push(CompactString::from(id));
        }
    }

    for stamp in stamps {
        let id = stamp.member.as_str();
        if stamp.score < cutoff && !current.contains_key(id) && !wanted.contains(id) {
            diff.stale_stamps.push(CompactString::from(id));
        }
    }

    diff
}
