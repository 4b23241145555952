//! Cache key scheme.

/// Sorted set of open auctions near their end, scored by end time (seconds).
pub const ABOUT_TO_CLOSE: &str = "auctions-about-to-close";

/// Companion sorted set holding, per auction id, the time (ms) at which a
/// change notification last added it to or removed it from the
/// about-to-close index. Reconciliation leaves alone any member touched
/// after its query started.
pub const ABOUT_TO_CLOSE_TOUCHED: &str = "auctions-about-to-close:touched";

/// Sorted set of auction ids scored by creation time (ms), trimmed to the
/// newest N.
pub const RECENT_AUCTIONS: &str = "recent-auctions";

/// Sorted set counting bids per auction within the current popularity window.
pub const POPULAR_RANKING: &str = "popular-auctions-ranking";

/// The ranking of the window being materialized. The live ranking is moved
/// here before it is read, so bids arriving meanwhile count towards the next
/// window.
pub const POPULAR_RANKING_CLOSING: &str = "popular-auctions-ranking:closing";

/// JSON array of the top-K auction ids from the last popularity window.
pub const POPULAR_AUCTIONS: &str = "popular-auctions";

pub fn auction(auction_id: &str) -> String {
    format!("auction:{auction_id}")
}

pub fn user(user_id: &str) -> String {
    format!("user:{user_id}")
}

pub fn user_deleted(user_id: &str) -> String {
    format!("user-deleted:{user_id}")
}

/// Marks a bid as already counted in the popularity ranking.
pub fn counted_bid(bid_id: &str) -> String {
    format!("popular-bid:{bid_id}")
}
