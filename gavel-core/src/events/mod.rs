//! Events flowing into the invalidation engine, and the shutdown signal
//! shared by every consumer loop.
//!
//! # Event flow
//!
//! 1. Change notifications -> `ChangeFeedConsumer` -> `AuctionChanged`,
//!    `UserChanged`, `BidPlaced`
//! 2. Commands -> `EventQueueConsumer` -> `AuctionClosed`, `UserDeleted`,
//!    `UserDeletionRecorded`
//! 3. Timer ticks -> `TimerScheduler` -> `Reconciled`, `PopularityWindow`
//!
//! Every event carries enough of the document to plan cache writes without
//! another read, and every plan is safe to apply more than once.

pub mod shutdown;
pub mod types;

pub use shutdown::{ShutdownReceiver, ShutdownSender, shutdown_channel, sleep_unless_shutdown};
pub use types::{ReconciliationDiff, SyncEvent};
