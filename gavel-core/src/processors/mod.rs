//! Long-running consumers and the jobs they drive.
//!
//! - [`ChangeFeedConsumer`]: change notifications into cache writes
//! - [`EventQueueConsumer`]: close-auction, delete-user and scrub-user commands
//! - [`TimerScheduler`]: periodic reconciliation and popularity refresh
//!
//! Each consumer owns its loop and exits on the shared shutdown signal.

pub mod change_feed;
pub mod command_consumer;
pub mod popularity;
pub mod reconciler;
pub mod scheduler;
pub mod stats;


pub use change_feed::{BatchOutcome, ChangeFeedConsumer};
pub use command_consumer::{CommandOutcome, EventQueueConsumer};
pub use popularity::PopularityRefresher;
pub use reconciler::{ReconciliationReport, ReconciliationSnapshot, Reconciler};
pub use scheduler::TimerScheduler;
pub use stats::{PipelineStats, StatsSnapshot};
