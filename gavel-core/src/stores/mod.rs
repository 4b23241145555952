//! Collaborator seams: the authoritative primary store, its change feed, the
//! cache store and the durable command queue.
//!
//! Every consumer receives these as explicitly constructed handles; there is
//! no process-wide client. `memory` backs tests and single-process runs,
//! `postgres` backs shared deployments.

pub mod cache;
pub mod feed;
pub mod memory;
pub mod postgres;
pub mod primary;
pub mod queue;

pub use cache::{CacheStore, ScoredMember};
pub use feed::{ChangeBatch, ChangeFeed};
pub use primary::{CasOutcome, ClosingSoonQuery, PrimaryStore};
pub use queue::{CommandQueue, Delivery};
