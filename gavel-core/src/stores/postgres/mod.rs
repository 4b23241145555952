//! Postgres backends.
//!
//! Each query is a struct with a [`Processor`](kanau::processor::Processor)
//! impl on [`DatabaseProcessor`](crate::framework::DatabaseProcessor); the
//! store types wrap those queries behind the collaborator traits and bound
//! every call with the configured timeout. Schema lives in `migrations/`.

pub mod cache;
pub mod feed;
pub mod primary;
pub mod queue;

pub use cache::PgCacheStore;
pub use feed::{PgChangeFeed, PgChangeFeedOptions};
pub use primary::PgPrimaryStore;
pub use queue::PgCommandQueue;
