//! Process-local backends.
//!
//! The cache store is a usable single-node cache; the primary store, change
//! feed and queue exist to drive the consumers in tests and local runs.

pub mod cache;
pub mod feed;
pub mod primary;
pub mod queue;

pub use cache::MemoryCacheStore;
pub use feed::MemoryChangeFeed;
pub use primary::MemoryPrimaryStore;
pub use queue::MemoryCommandQueue;
