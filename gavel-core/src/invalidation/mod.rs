//! Translation of [`SyncEvent`](crate::events::SyncEvent)s into ordered
//! cache mutations.
//!
//! Planning is pure and synchronous; applying a plan is a separate step so
//! that every consumer shares one ordering and one failure behaviour.

pub mod apply;
pub mod engine;
pub mod ops;
pub mod reconcile;

pub use apply::{ApplyReport, apply_plan};
pub use engine::InvalidationEngine;
pub use ops::{CacheOp, InvalidationPlan};
pub use reconcile::diff_about_to_close;
