//! Runtime configuration consumed by the pipeline.
//!
//! Values only: loading and validation of the config file live in the
//! server crate.

mod config_store;
mod pipeline;
mod queue;

pub use config_store::{ConfigChanges, ConfigStore};
pub use pipeline::PipelineConfig;
pub use queue::QueueConfig;
