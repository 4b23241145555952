//! Shared wire and document types for Gavel.
//!
//! Producers of commands (the REST backend) and producers of change
//! notifications (the primary store) agree on these shapes with the
//! synchronization workers in `gavel-core`.

pub mod objects;
