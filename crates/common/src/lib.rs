//! Shared types for the products event-sourcing pipeline.

mod types;

pub use types::{AggregateId, Attributes};
