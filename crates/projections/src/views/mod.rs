//! Read model views for the CQRS query side.

pub mod products;

pub use products::{ProductProjection, ProjectionOutcome};
