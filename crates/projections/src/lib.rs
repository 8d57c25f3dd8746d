//! Query side of the products pipeline.
//!
//! This crate provides:
//! - [`ReadModelStore`] holding one [`ProductDocument`] per live product, in memory or in Postgres
//! - [`Projection`] and the [`ProductProjection`] view that folds events into the read model
//! - [`ProjectionProcessor`] for replaying the event store through projections
//! - [`Projector`], the long-running broker consumer with reconnect and dead-lettering
//! - [`ProductQueryService`] for paged reads

pub mod error;
pub mod memory;
pub mod postgres;
pub mod processor;
pub mod projection;
pub mod projector;
pub mod query;
pub mod read_model;
pub mod views;

pub use error::{ProjectionError, Result};
pub use memory::InMemoryReadModel;
pub use postgres::PostgresReadModel;
pub use processor::ProjectionProcessor;
pub use projection::{Projection, ProjectionPosition};
pub use projector::{Projector, ProjectorConfig, ProjectorState};
pub use query::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, ProductQueryService};
pub use read_model::{ProductDocument, ReadModelStore};
pub use views::{ProductProjection, ProjectionOutcome};
