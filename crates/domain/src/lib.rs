//! Command side of the products pipeline.
//!
//! This crate provides:
//! - [`Aggregate`], rebuilt by replaying committed events
//! - [`CommandHandler`], which loads aggregates and appends with optimistic concurrency
//! - the product aggregate, attribute validation and [`ProductCommandService`]

pub mod aggregate;
pub mod command;
pub mod error;
pub mod product;

pub use aggregate::Aggregate;
pub use command::{CommandHandler, CommandOutcome};
pub use error::{DomainError, Result};
pub use product::{
    CreatedProduct, ExistencePolicy, NewProduct, Product, ProductCommandService, ProductError,
    ProductPatch, ProductStatus, UnknownExistencePolicy,
};
