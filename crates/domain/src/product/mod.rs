//! Product aggregate and related types.

mod aggregate;
mod attributes;
mod policy;
mod service;

pub use aggregate::{Product, ProductStatus};
pub use attributes::{NewProduct, ProductPatch};
pub use policy::{ExistencePolicy, UnknownExistencePolicy};
pub use service::{CreatedProduct, ProductCommandService};

use thiserror::Error;

/// Validation errors for product attributes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProductError {
    /// The name is missing or blank.
    #[error("Product name must not be empty")]
    EmptyName,

    /// The price is negative, NaN or infinite.
    #[error("Invalid price: {price} (must be a finite, non-negative number)")]
    InvalidPrice { price: f64 },

    /// The stock level is negative.
    #[error("Invalid stock: {stock} (must not be negative)")]
    NegativeStock { stock: i64 },
}
