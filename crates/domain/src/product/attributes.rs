//! Product attribute sets carried by commands.

use common::Attributes;
use serde::{Deserialize, Serialize, ser::Error as _};

use super::ProductError;

/// Full attribute set of a product being created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub price: f64,
    pub stock: i64,
}

impl NewProduct {
    pub fn new(name: impl Into<String>, price: f64, stock: i64) -> Self {
        Self {
            name: name.into(),
            description: None,
            price,
            stock,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Checks every attribute.
    pub fn validate(&self) -> Result<(), ProductError> {
        validate_name(&self.name)?;
        validate_price(self.price)?;
        validate_stock(self.stock)
    }

    /// The event payload: every attribute, `description` only when present.
    pub fn to_attributes(&self) -> serde_json::Result<Attributes> {
        to_attributes(self)
    }
}

/// Partial attribute set of an update. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock: Option<i64>,
}

impl ProductPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn stock(mut self, stock: i64) -> Self {
        self.stock = Some(stock);
        self
    }

    /// True if no field is supplied.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.price.is_none()
            && self.stock.is_none()
    }

    /// Checks the supplied fields only.
    pub fn validate(&self) -> Result<(), ProductError> {
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        if let Some(price) = self.price {
            validate_price(price)?;
        }
        if let Some(stock) = self.stock {
            validate_stock(stock)?;
        }
        Ok(())
    }

    /// The event payload: only the supplied fields.
    pub fn to_attributes(&self) -> serde_json::Result<Attributes> {
        to_attributes(self)
    }
}

fn validate_name(name: &str) -> Result<(), ProductError> {
    if name.trim().is_empty() {
        return Err(ProductError::EmptyName);
    }
    Ok(())
}

fn validate_price(price: f64) -> Result<(), ProductError> {
    if !price.is_finite() || price < 0.0 {
        return Err(ProductError::InvalidPrice { price });
    }
    Ok(())
}

fn validate_stock(stock: i64) -> Result<(), ProductError> {
    if stock < 0 {
        return Err(ProductError::NegativeStock { stock });
    }
    Ok(())
}

fn to_attributes<T: Serialize>(value: &T) -> serde_json::Result<Attributes> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(serde_json::Error::custom(format!(
            "expected an attribute object, got {other}"
        ))),
    }
}
