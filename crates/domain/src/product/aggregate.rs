//! Product aggregate implementation.

use common::{AggregateId, Attributes};
use event_store::{Event, EventKind, Version};
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;

/// Lifecycle of a product on the write side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ProductStatus {
    /// No Created event has been seen.
    #[default]
    Absent,
    /// Created and not deleted since.
    Active,
    /// The last lifecycle event was a deletion.
    Deleted,
}

/// Product aggregate root, rebuilt from its event history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    id: Option<AggregateId>,

    #[serde(default)]
    version: Version,

    status: ProductStatus,

    /// Current attributes, as the read model would see them.
    attributes: Attributes,
}

impl Product {
    pub fn status(&self) -> ProductStatus {
        self.status
    }

    /// True if the product exists and has not been deleted.
    pub fn is_live(&self) -> bool {
        self.status == ProductStatus::Active
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn name(&self) -> Option<&str> {
        self.attributes.get("name").and_then(|v| v.as_str())
    }

    pub fn price(&self) -> Option<f64> {
        self.attributes.get("price").and_then(|v| v.as_f64())
    }

    pub fn stock(&self) -> Option<i64> {
        self.attributes.get("stock").and_then(|v| v.as_i64())
    }
}

impl Aggregate for Product {
    fn aggregate_type() -> &'static str {
        "Product"
    }

    fn id(&self) -> Option<&AggregateId> {
        self.id.as_ref()
    }

    fn version(&self) -> Version {
        self.version
    }

    fn apply(&mut self, event: &Event) {
        if self.id.is_none() {
            self.id = Some(event.aggregate_id.clone());
        }
        self.version = event.version;

        match event.event_type {
            EventKind::Created => {
                self.status = ProductStatus::Active;
                self.attributes = event.payload.clone();
            }
            EventKind::Updated => {
                // Mirrors the projection: updates only land on a live product
                if self.status == ProductStatus::Active {
                    for (key, value) in &event.payload {
                        self.attributes.insert(key.clone(), value.clone());
                    }
                }
            }
            EventKind::Deleted => {
                self.status = ProductStatus::Deleted;
                self.attributes.clear();
            }
        }
    }
}
