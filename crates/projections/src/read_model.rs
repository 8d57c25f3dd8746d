//! Read model contract for the product query side.

use std::sync::Arc;

use async_trait::async_trait;
use common::{AggregateId, Attributes};
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Denormalized current state of one product: its id plus the merged
/// attributes of every event applied since its creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDocument {
    pub id: AggregateId,
    #[serde(flatten)]
    pub fields: Attributes,
}

impl ProductDocument {
    /// Builds a document, dropping any `id` key from the fields so the
    /// document id always wins.
    pub fn new(id: AggregateId, mut fields: Attributes) -> Self {
        fields.remove("id");
        Self { id, fields }
    }

    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.fields.get(field)
    }

    /// Overwrites the given fields, leaving the others untouched.
    pub fn merge(&mut self, fields: &Attributes) {
        for (key, value) in fields {
            if key != "id" {
                self.fields.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Storage for product documents.
///
/// Listing order is stable: first insertion order of each id. Replacing a
/// document through [`upsert`](ReadModelStore::upsert) keeps its place.
///
/// Every document remembers the version of the last event written to it.
/// Writes carrying a version that is not newer are ignored, so a redelivered
/// or late event cannot roll a document back.
#[async_trait]
pub trait ReadModelStore: Send + Sync {
    /// Inserts a document at `version`, or replaces an older one with the
    /// same id. Returns false if the stored document is not older.
    async fn upsert(&self, document: ProductDocument, version: Version) -> Result<bool>;

    /// Merges fields into an existing document older than `version` and
    /// moves it to `version`. Returns false if absent or not older.
    async fn merge(
        &self,
        id: &AggregateId,
        fields: &Attributes,
        version: Version,
    ) -> Result<bool>;

    /// Removes a document. Returns false if absent.
    async fn remove(&self, id: &AggregateId) -> Result<bool>;

    async fn get(&self, id: &AggregateId) -> Result<Option<ProductDocument>>;

    /// Returns up to `limit` documents after skipping `skip`, in insertion order.
    async fn list(&self, skip: usize, limit: usize) -> Result<Vec<ProductDocument>>;

    async fn count(&self) -> Result<usize>;

    /// Removes every document.
    async fn clear(&self) -> Result<()>;
}

#[async_trait]
impl<T: ReadModelStore + ?Sized> ReadModelStore for Arc<T> {
    async fn upsert(&self, document: ProductDocument, version: Version) -> Result<bool> {
        (**self).upsert(document, version).await
    }

    async fn merge(
        &self,
        id: &AggregateId,
        fields: &Attributes,
        version: Version,
    ) -> Result<bool> {
        (**self).merge(id, fields, version).await
    }

    async fn remove(&self, id: &AggregateId) -> Result<bool> {
        (**self).remove(id).await
    }

    async fn get(&self, id: &AggregateId) -> Result<Option<ProductDocument>> {
        (**self).get(id).await
    }

    async fn list(&self, skip: usize, limit: usize) -> Result<Vec<ProductDocument>> {
        (**self).list(skip, limit).await
    }

    async fn count(&self) -> Result<usize> {
        (**self).count().await
    }

    async fn clear(&self) -> Result<()> {
        (**self).clear().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: serde_json::Value) -> Attributes {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn serializes_flat_with_id() {
        let doc = ProductDocument::new(
            AggregateId::from("p-1"),
            attrs(json!({"name": "X", "price": 9.99, "stock": 10})),
        );

        assert_eq!(
            serde_json::to_value(&doc).unwrap(),
            json!({"id": "p-1", "name": "X", "price": 9.99, "stock": 10})
        );
    }

    #[test]
    fn payload_cannot_override_id() {
        let doc = ProductDocument::new(AggregateId::from("p-1"), attrs(json!({"id": "other"})));
        assert_eq!(doc.id.as_str(), "p-1");
        assert!(doc.fields.is_empty());

        let mut doc = doc;
        doc.merge(&attrs(json!({"id": "other", "stock": 2})));
        assert_eq!(doc.id.as_str(), "p-1");
        assert_eq!(doc.get("stock"), Some(&json!(2)));
        assert_eq!(doc.get("id"), None);
    }

    #[test]
    fn deserializes_flat_document() {
        let doc: ProductDocument =
            serde_json::from_value(json!({"id": "p-2", "name": "Lamp"})).unwrap();
        assert_eq!(doc.id.as_str(), "p-2");
        assert_eq!(doc.get("name"), Some(&json!("Lamp")));
    }
}
