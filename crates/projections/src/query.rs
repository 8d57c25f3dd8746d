use common::AggregateId;

use crate::{ProductDocument, ReadModelStore, Result};

/// Page size used when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Upper bound on a single page.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Read-only access to the product catalog.
///
/// Reads come from the read model only and may lag behind the event store.
#[derive(Clone)]
pub struct ProductQueryService<R> {
    store: R,
}

impl<R: ReadModelStore> ProductQueryService<R> {
    pub fn new(store: R) -> Self {
        Self { store }
    }

    /// Lists products in first-projected order.
    ///
    /// `limit` is clamped to [`MAX_PAGE_SIZE`]; a zero limit yields an empty page.
    #[tracing::instrument(skip(self))]
    pub async fn list(&self, skip: usize, limit: usize) -> Result<Vec<ProductDocument>> {
        let limit = limit.min(MAX_PAGE_SIZE);
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.store.list(skip, limit).await
    }

    /// Fetches one product, `None` if it is unknown or deleted.
    #[tracing::instrument(skip(self, id), fields(%id))]
    pub async fn get(&self, id: &AggregateId) -> Result<Option<ProductDocument>> {
        self.store.get(id).await
    }

    pub async fn count(&self) -> Result<usize> {
        self.store.count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryReadModel;
    use common::Attributes;
    use event_store::Version;

    async fn seeded(count: usize) -> ProductQueryService<InMemoryReadModel> {
        let store = InMemoryReadModel::new();
        for i in 0..count {
            store
                .upsert(
                    ProductDocument::new(AggregateId::from(format!("p-{i}")), Attributes::new()),
                    Version::first(),
                )
                .await
                .unwrap();
        }
        ProductQueryService::new(store)
    }

    fn ids(page: &[ProductDocument]) -> Vec<String> {
        page.iter().map(|d| d.id.to_string()).collect()
    }

    #[tokio::test]
    async fn pages_in_insertion_order() {
        let service = seeded(5).await;

        assert_eq!(ids(&service.list(0, 2).await.unwrap()), vec!["p-0", "p-1"]);
        assert_eq!(ids(&service.list(2, 2).await.unwrap()), vec!["p-2", "p-3"]);
        assert_eq!(ids(&service.list(4, 2).await.unwrap()), vec!["p-4"]);
        assert!(service.list(10, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn zero_limit_is_empty() {
        let service = seeded(3).await;
        assert!(service.list(0, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn limit_is_clamped() {
        let service = seeded(MAX_PAGE_SIZE + 5).await;
        assert_eq!(service.list(0, usize::MAX).await.unwrap().len(), MAX_PAGE_SIZE);
        assert_eq!(service.list(0, DEFAULT_PAGE_SIZE).await.unwrap().len(), DEFAULT_PAGE_SIZE);
    }

    #[tokio::test]
    async fn get_unknown_is_none() {
        let service = seeded(1).await;
        assert!(service.get(&AggregateId::from("p-0")).await.unwrap().is_some());
        assert!(service.get(&AggregateId::from("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unavailable_store_is_an_error() {
        let store = InMemoryReadModel::new();
        store.set_unavailable(true);
        let service = ProductQueryService::new(store);

        assert!(service.list(0, 10).await.is_err());
        assert!(service.get(&AggregateId::from("p-0")).await.is_err());
    }
}
