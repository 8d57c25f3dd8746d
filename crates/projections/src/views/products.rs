//! Product catalog view: one document per live product.

use std::sync::Arc;

use async_trait::async_trait;
use event_store::{Event, EventKind};
use tokio::sync::RwLock;

use crate::Result;
use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::{ProductDocument, ReadModelStore};

/// What applying one event did to the read model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionOutcome {
    /// Created: the document was inserted or replaced.
    Upserted,
    /// Updated: fields were merged into an existing document.
    Merged,
    /// Deleted: the document was removed.
    Removed,
    /// Updated or Deleted for a document that does not exist, or an event
    /// the document already reflects.
    Skipped,
}

impl ProjectionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectionOutcome::Upserted => "upserted",
            ProjectionOutcome::Merged => "merged",
            ProjectionOutcome::Removed => "removed",
            ProjectionOutcome::Skipped => "skipped",
        }
    }
}

/// Folds product events into a [`ReadModelStore`].
///
/// - Created inserts the whole document
/// - Updated merges into the existing document and is a no-op if there is none
/// - Deleted removes the document and is a no-op if there is none
///
/// Created and Updated carry the event version to the store, which ignores
/// them once the document is at that version or later. A redelivered event
/// therefore neither duplicates a document nor rolls it back.
#[derive(Clone)]
pub struct ProductProjection<R> {
    store: R,
    position: Arc<RwLock<ProjectionPosition>>,
}

impl<R: ReadModelStore> ProductProjection<R> {
    pub fn new(store: R) -> Self {
        Self {
            store,
            position: Arc::new(RwLock::new(ProjectionPosition::start())),
        }
    }

    /// Returns the read model this projection writes to.
    pub fn store(&self) -> &R {
        &self.store
    }

    /// Applies one event to the read model.
    pub async fn apply(&self, event: &Event) -> Result<ProjectionOutcome> {
        let id = &event.aggregate_id;

        let outcome = match event.event_type {
            EventKind::Created => {
                let document = ProductDocument::new(id.clone(), event.payload.clone());
                if self.store.upsert(document, event.version).await? {
                    ProjectionOutcome::Upserted
                } else {
                    ProjectionOutcome::Skipped
                }
            }
            EventKind::Updated => {
                if self.store.merge(id, &event.payload, event.version).await? {
                    ProjectionOutcome::Merged
                } else {
                    ProjectionOutcome::Skipped
                }
            }
            EventKind::Deleted => {
                if self.store.remove(id).await? {
                    ProjectionOutcome::Removed
                } else {
                    ProjectionOutcome::Skipped
                }
            }
        };

        tracing::debug!(
            aggregate_id = %id,
            event_type = %event.event_type,
            version = %event.version,
            outcome = outcome.as_str(),
            "event projected"
        );
        Ok(outcome)
    }
}

#[async_trait]
impl<R: ReadModelStore> Projection for ProductProjection<R> {
    fn name(&self) -> &'static str {
        "ProductProjection"
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        self.apply(event).await?;
        let mut pos = self.position.write().await;
        *pos = pos.after(event);
        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        *self.position.read().await
    }

    async fn reset(&self) -> Result<()> {
        self.store.clear().await?;
        *self.position.write().await = ProjectionPosition::start();
        Ok(())
    }
}
