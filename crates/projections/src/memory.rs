use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::{AggregateId, Attributes};
use event_store::Version;
use tokio::sync::RwLock;

use crate::{ProductDocument, ProjectionError, ReadModelStore, Result};

struct Entry {
    seq: u64,
    version: Version,
    fields: Attributes,
}

#[derive(Default)]
struct State {
    documents: HashMap<AggregateId, Entry>,
    order: BTreeMap<u64, AggregateId>,
    next_seq: u64,
}

/// In-memory read model for tests and single-process deployments.
///
/// Cloning yields another handle to the same documents.
#[derive(Clone, Default)]
pub struct InMemoryReadModel {
    state: Arc<RwLock<State>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryReadModel {
    /// Creates a new empty read model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent operation fail with [`ProjectionError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ProjectionError::Unavailable(
                "in-memory read model is unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ReadModelStore for InMemoryReadModel {
    async fn upsert(&self, document: ProductDocument, version: Version) -> Result<bool> {
        self.check()?;
        let mut state = self.state.write().await;
        let ProductDocument { id, fields } = document;

        if let Some(entry) = state.documents.get_mut(&id) {
            if entry.version >= version {
                return Ok(false);
            }
            entry.version = version;
            entry.fields = fields;
            return Ok(true);
        }

        state.next_seq += 1;
        let seq = state.next_seq;
        state.order.insert(seq, id.clone());
        state.documents.insert(
            id,
            Entry {
                seq,
                version,
                fields,
            },
        );
        Ok(true)
    }

    async fn merge(
        &self,
        id: &AggregateId,
        fields: &Attributes,
        version: Version,
    ) -> Result<bool> {
        self.check()?;
        let mut state = self.state.write().await;
        let Some(entry) = state.documents.get_mut(id) else {
            return Ok(false);
        };
        if entry.version >= version {
            return Ok(false);
        }
        for (key, value) in fields {
            if key != "id" {
                entry.fields.insert(key.clone(), value.clone());
            }
        }
        entry.version = version;
        Ok(true)
    }

    async fn remove(&self, id: &AggregateId) -> Result<bool> {
        self.check()?;
        let mut state = self.state.write().await;
        match state.documents.remove(id) {
            Some(entry) => {
                state.order.remove(&entry.seq);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get(&self, id: &AggregateId) -> Result<Option<ProductDocument>> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state
            .documents
            .get(id)
            .map(|entry| ProductDocument::new(id.clone(), entry.fields.clone())))
    }

    async fn list(&self, skip: usize, limit: usize) -> Result<Vec<ProductDocument>> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state
            .order
            .values()
            .skip(skip)
            .take(limit)
            .filter_map(|id| {
                state
                    .documents
                    .get(id)
                    .map(|entry| ProductDocument::new(id.clone(), entry.fields.clone()))
            })
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        self.check()?;
        Ok(self.state.read().await.documents.len())
    }

    async fn clear(&self) -> Result<()> {
        self.check()?;
        let mut state = self.state.write().await;
        state.documents.clear();
        state.order.clear();
        Ok(())
    }
}
