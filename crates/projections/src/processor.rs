//! Replays the event store through projections.
//!
//! The broker only carries events published after a projector subscribed,
//! so a read model that is new, lost or suspect is rebuilt from the store.

use event_store::EventStore;
use futures_util::StreamExt;

use crate::Result;
use crate::projection::Projection;

pub struct ProjectionProcessor<S: EventStore> {
    store: S,
    projections: Vec<Box<dyn Projection>>,
}

impl<S: EventStore> ProjectionProcessor<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            projections: Vec::new(),
        }
    }

    pub fn register(&mut self, projection: Box<dyn Projection>) {
        self.projections.push(projection);
    }

    pub fn projection_count(&self) -> usize {
        self.projections.len()
    }

    /// Streams the whole store and hands each projection the events past its
    /// position. Returns the length of the stream.
    #[tracing::instrument(skip(self), fields(projections = self.projections.len()))]
    pub async fn run_catch_up(&self) -> Result<u64> {
        let mut seen = Vec::with_capacity(self.projections.len());
        for projection in &self.projections {
            seen.push(projection.position().await);
        }
        let mut applied = vec![0u64; self.projections.len()];

        let mut stream = self.store.stream_all_events().await?;
        let mut index: u64 = 0;
        while let Some(event) = stream.next().await {
            let event = event?;
            index += 1;

            for (i, projection) in self.projections.iter().enumerate() {
                if seen[i].has_seen(index) {
                    continue;
                }
                projection.handle(&event).await?;
                applied[i] += 1;
            }
        }

        for (projection, applied) in self.projections.iter().zip(&applied) {
            if *applied > 0 {
                metrics::counter!("projector_events_applied_total", "source" => "replay")
                    .increment(*applied);
            }
            tracing::info!(projection = projection.name(), applied, "projection caught up");
        }
        tracing::debug!(stream_length = index, "catch-up complete");

        Ok(index)
    }

    /// Resets every projection, then replays the store from the beginning.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild_all(&self) -> Result<u64> {
        for projection in &self.projections {
            tracing::info!(projection = projection.name(), "resetting projection");
            projection.reset().await?;
        }
        self.run_catch_up().await
    }
}
