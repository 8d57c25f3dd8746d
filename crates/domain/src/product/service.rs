//! Product command service: the boundary callers issue commands through.

use std::sync::Arc;

use common::AggregateId;
use event_store::{Event, EventStore, NewEvent, Version};
use messaging::EventPublisher;

use crate::aggregate::Aggregate;
use crate::command::{CommandHandler, CommandOutcome};
use crate::error::{DomainError, Result};

use super::{ExistencePolicy, NewProduct, Product, ProductPatch};

/// Result of a successful create.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedProduct {
    pub aggregate_id: AggregateId,
    pub event: Event,
}

/// Service for product commands.
///
/// Each command appends one event and then publishes it. The append is the
/// commit point: a publish failure is logged and leaves the event in the
/// outbox for the relay, it never fails the command. While older events wait
/// in the outbox, new ones wait behind them.
pub struct ProductCommandService<S: EventStore> {
    handler: CommandHandler<S, Product>,
    publisher: Arc<EventPublisher>,
    policy: ExistencePolicy,
}

impl<S: EventStore> ProductCommandService<S> {
    /// Creates a service with the strict existence policy.
    pub fn new(store: S, publisher: Arc<EventPublisher>) -> Self {
        Self {
            handler: CommandHandler::new(store),
            publisher,
            policy: ExistencePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ExistencePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> ExistencePolicy {
        self.policy
    }

    /// Returns a reference to the underlying event store.
    pub fn store(&self) -> &S {
        self.handler.store()
    }

    /// Creates a product under a freshly generated id.
    #[tracing::instrument(skip(self, product), fields(name = %product.name))]
    pub async fn create(&self, product: NewProduct) -> Result<CreatedProduct> {
        product.validate()?;

        let aggregate_id = AggregateId::new();
        let event = self
            .handler
            .append(
                NewEvent::created(aggregate_id.clone(), product.to_attributes()?),
                Version::initial(),
            )
            .await?;

        metrics::counter!("products_commands_total", "command" => "create").increment(1);
        tracing::info!(%aggregate_id, event_id = %event.event_id, "product created");

        self.publish(&event).await;
        Ok(CreatedProduct {
            aggregate_id,
            event,
        })
    }

    /// Updates the supplied fields of a product.
    ///
    /// An empty patch is a no-op: nothing is appended or published.
    #[tracing::instrument(skip(self, aggregate_id, patch), fields(%aggregate_id))]
    pub async fn update(
        &self,
        aggregate_id: &AggregateId,
        patch: ProductPatch,
    ) -> Result<CommandOutcome> {
        if patch.is_empty() {
            metrics::counter!("products_commands_total", "command" => "update_noop").increment(1);
            tracing::debug!("empty update, nothing to do");
            return Ok(CommandOutcome::NoOp);
        }
        patch.validate()?;

        let expected = self.expected_version(aggregate_id).await?;
        let event = self
            .handler
            .append(
                NewEvent::updated(aggregate_id.clone(), patch.to_attributes()?),
                expected,
            )
            .await?;

        metrics::counter!("products_commands_total", "command" => "update").increment(1);
        tracing::info!(event_id = %event.event_id, version = %event.version, "product updated");

        self.publish(&event).await;
        Ok(CommandOutcome::Applied(event))
    }

    /// Deletes a product.
    #[tracing::instrument(skip(self, aggregate_id), fields(%aggregate_id))]
    pub async fn delete(&self, aggregate_id: &AggregateId) -> Result<Event> {
        let expected = self.expected_version(aggregate_id).await?;
        let event = self
            .handler
            .append(NewEvent::deleted(aggregate_id.clone()), expected)
            .await?;

        metrics::counter!("products_commands_total", "command" => "delete").increment(1);
        tracing::info!(event_id = %event.event_id, version = %event.version, "product deleted");

        self.publish(&event).await;
        Ok(event)
    }

    /// Loads the write-side state of a product.
    ///
    /// Returns None if the product has no history.
    pub async fn get_product(&self, aggregate_id: &AggregateId) -> Result<Option<Product>> {
        self.handler.load_existing(aggregate_id).await
    }

    /// The version the next event must follow, after applying the existence policy.
    async fn expected_version(&self, aggregate_id: &AggregateId) -> Result<Version> {
        let product = self.handler.load(aggregate_id).await?;

        if self.policy == ExistencePolicy::Strict && !product.is_live() {
            return Err(DomainError::AggregateNotFound {
                aggregate_type: Product::aggregate_type(),
                aggregate_id: aggregate_id.to_string(),
            });
        }
        Ok(product.version())
    }

    /// Publishes `event` unless an older outbox entry is still pending.
    ///
    /// Publishing past a pending entry would deliver events out of append
    /// order, so in that case the relay publishes both in order.
    async fn publish(&self, event: &Event) {
        match self.store().pending_publications(1).await {
            Ok(pending) if pending.first().map(|e| e.event_id) == Some(event.event_id) => {}
            Ok(_) => {
                metrics::counter!("products_publish_deferred_total").increment(1);
                tracing::debug!(
                    event_id = %event.event_id,
                    "older events still pending, left for the outbox relay"
                );
                return;
            }
            Err(e) => {
                tracing::warn!(
                    event_id = %event.event_id,
                    error = %e,
                    "could not read the outbox, left for the outbox relay"
                );
                return;
            }
        }

        match self.publisher.publish(event).await {
            Ok(()) => {
                if let Err(e) = self.store().mark_published(&[event.event_id]).await {
                    // The relay republishes it; consumers skip the stale copy
                    tracing::warn!(
                        event_id = %event.event_id,
                        error = %e,
                        "failed to clear outbox entry"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    event_id = %event.event_id,
                    error = %e,
                    "event committed but not published, left for the outbox relay"
                );
            }
        }
    }
}
