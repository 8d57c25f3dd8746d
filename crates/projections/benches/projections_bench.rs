use common::{AggregateId, Attributes};
use criterion::{Criterion, criterion_group, criterion_main};
use event_store::{AppendOptions, EventStore, InMemoryEventStore, NewEvent, Version};
use projections::{
    DEFAULT_PAGE_SIZE, InMemoryReadModel, ProductProjection, ProductQueryService, Projection,
    ProjectionProcessor,
};
use serde_json::json;

use std::sync::Arc;

fn attrs(value: serde_json::Value) -> Attributes {
    serde_json::from_value(value).unwrap()
}

/// Populate a store with N products, each having 3 events (created + 2 updates).
async fn populate_store(store: &InMemoryEventStore, n: usize) {
    for i in 0..n {
        let id = AggregateId::new();
        store
            .append(
                NewEvent::created(
                    id.clone(),
                    attrs(json!({"name": format!("item-{i}"), "price": 9.99, "stock": 10})),
                ),
                AppendOptions::expect_new(),
            )
            .await
            .unwrap();
        store
            .append(
                NewEvent::updated(id.clone(), attrs(json!({"stock": 7}))),
                AppendOptions::new(),
            )
            .await
            .unwrap();
        store
            .append(
                NewEvent::updated(id, attrs(json!({"price": 8.49}))),
                AppendOptions::new(),
            )
            .await
            .unwrap();
    }
}

fn bench_catch_up_100_products(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();

    rt.block_on(populate_store(&store, 100));

    c.bench_function("projections/catch_up_300_events", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut processor = ProjectionProcessor::new(store.clone());
                processor.register(Box::new(ProductProjection::new(InMemoryReadModel::new()))
                    as Box<dyn Projection>);
                processor.run_catch_up().await.unwrap();
            });
        });
    });
}

fn bench_apply_created(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let projection = ProductProjection::new(InMemoryReadModel::new());

    c.bench_function("projections/apply_created", |b| {
        b.iter(|| {
            rt.block_on(async {
                let event = NewEvent::created(
                    AggregateId::new(),
                    attrs(json!({"name": "Widget", "price": 9.99, "stock": 10})),
                )
                .commit(Version::first(), chrono::Utc::now());
                projection.apply(&event).await.unwrap();
            });
        });
    });
}

fn bench_apply_updated(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let projection = ProductProjection::new(InMemoryReadModel::new());
    let id = AggregateId::new();
    rt.block_on(async {
        let created = NewEvent::created(id.clone(), attrs(json!({"name": "Widget", "stock": 10})))
            .commit(Version::first(), chrono::Utc::now());
        projection.apply(&created).await.unwrap();
    });
    let mut version = 1;

    c.bench_function("projections/apply_updated", |b| {
        b.iter(|| {
            version += 1;
            let updated = NewEvent::updated(id.clone(), attrs(json!({"stock": version})))
                .commit(Version::new(version), chrono::Utc::now());
            rt.block_on(async {
                projection.apply(&updated).await.unwrap();
            });
        });
    });
}

fn bench_list_first_page(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    let read_model = InMemoryReadModel::new();

    rt.block_on(async {
        populate_store(&store, 1000).await;
        let mut processor = ProjectionProcessor::new(store);
        processor.register(Box::new(ProductProjection::new(read_model.clone())));
        processor.run_catch_up().await.unwrap();
    });
    let query = ProductQueryService::new(read_model);

    c.bench_function("projections/list_first_page_of_1000", |b| {
        b.iter(|| {
            rt.block_on(async {
                query.list(0, DEFAULT_PAGE_SIZE).await.unwrap();
            });
        });
    });
}

fn bench_rebuild_100_products(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();

    rt.block_on(populate_store(&store, 100));

    let mut processor = ProjectionProcessor::new(store);
    processor.register(Box::new(ProductProjection::new(InMemoryReadModel::new())));
    let processor = Arc::new(processor);

    c.bench_function("projections/rebuild_300_events", |b| {
        b.iter(|| {
            rt.block_on(async {
                processor.rebuild_all().await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_catch_up_100_products,
    bench_apply_created,
    bench_apply_updated,
    bench_list_first_page,
    bench_rebuild_100_products,
);
criterion_main!(benches);
