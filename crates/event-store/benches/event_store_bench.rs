use common::{AggregateId, Attributes};
use criterion::{Criterion, criterion_group, criterion_main};
use event_store::{AppendOptions, EventStore, InMemoryEventStore, NewEvent};

fn product_payload() -> Attributes {
    match serde_json::json!({
        "name": "Desk Lamp",
        "description": "Warm white LED",
        "price": 39.9,
        "stock": 120
    }) {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    }
}

fn bench_append_created(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/append_created", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                store
                    .append(
                        NewEvent::created(AggregateId::new(), product_payload()),
                        AppendOptions::expect_new(),
                    )
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_append_with_version_check(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    let agg_id = AggregateId::new();

    let mut version = rt.block_on(async {
        store
            .append(
                NewEvent::created(agg_id.clone(), product_payload()),
                AppendOptions::expect_new(),
            )
            .await
            .unwrap()
            .version
    });

    c.bench_function("event_store/append_updated_with_version_check", |b| {
        b.iter(|| {
            version = rt.block_on(async {
                let mut patch = Attributes::new();
                patch.insert("stock".into(), serde_json::json!(7));
                store
                    .append(
                        NewEvent::updated(agg_id.clone(), patch),
                        AppendOptions::expect_version(version),
                    )
                    .await
                    .unwrap()
                    .version
            });
        });
    });
}

fn bench_get_events_for_aggregate(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    let agg_id = AggregateId::new();

    // Pre-populate with 100 events
    rt.block_on(async {
        store
            .append(
                NewEvent::created(agg_id.clone(), product_payload()),
                AppendOptions::new(),
            )
            .await
            .unwrap();
        for _ in 1..100 {
            store
                .append(
                    NewEvent::updated(agg_id.clone(), product_payload()),
                    AppendOptions::new(),
                )
                .await
                .unwrap();
        }
    });

    c.bench_function("event_store/get_events_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.get_events_for_aggregate(&agg_id).await.unwrap();
            });
        });
    });
}

fn bench_stream_all_events(c: &mut Criterion) {
    use futures_util::StreamExt;

    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();

    // Pre-populate with 1000 created events
    rt.block_on(async {
        for _ in 0..1000 {
            store
                .append(
                    NewEvent::created(AggregateId::new(), product_payload()),
                    AppendOptions::new(),
                )
                .await
                .unwrap();
        }
    });

    c.bench_function("event_store/stream_1000_events", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut stream = store.stream_all_events().await.unwrap();
                let mut count = 0;
                while let Some(result) = stream.next().await {
                    result.unwrap();
                    count += 1;
                }
                assert_eq!(count, 1000);
            });
        });
    });
}

fn bench_outbox_drain(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/outbox_drain_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                for _ in 0..100 {
                    store
                        .append(
                            NewEvent::created(AggregateId::new(), product_payload()),
                            AppendOptions::new(),
                        )
                        .await
                        .unwrap();
                }
                let pending = store.pending_publications(100).await.unwrap();
                let ids: Vec<_> = pending.iter().map(|e| e.event_id).collect();
                store.mark_published(&ids).await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_append_created,
    bench_append_with_version_check,
    bench_get_events_for_aggregate,
    bench_stream_all_events,
    bench_outbox_drain,
);
criterion_main!(benches);
