use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, Attributes, Event, EventId, EventQuery, EventStoreError, NewEvent, Result,
    Version,
    store::{AppendOptions, EventStore, EventStream},
};

const EVENT_COLUMNS: &str = "id, aggregate_id, event_type, version, payload, created_at";

/// PostgreSQL-backed event store implementation.
///
/// Events live in `product_events`; every append also inserts a row into
/// `product_event_outbox` inside the same transaction.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Creates a new PostgreSQL event store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to the given database URL and wraps the pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the event store migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        let mut migrator = sqlx::migrate!("../../migrations/event-store");
        // The read model may share this database with its own migration set.
        migrator.set_ignore_missing(true);
        migrator.run(&self.pool).await?;
        Ok(())
    }

    fn row_to_event(row: PgRow) -> Result<Event> {
        let event_type: String = row.try_get("event_type")?;
        let payload: serde_json::Value = row.try_get("payload")?;

        Ok(Event {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            aggregate_id: AggregateId::from(row.try_get::<String, _>("aggregate_id")?),
            event_type: event_type.parse()?,
            version: Version::new(row.try_get("version")?),
            payload: serde_json::from_value::<Attributes>(payload)?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[tracing::instrument(
        skip(self, event),
        fields(aggregate_id = %event.aggregate_id, event_type = %event.event_type)
    )]
    async fn append(&self, event: NewEvent, options: AppendOptions) -> Result<Event> {
        let aggregate_id = event.aggregate_id;

        let mut tx = self.pool.begin().await?;

        // Serialize writers of the same aggregate for the rest of the transaction
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(aggregate_id.as_str())
            .execute(&mut *tx)
            .await?;

        let current: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) FROM product_events WHERE aggregate_id = $1",
        )
        .bind(aggregate_id.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let actual = Version::new(current);

        if let Some(expected) = options.expected_version
            && actual != expected
        {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual,
            });
        }

        let event_id = EventId::new();
        let version = actual.next();

        let created_at: DateTime<Utc> = sqlx::query_scalar(
            r#"
            INSERT INTO product_events (id, aggregate_id, event_type, version, payload)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING created_at
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(aggregate_id.as_str())
        .bind(event.event_type.as_str())
        .bind(version.as_i64())
        .bind(serde_json::Value::Object(event.payload.clone()))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_aggregate_version")
            {
                return EventStoreError::ConcurrencyConflict {
                    aggregate_id: aggregate_id.clone(),
                    expected: options.expected_version.unwrap_or(actual),
                    actual: version,
                };
            }
            EventStoreError::Database(e)
        })?;

        sqlx::query("INSERT INTO product_event_outbox (event_id) VALUES ($1)")
            .bind(event_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        metrics::counter!("event_store_appends_total").increment(1);

        Ok(Event {
            event_id,
            aggregate_id,
            event_type: event.event_type,
            version,
            payload: event.payload,
            created_at,
        })
    }

    async fn get_events_for_aggregate(&self, aggregate_id: &AggregateId) -> Result<Vec<Event>> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM product_events WHERE aggregate_id = $1 ORDER BY version ASC"
        ))
        .bind(aggregate_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<Event>> {
        let mut sql = format!("SELECT {EVENT_COLUMNS} FROM product_events WHERE 1=1");
        let mut param_count = 0;

        // Build dynamic query
        if query.aggregate_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND aggregate_id = ${param_count}"));
        }
        if query.event_types.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND event_type = ANY(${param_count})"));
        }
        if query.from_timestamp.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND created_at >= ${param_count}"));
        }
        if query.to_timestamp.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND created_at <= ${param_count}"));
        }

        sql.push_str(" ORDER BY position ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(id) = query.aggregate_id {
            sqlx_query = sqlx_query.bind(id.into_inner());
        }
        if let Some(kinds) = query.event_types {
            let names: Vec<String> = kinds.iter().map(|k| k.as_str().to_string()).collect();
            sqlx_query = sqlx_query.bind(names);
        }
        if let Some(from_ts) = query.from_timestamp {
            sqlx_query = sqlx_query.bind(from_ts);
        }
        if let Some(to_ts) = query.to_timestamp {
            sqlx_query = sqlx_query.bind(to_ts);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(i64::try_from(offset).unwrap_or(i64::MAX));
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        use futures_util::StreamExt;

        let stream = sqlx::query(
            r#"
            SELECT id, aggregate_id, event_type, version, payload, created_at
            FROM product_events
            ORDER BY position ASC
            "#,
        )
        .fetch(&self.pool)
        .map(|result| match result {
            Ok(row) => Self::row_to_event(row),
            Err(e) => Err(EventStoreError::Database(e)),
        });

        Ok(Box::pin(stream))
    }

    async fn get_aggregate_version(&self, aggregate_id: &AggregateId) -> Result<Option<Version>> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM product_events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(version.map(Version::new))
    }

    async fn pending_publications(&self, limit: usize) -> Result<Vec<Event>> {
        let rows = sqlx::query(
            r#"
            SELECT e.id, e.aggregate_id, e.event_type, e.version, e.payload, e.created_at
            FROM product_event_outbox o
            JOIN product_events e ON e.id = o.event_id
            ORDER BY e.position ASC
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn mark_published(&self, event_ids: &[EventId]) -> Result<()> {
        if event_ids.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = event_ids.iter().map(EventId::as_uuid).collect();

        sqlx::query("DELETE FROM product_event_outbox WHERE event_id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
