use async_trait::async_trait;
use common::{AggregateId, Attributes};
use event_store::Version;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{ProductDocument, ReadModelStore, Result};

/// PostgreSQL-backed read model.
///
/// One row per product in `product_projections`; the attributes live in a
/// JSONB `document` column and updates are merged with `||`. The `version`
/// column guards every write against events the row already reflects.
#[derive(Clone)]
pub struct PostgresReadModel {
    pool: PgPool,
}

impl PostgresReadModel {
    /// Creates a new PostgreSQL read model.
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

    /// Runs the read-model migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        let mut migrator = sqlx::migrate!("../../migrations/read-model");
        // The event store may share this database with its own migration set.
        migrator.set_ignore_missing(true);
        migrator.run(&self.pool).await?;
        Ok(())
    }

    fn row_to_document(row: PgRow) -> Result<ProductDocument> {
        let id: String = row.try_get("id")?;
        let document: serde_json::Value = row.try_get("document")?;
        Ok(ProductDocument::new(
            AggregateId::from(id),
            serde_json::from_value::<Attributes>(document)?,
        ))
    }
}

#[async_trait]
impl ReadModelStore for PostgresReadModel {
    #[tracing::instrument(skip(self, document), fields(id = %document.id, %version))]
    async fn upsert(&self, document: ProductDocument, version: Version) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO product_projections (id, document, version)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
            SET document = EXCLUDED.document, version = EXCLUDED.version, updated_at = now()
            WHERE product_projections.version < EXCLUDED.version
            "#,
        )
        .bind(document.id.as_str())
        .bind(serde_json::Value::Object(document.fields))
        .bind(version.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn merge(
        &self,
        id: &AggregateId,
        fields: &Attributes,
        version: Version,
    ) -> Result<bool> {
        let mut fields = fields.clone();
        fields.remove("id");

        let result = sqlx::query(
            r#"
            UPDATE product_projections
            SET document = document || $2, version = $3, updated_at = now()
            WHERE id = $1 AND version < $3
            "#,
        )
        .bind(id.as_str())
        .bind(serde_json::Value::Object(fields))
        .bind(version.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove(&self, id: &AggregateId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM product_projections WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, id: &AggregateId) -> Result<Option<ProductDocument>> {
        let row = sqlx::query("SELECT id, document FROM product_projections WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_document).transpose()
    }

    async fn list(&self, skip: usize, limit: usize) -> Result<Vec<ProductDocument>> {
        let rows = sqlx::query(
            r#"
            SELECT id, document
            FROM product_projections
            ORDER BY seq ASC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(skip).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_document).collect()
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM product_projections")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM product_projections")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
