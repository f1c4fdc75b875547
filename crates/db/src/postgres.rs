//! [`DocumentStore`] backed by the `documents` table.
//!
//! Each document is one JSONB row tagged with its collection. Filters use
//! JSONB containment (`body @> filter`), which for scalar values is the same
//! top-level equality the in-memory store applies. Updates are applied in
//! Rust under a row lock so `$push` and `$set` behave identically in both
//! stores.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;

use crate::store::{ensure_id, into_object, DocumentStore, StoreError};
use crate::update::apply_update;
use crate::DbPool;

/// Postgres document store.
#[derive(Debug, Clone)]
pub struct PgDocumentStore {
    pool: DbPool,
}

impl PgDocumentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn insert_one(&self, collection: &str, doc: Value) -> Result<String, StoreError> {
        let mut doc = into_object(doc, "document")?;
        let id = ensure_id(&mut doc);

        sqlx::query("INSERT INTO documents (id, collection, body) VALUES ($1, $2, $3)")
            .bind(&id)
            .bind(collection)
            .bind(Json(Value::Object(doc)))
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    async fn insert_many(&self, collection: &str, docs: Vec<Value>) -> Result<Vec<String>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(docs.len());

        for doc in docs {
            let mut doc = into_object(doc, "document")?;
            let id = ensure_id(&mut doc);
            sqlx::query("INSERT INTO documents (id, collection, body) VALUES ($1, $2, $3)")
                .bind(&id)
                .bind(collection)
                .bind(Json(Value::Object(doc)))
                .execute(&mut *tx)
                .await?;
            ids.push(id);
        }

        tx.commit().await?;
        tracing::debug!(collection, count = ids.len(), "Inserted documents");
        Ok(ids)
    }

    async fn update_one(&self, collection: &str, filter: Value, update: Value) -> Result<bool, StoreError> {
        let filter = into_object(filter, "filter")?;
        let update = into_object(update, "update")?;

        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, (String, Json<Value>)>(
            "SELECT id, body FROM documents \
             WHERE collection = $1 AND body @> $2 \
             ORDER BY created_at, id \
             LIMIT 1 \
             FOR UPDATE",
        )
        .bind(collection)
        .bind(Json(Value::Object(filter)))
        .fetch_optional(&mut *tx)
        .await?;

        let Some((id, Json(body))) = row else {
            return Ok(false);
        };

        let mut doc = into_object(body, "stored document")?;
        apply_update(&mut doc, &update)?;

        sqlx::query("UPDATE documents SET body = $1, updated_at = now() WHERE id = $2")
            .bind(Json(Value::Object(doc)))
            .bind(&id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn find(&self, collection: &str, filter: Value) -> Result<Vec<Value>, StoreError> {
        let filter = into_object(filter, "filter")?;

        let rows = sqlx::query_as::<_, (Json<Value>,)>(
            "SELECT body FROM documents \
             WHERE collection = $1 AND body @> $2 \
             ORDER BY created_at, id",
        )
        .bind(collection)
        .bind(Json(Value::Object(filter)))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(Json(body),)| body).collect())
    }
}
