//! In-process [`DocumentStore`] for tests and runs without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::store::{ensure_id, into_object, Document, DocumentStore, StoreError};
use crate::update::{apply_update, matches};

/// Collections kept in a map of insertion-ordered vectors.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in `collection`.
    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert_one(&self, collection: &str, doc: Value) -> Result<String, StoreError> {
        let mut doc = into_object(doc, "document")?;
        let id = ensure_id(&mut doc);

        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .push(doc);
        Ok(id)
    }

    async fn insert_many(&self, collection: &str, docs: Vec<Value>) -> Result<Vec<String>, StoreError> {
        // Validate everything before touching the collection.
        let mut prepared = Vec::with_capacity(docs.len());
        for doc in docs {
            let mut doc = into_object(doc, "document")?;
            let id = ensure_id(&mut doc);
            prepared.push((id, doc));
        }

        let mut collections = self.collections.write().await;
        let target = collections.entry(collection.to_string()).or_default();
        let mut ids = Vec::with_capacity(prepared.len());
        for (id, doc) in prepared {
            target.push(doc);
            ids.push(id);
        }
        Ok(ids)
    }

    async fn update_one(&self, collection: &str, filter: Value, update: Value) -> Result<bool, StoreError> {
        let filter = into_object(filter, "filter")?;
        let update = into_object(update, "update")?;

        let mut collections = self.collections.write().await;
        let Some(doc) = collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|doc| matches(doc, &filter)))
        else {
            return Ok(false);
        };

        let mut updated = doc.clone();
        apply_update(&mut updated, &update)?;
        *doc = updated;
        Ok(true)
    }

    async fn find(&self, collection: &str, filter: Value) -> Result<Vec<Value>, StoreError> {
        let filter = into_object(filter, "filter")?;

        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| matches(doc, &filter))
                    .map(|doc| Value::Object(doc.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}
