//! The document store trait and its error type.

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Key every stored document is identified by.
pub const ID_FIELD: &str = "_id";

/// A JSON object as stored.
pub type Document = Map<String, Value>;

/// Errors from any [`DocumentStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A document, filter or update was not a JSON object.
    #[error("{0} must be a JSON object")]
    NotAnObject(&'static str),

    #[error("Invalid update: {0}")]
    InvalidUpdate(String),
}

/// Collection-oriented storage for JSON documents.
///
/// Filters are JSON objects matched by top-level key equality. Updates are
/// JSON objects whose plain keys overwrite fields, with `$set` and `$push`
/// operators; see [`crate::update`].
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert one document and return its id. An `_id` is assigned when the
    /// document has none.
    async fn insert_one(&self, collection: &str, doc: Value) -> Result<String, StoreError>;

    /// Insert several documents atomically, returning their ids in order.
    async fn insert_many(&self, collection: &str, docs: Vec<Value>) -> Result<Vec<String>, StoreError>;

    /// Apply `update` to the first document matching `filter`, oldest first.
    ///
    /// Returns `false` when nothing matched.
    async fn update_one(&self, collection: &str, filter: Value, update: Value) -> Result<bool, StoreError>;

    /// All documents matching `filter`, in insertion order.
    async fn find(&self, collection: &str, filter: Value) -> Result<Vec<Value>, StoreError>;
}

/// Unwrap a JSON object, naming `what` in the error otherwise.
pub fn into_object(value: Value, what: &'static str) -> Result<Document, StoreError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::NotAnObject(what)),
    }
}

/// Return the document's id, assigning a fresh one when missing.
///
/// Non-string ids are kept in their JSON text form.
pub fn ensure_id(doc: &mut Document) -> String {
    match doc.get(ID_FIELD) {
        Some(Value::String(id)) => id.clone(),
        Some(other) => other.to_string(),
        None => {
            let id = Uuid::now_v7().to_string();
            doc.insert(ID_FIELD.to_string(), Value::String(id.clone()));
            id
        }
    }
}
