//! Storage collaborators: a schema-flexible document store addressed by
//! collection and record id, and a small durable key-value store.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::database::DatabaseError;

pub use memory::{MemoryDocumentStore, MemoryKeyValueStore};
pub use sqlite::{SqliteDocumentStore, SqliteKeyValueStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),
    #[error("Failed to encode or decode fields: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("No document '{id}' in collection '{collection}'")]
    NotFound { collection: String, id: String },
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// A stored record: its id plus a JSON object of fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Map<String, Value>,
}

/// Remote document store contract. No transactions and no query filters;
/// readers always list the full collection.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// List every document of a collection in creation order
    async fn list_all(&self, collection: &str) -> Result<Vec<Document>, StoreError>;

    /// Create a document and return the id assigned to it
    async fn create(&self, collection: &str, fields: Map<String, Value>) -> Result<String, StoreError>;

    /// Merge `fields` into an existing document
    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError>;

    /// Delete a document. Deleting a missing id is not an error.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;
}

/// Durable string key-value storage, used for the lockout scalars and the
/// local session.
pub trait KeyValueStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Merge `updates` into `target`, overwriting keys that already exist
pub(crate) fn merge_fields(target: &mut Map<String, Value>, updates: Map<String, Value>) {
    for (key, value) in updates {
        target.insert(key, value);
    }
}
