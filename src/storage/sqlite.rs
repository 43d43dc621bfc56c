use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::warn;

use super::{merge_fields, Document, DocumentStore, KeyValueStore, StoreError};
use crate::database::Database;

/// Document store backed by the local SQLite file. Fields are kept as a JSON
/// object per row; ids are random UUIDs.
#[derive(Clone)]
pub struct SqliteDocumentStore {
    db: Database,
}

impl SqliteDocumentStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn timestamp() -> String {
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
    }

    /// Helper function to map a row to a Document
    fn row_to_document(row: &rusqlite::Row) -> Result<(String, String), rusqlite::Error> {
        Ok((row.get(0)?, row.get(1)?))
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn list_all(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, fields FROM documents WHERE collection = ?1 ORDER BY rowid ASC",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![collection], Self::row_to_document)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut documents = Vec::with_capacity(rows.len());
        for (id, raw) in rows {
            match serde_json::from_str::<Map<String, Value>>(&raw) {
                Ok(fields) => documents.push(Document { id, fields }),
                Err(e) => warn!(collection, %id, "skipping unreadable document: {}", e),
            }
        }
        Ok(documents)
    }

    async fn create(&self, collection: &str, fields: Map<String, Value>) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let now = Self::timestamp();
        let raw = serde_json::to_string(&fields)?;

        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO documents (collection, id, fields, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![collection, id, raw, now, now],
        )?;
        Ok(id)
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError> {
        let conn = self.db.lock()?;
        let existing: Option<String> = conn
            .query_row(
                "SELECT fields FROM documents WHERE collection = ?1 AND id = ?2",
                rusqlite::params![collection, id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let Some(raw) = existing else {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        };

        let mut merged: Map<String, Value> = serde_json::from_str(&raw)?;
        merge_fields(&mut merged, fields);

        conn.execute(
            "UPDATE documents SET fields = ?1, updated_at = ?2 WHERE collection = ?3 AND id = ?4",
            rusqlite::params![serde_json::to_string(&merged)?, Self::timestamp(), collection, id],
        )?;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let conn = self.db.lock()?;
        conn.execute(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
            rusqlite::params![collection, id],
        )?;
        Ok(())
    }
}

/// Key-value store kept in the `kv` table of the local database.
#[derive(Clone)]
pub struct SqliteKeyValueStore {
    db: Database,
}

impl SqliteKeyValueStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.db.lock()?;
        match conn.query_row(
            "SELECT value FROM kv WHERE key = ?1",
            rusqlite::params![key],
            |row| row.get(0),
        ) {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.db.lock()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", rusqlite::params![key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn documents_list_in_creation_order() {
        let store = SqliteDocumentStore::new(Database::open_in_memory().unwrap());
        let first = store.create("tasks", fields(json!({"title": "a"}))).await.unwrap();
        let second = store.create("tasks", fields(json!({"title": "b"}))).await.unwrap();
        store.create("other", fields(json!({"title": "c"}))).await.unwrap();

        let docs = store.list_all("tasks").await.unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[tokio::test]
    async fn update_merges_and_requires_existing_document() {
        let store = SqliteDocumentStore::new(Database::open_in_memory().unwrap());
        let id = store
            .create("tasks", fields(json!({"title": "a", "completed": false})))
            .await
            .unwrap();

        store.update("tasks", &id, fields(json!({"completed": true}))).await.unwrap();
        let docs = store.list_all("tasks").await.unwrap();
        assert_eq!(docs[0].fields["title"], json!("a"));
        assert_eq!(docs[0].fields["completed"], json!(true));

        let missing = store.update("tasks", "nope", fields(json!({"completed": true}))).await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = SqliteDocumentStore::new(Database::open_in_memory().unwrap());
        let id = store.create("tasks", fields(json!({"title": "a"}))).await.unwrap();
        store.delete("tasks", &id).await.unwrap();
        store.delete("tasks", &id).await.unwrap();
        assert!(store.list_all("tasks").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreadable_rows_are_skipped() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteDocumentStore::new(db.clone());
        store.create("tasks", fields(json!({"title": "before"}))).await.unwrap();
        db.lock()
            .unwrap()
            .execute(
                "INSERT INTO documents (collection, id, fields, created_at, updated_at)
                 VALUES ('tasks', 'broken', 'not json', '', '')",
                [],
            )
            .unwrap();
        store.create("tasks", fields(json!({"title": "after"}))).await.unwrap();

        let docs = store.list_all("tasks").await.unwrap();
        let titles: Vec<_> = docs.iter().map(|d| d.fields["title"].clone()).collect();
        assert_eq!(titles, vec![json!("before"), json!("after")]);
    }

    #[test]
    fn kv_set_overwrites_and_remove_clears() {
        let kv = SqliteKeyValueStore::new(Database::open_in_memory().unwrap());
        assert_eq!(kv.get("loginAttempts").unwrap(), None);
        kv.set("loginAttempts", "1").unwrap();
        kv.set("loginAttempts", "2").unwrap();
        assert_eq!(kv.get("loginAttempts").unwrap().as_deref(), Some("2"));
        kv.remove("loginAttempts").unwrap();
        assert_eq!(kv.get("loginAttempts").unwrap(), None);
    }
}
