//! Task list mirrored from the document store.
//!
//! The cache is a read replica: every mutation is written to the store first
//! and then the whole collection is fetched again. Nothing is applied to the
//! cache optimistically, so a failed write leaves it exactly as it was.

use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::models::{due_date_value, Task, TaskFields};
use crate::schedule::ScheduledTask;
use crate::storage::{DocumentStore, StoreError};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),
}

#[derive(Clone)]
pub struct TaskSync {
    store: Arc<dyn DocumentStore>,
    collection: String,
    cache: Arc<RwLock<Vec<Task>>>,
}

impl TaskSync {
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
            cache: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Snapshot of the cached tasks, in store order
    pub async fn tasks(&self) -> Vec<Task> {
        self.cache.read().await.clone()
    }

    /// Look a task up in the cache
    pub async fn task(&self, id: &str) -> Option<Task> {
        self.cache.read().await.iter().find(|t| t.id == id).cloned()
    }

    /// Fetch the whole collection and replace the cache. Returns the number
    /// of cached tasks. Undecodable records are skipped.
    pub async fn try_refresh(&self) -> Result<usize, SyncError> {
        let documents = self.store.list_all(&self.collection).await?;
        let mut tasks = Vec::with_capacity(documents.len());
        for doc in &documents {
            match Task::from_document(doc) {
                Ok(task) => tasks.push(task),
                Err(e) => warn!(id = %doc.id, "skipping malformed task record: {}", e),
            }
        }

        let count = tasks.len();
        *self.cache.write().await = tasks;
        debug!(collection = %self.collection, count, "task cache refreshed");
        Ok(count)
    }

    /// Like `try_refresh`, but a failure only gets logged and the previous
    /// cache stays in place.
    pub async fn refresh(&self) {
        if let Err(e) = self.try_refresh().await {
            warn!(collection = %self.collection, "refresh failed, keeping cached tasks: {}", e);
        }
    }

    /// Create a task. A blank title is ignored and nothing is written.
    pub async fn create(&self, title: &str, due_date: Option<NaiveDate>) -> Result<Option<String>, SyncError> {
        if title.trim().is_empty() {
            return Ok(None);
        }
        let fields = TaskFields::new(title, due_date).to_fields();
        let id = self.store.create(&self.collection, fields).await?;
        debug!(%id, "task created");
        self.refresh().await;
        Ok(Some(id))
    }

    /// Flip the completed flag of `task` as it was last seen
    pub async fn toggle(&self, task: &Task) -> Result<(), SyncError> {
        let mut fields = Map::new();
        fields.insert("completed".to_string(), Value::Bool(!task.completed));
        self.store.update(&self.collection, &task.id, fields).await?;
        self.refresh().await;
        Ok(())
    }

    /// Replace title and due date. Returns `false` without writing when the
    /// new title is blank.
    pub async fn update(&self, id: &str, title: &str, due_date: Option<NaiveDate>) -> Result<bool, SyncError> {
        let title = title.trim();
        if title.is_empty() {
            return Ok(false);
        }
        let mut fields = Map::new();
        fields.insert("title".to_string(), Value::String(title.to_string()));
        fields.insert("dueDate".to_string(), due_date_value(due_date));
        self.store.update(&self.collection, id, fields).await?;
        self.refresh().await;
        Ok(true)
    }

    pub async fn delete(&self, id: &str) -> Result<(), SyncError> {
        self.store.delete(&self.collection, id).await?;
        self.refresh().await;
        Ok(())
    }

    /// Refresh every `period` until the returned handle is dropped or cancelled
    pub fn start_polling(&self, period: Duration) -> PollingHandle {
        let sync = self.clone();
        let task = ScheduledTask::every("task-polling", period, move || {
            let sync = sync.clone();
            async move { sync.refresh().await }
        });
        PollingHandle { task }
    }
}

/// Keeps the polling loop alive. Dropping it stops polling.
pub struct PollingHandle {
    task: ScheduledTask,
}

impl PollingHandle {
    pub fn is_active(&self) -> bool {
        self.task.is_active()
    }

    pub fn cancel(self) {
        self.task.cancel();
    }
}
