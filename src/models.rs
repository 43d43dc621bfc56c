use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::storage::Document;

/// A task as mirrored from the document store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub completed: bool,
    pub due_date: Option<NaiveDate>, // YYYY-MM-DD
}

/// The stored field set of a task record.
///
/// Field names are fixed by the remote schema: `title`, `completed`, `dueDate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFields {
    pub title: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

impl TaskFields {
    pub fn new(title: &str, due_date: Option<NaiveDate>) -> Self {
        Self {
            title: title.trim().to_string(),
            completed: false,
            due_date,
        }
    }

    /// Encode as a document field map. A cleared due date is written as `null`
    /// so a merge-update removes the previous value.
    pub fn to_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("title".to_string(), Value::String(self.title.clone()));
        fields.insert("completed".to_string(), Value::Bool(self.completed));
        fields.insert("dueDate".to_string(), due_date_value(self.due_date));
        fields
    }
}

/// Encode an optional due date the way the store expects it
pub fn due_date_value(due_date: Option<NaiveDate>) -> Value {
    match due_date {
        Some(date) => Value::String(crate::utils::format_date(date)),
        None => Value::Null,
    }
}

impl Task {
    /// Decode a stored document. Returns an error for records without a usable title
    /// or with a malformed due date.
    pub fn from_document(doc: &Document) -> Result<Self, serde_json::Error> {
        let fields: TaskFields = serde_json::from_value(Value::Object(doc.fields.clone()))?;
        if fields.title.trim().is_empty() {
            return Err(serde::de::Error::custom("task title is empty"));
        }
        Ok(Self {
            id: doc.id.clone(),
            title: fields.title,
            completed: fields.completed,
            due_date: fields.due_date,
        })
    }
}

/// The signed-in account as reported by the authentication service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub email: String,
    pub verified: bool,
}
