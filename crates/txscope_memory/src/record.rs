//! Records and the data surface shared by clients, sessions, and the proxy.

use crate::error::MemoryResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Store-wide unique id.
    pub id: u64,
    /// Record payload.
    pub data: Value,
}

impl Record {
    /// Creates a record.
    #[must_use]
    pub fn new(id: u64, data: Value) -> Self {
        Self { id, data }
    }

    /// Returns a top-level field of an object payload.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    /// Returns a top-level string field of an object payload.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(Value::as_str)
    }
}

/// Committed contents of a store: collection name to records by id.
pub(crate) type Collections = BTreeMap<String, BTreeMap<u64, Value>>;

/// Applies `patch` to `data`.
///
/// Object patches are merged field by field into object payloads; any other
/// patch replaces the payload.
pub(crate) fn merge(data: &mut Value, patch: Value) {
    match (data, patch) {
        (Value::Object(fields), Value::Object(changes)) => {
            for (key, value) in changes {
                fields.insert(key, value);
            }
        }
        (data, patch) => *data = patch,
    }
}

/// Record operations available on the raw client, on a session, and on the
/// routing proxy.
///
/// On the raw client each call is its own committed unit. On a session, writes are
/// only visible to that session until it commits.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts a record and returns it with its assigned id.
    async fn insert(&self, collection: &str, data: Value) -> MemoryResult<Record>;

    /// Reads one record.
    async fn get(&self, collection: &str, id: u64) -> MemoryResult<Option<Record>>;

    /// Reads every record of a collection, ordered by id.
    async fn list(&self, collection: &str) -> MemoryResult<Vec<Record>>;

    /// Merges `patch` into a record and returns the result.
    ///
    /// Fails with [`crate::MemoryError::NotFound`] if the record does not exist.
    async fn update(&self, collection: &str, id: u64, patch: Value) -> MemoryResult<Record>;

    /// Deletes a record and returns it.
    ///
    /// Fails with [`crate::MemoryError::NotFound`] if the record does not exist.
    async fn delete(&self, collection: &str, id: u64) -> MemoryResult<Record>;

    /// Deletes every record of a collection and returns how many were removed.
    async fn delete_all(&self, collection: &str) -> MemoryResult<usize>;

    /// Counts the records of a collection.
    async fn count(&self, collection: &str) -> MemoryResult<usize> {
        Ok(self.list(collection).await?.len())
    }
}
