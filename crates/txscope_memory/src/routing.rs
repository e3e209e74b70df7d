//! Record operations through the routing proxy.

use crate::error::MemoryResult;
use crate::record::{Record, RecordStore};
use crate::store::MemoryClient;
use async_trait::async_trait;
use serde_json::Value;
use txscope_core::{Target, TxClient};

#[async_trait]
impl RecordStore for TxClient<MemoryClient> {
    async fn insert(&self, collection: &str, data: Value) -> MemoryResult<Record> {
        match self.target() {
            Target::Root(client) => client.insert(collection, data).await,
            Target::Session(session) => session.insert(collection, data).await,
        }
    }

    async fn get(&self, collection: &str, id: u64) -> MemoryResult<Option<Record>> {
        match self.target() {
            Target::Root(client) => client.get(collection, id).await,
            Target::Session(session) => session.get(collection, id).await,
        }
    }

    async fn list(&self, collection: &str) -> MemoryResult<Vec<Record>> {
        match self.target() {
            Target::Root(client) => client.list(collection).await,
            Target::Session(session) => session.list(collection).await,
        }
    }

    async fn update(&self, collection: &str, id: u64, patch: Value) -> MemoryResult<Record> {
        match self.target() {
            Target::Root(client) => client.update(collection, id, patch).await,
            Target::Session(session) => session.update(collection, id, patch).await,
        }
    }

    async fn delete(&self, collection: &str, id: u64) -> MemoryResult<Record> {
        match self.target() {
            Target::Root(client) => client.delete(collection, id).await,
            Target::Session(session) => session.delete(collection, id).await,
        }
    }

    async fn delete_all(&self, collection: &str) -> MemoryResult<usize> {
        match self.target() {
            Target::Root(client) => client.delete_all(collection).await,
            Target::Session(session) => session.delete_all(collection).await,
        }
    }

    async fn count(&self, collection: &str) -> MemoryResult<usize> {
        match self.target() {
            Target::Root(client) => client.count(collection).await,
            Target::Session(session) => session.count(collection).await,
        }
    }
}
