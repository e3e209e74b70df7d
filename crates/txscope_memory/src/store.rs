//! The in-memory client and its committed state.

use crate::error::{MemoryError, MemoryResult};
use crate::record::{merge, Collections, Record, RecordStore};
use crate::session::{MemorySession, PendingWrite, PendingWrites};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use txscope_core::{BatchClient, IsolationLevel, TransactionalClient, TxOptions};

/// Session counters of a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Sessions opened.
    pub begun: u64,
    /// Sessions committed.
    pub committed: u64,
    /// Sessions rolled back.
    pub rolled_back: u64,
    /// Sessions aborted by their timeout.
    pub expired: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    begun: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    expired: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_begin(&self) {
        self.begun.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rollback(&self) {
        self.rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_expiry(&self) {
        self.expired.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> MemoryStats {
        MemoryStats {
            begun: self.begun.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }
}

pub(crate) struct StoreInner {
    committed: RwLock<Collections>,
    /// Record ids are never reused, including ids of rolled back inserts.
    next_id: AtomicU64,
    next_txid: AtomicU64,
    /// Serializable sessions hold this for their whole lifetime.
    writer: Arc<tokio::sync::Mutex<()>>,
    pub(crate) stats: StatsCounters,
}

impl StoreInner {
    fn new() -> Self {
        Self {
            committed: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            next_txid: AtomicU64::new(1),
            writer: Arc::new(tokio::sync::Mutex::new(())),
            stats: StatsCounters::default(),
        }
    }

    pub(crate) fn next_record_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn snapshot(&self) -> Collections {
        self.committed.read().clone()
    }

    pub(crate) fn committed_get(&self, collection: &str, id: u64) -> Option<Value> {
        self.committed.read().get(collection)?.get(&id).cloned()
    }

    pub(crate) fn committed_collection(&self, collection: &str) -> BTreeMap<u64, Value> {
        self.committed
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Applies a session's writes atomically. Last writer wins.
    pub(crate) fn apply(&self, writes: PendingWrites) {
        let mut committed = self.committed.write();
        for ((collection, id), write) in writes {
            match write {
                PendingWrite::Insert(value) | PendingWrite::Update(value) => {
                    committed.entry(collection).or_default().insert(id, value);
                }
                PendingWrite::Delete => {
                    if let Some(records) = committed.get_mut(&collection) {
                        records.remove(&id);
                    }
                }
            }
        }
    }
}

/// One operation of a batched transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BatchOp {
    /// Insert a record.
    Insert {
        /// Target collection.
        collection: String,
        /// Record payload.
        data: Value,
    },
    /// Merge a patch into a record.
    Update {
        /// Target collection.
        collection: String,
        /// Record id.
        id: u64,
        /// Fields to merge.
        patch: Value,
    },
    /// Delete a record.
    Delete {
        /// Target collection.
        collection: String,
        /// Record id.
        id: u64,
    },
}

/// A transactional record store held in memory.
///
/// Cloning is cheap; clones share the same data.
///
/// # Isolation
///
/// - Without a level, `ReadUncommitted` and `ReadCommitted`, a session reads the
///   latest committed data plus its own writes.
/// - `RepeatableRead` and `Snapshot` sessions read the data committed when they
///   began plus their own writes.
/// - `Serializable` sessions additionally hold the store's writer lock until they
///   end, so at most one runs at a time. A session waits at most
///   [`TxOptions::max_wait`] for the lock.
///
/// Calls made directly on the client are autocommitted one by one and never wait
/// for the writer lock.
#[derive(Clone)]
pub struct MemoryClient {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for MemoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryClient")
            .field("collections", &self.inner.committed.read().len())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryClient {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner::new()),
        }
    }

    /// Returns the session counters.
    pub fn stats(&self) -> MemoryStats {
        self.inner.stats.snapshot()
    }

    /// Returns the names of collections that have ever held committed data.
    pub fn collections(&self) -> Vec<String> {
        self.inner.committed.read().keys().cloned().collect()
    }

    /// Runs `f` against the committed state under the write lock.
    fn write_committed<R>(
        &self,
        f: impl FnOnce(&mut Collections) -> MemoryResult<R>,
    ) -> MemoryResult<R> {
        let mut committed = self.inner.committed.write();
        f(&mut *committed)
    }
}

#[async_trait]
impl TransactionalClient for MemoryClient {
    type Session = MemorySession;
    type Error = MemoryError;

    async fn begin(&self, options: &TxOptions) -> MemoryResult<MemorySession> {
        let writer = match options.isolation_level {
            Some(IsolationLevel::Serializable) => {
                let lock = Arc::clone(&self.inner.writer).lock_owned();
                let guard = tokio::time::timeout(options.max_wait, lock)
                    .await
                    .map_err(|_| MemoryError::LockTimeout {
                        max_wait: options.max_wait,
                    })?;
                Some(guard)
            }
            _ => None,
        };
        let txid = self.inner.next_txid.fetch_add(1, Ordering::SeqCst);
        self.inner.stats.record_begin();
        tracing::debug!(txid, isolation = ?options.isolation_level, "session opened");
        Ok(MemorySession::open(
            txid,
            Arc::clone(&self.inner),
            options.clone(),
            writer,
        ))
    }

    async fn commit(&self, session: MemorySession) -> MemoryResult<()> {
        session.commit()
    }

    async fn rollback(&self, session: MemorySession) -> MemoryResult<()> {
        session.rollback()
    }
}

#[async_trait]
impl BatchClient for MemoryClient {
    type Operation = BatchOp;
    type Output = Record;

    async fn batch(
        &self,
        operations: Vec<BatchOp>,
        options: &TxOptions,
    ) -> MemoryResult<Vec<Record>> {
        let session = self.begin(options).await?;
        let mut outputs = Vec::with_capacity(operations.len());
        for operation in operations {
            let output = match operation {
                BatchOp::Insert { collection, data } => session.insert(&collection, data).await,
                BatchOp::Update {
                    collection,
                    id,
                    patch,
                } => session.update(&collection, id, patch).await,
                BatchOp::Delete { collection, id } => session.delete(&collection, id).await,
            };
            match output {
                Ok(record) => outputs.push(record),
                Err(err) => {
                    session.rollback()?;
                    return Err(err);
                }
            }
        }
        session.commit()?;
        Ok(outputs)
    }
}

#[async_trait]
impl RecordStore for MemoryClient {
    async fn insert(&self, collection: &str, data: Value) -> MemoryResult<Record> {
        tokio::task::yield_now().await;
        let id = self.inner.next_record_id();
        self.write_committed(|committed| {
            committed
                .entry(collection.to_string())
                .or_default()
                .insert(id, data.clone());
            Ok(Record::new(id, data))
        })
    }

    async fn get(&self, collection: &str, id: u64) -> MemoryResult<Option<Record>> {
        tokio::task::yield_now().await;
        Ok(self
            .inner
            .committed_get(collection, id)
            .map(|data| Record::new(id, data)))
    }

    async fn list(&self, collection: &str) -> MemoryResult<Vec<Record>> {
        tokio::task::yield_now().await;
        Ok(self
            .inner
            .committed_collection(collection)
            .into_iter()
            .map(|(id, data)| Record::new(id, data))
            .collect())
    }

    async fn update(&self, collection: &str, id: u64, patch: Value) -> MemoryResult<Record> {
        tokio::task::yield_now().await;
        self.write_committed(|committed| {
            let data = committed
                .get_mut(collection)
                .and_then(|records| records.get_mut(&id))
                .ok_or_else(|| MemoryError::not_found(collection, id))?;
            merge(data, patch);
            Ok(Record::new(id, data.clone()))
        })
    }

    async fn delete(&self, collection: &str, id: u64) -> MemoryResult<Record> {
        tokio::task::yield_now().await;
        self.write_committed(|committed| {
            committed
                .get_mut(collection)
                .and_then(|records| records.remove(&id))
                .map(|data| Record::new(id, data))
                .ok_or_else(|| MemoryError::not_found(collection, id))
        })
    }

    async fn delete_all(&self, collection: &str) -> MemoryResult<usize> {
        tokio::task::yield_now().await;
        self.write_committed(|committed| {
            Ok(committed
                .get_mut(collection)
                .map(|records| std::mem::take(records).len())
                .unwrap_or(0))
        })
    }

    async fn count(&self, collection: &str) -> MemoryResult<usize> {
        tokio::task::yield_now().await;
        Ok(self
            .inner
            .committed
            .read()
            .get(collection)
            .map_or(0, BTreeMap::len))
    }
}
