//! Sessions of the in-memory client.

use crate::error::{MemoryError, MemoryResult};
use crate::record::{merge, Collections, Record, RecordStore};
use crate::store::StoreInner;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use txscope_core::{IsolationLevel, TxOptions};

/// A write recorded by a session and applied on commit.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PendingWrite {
    /// A record created by this session.
    Insert(Value),
    /// A new payload for a record that existed before this session.
    Update(Value),
    /// Removal of a record that existed before this session.
    Delete,
}

pub(crate) type PendingWrites = BTreeMap<(String, u64), PendingWrite>;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Open for reads and writes.
    Active,
    /// Writes were applied.
    Committed,
    /// Writes were discarded.
    RolledBack,
    /// The timeout passed; writes were discarded.
    Expired,
}

struct SessionData {
    state: SessionState,
    writes: PendingWrites,
    /// Held by serializable sessions until they end.
    writer: Option<OwnedMutexGuard<()>>,
}

struct SessionInner {
    txid: u64,
    store: Arc<StoreInner>,
    options: TxOptions,
    /// `None` when the timeout is too large to represent.
    deadline: Option<Instant>,
    /// Committed state at begin, for isolation levels with stable reads.
    snapshot: Option<Collections>,
    data: Mutex<SessionData>,
}

/// Handle to an open session of a [`crate::MemoryClient`].
///
/// Clones share the session. Reads see the session's own writes layered over the
/// committed state. Dropping every clone without committing discards the writes.
#[derive(Clone)]
pub struct MemorySession {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.inner.data.lock();
        f.debug_struct("MemorySession")
            .field("txid", &self.inner.txid)
            .field("isolation_level", &self.inner.options.isolation_level)
            .field("state", &data.state)
            .field("pending_writes", &data.writes.len())
            .finish()
    }
}

impl MemorySession {
    pub(crate) fn open(
        txid: u64,
        store: Arc<StoreInner>,
        options: TxOptions,
        writer: Option<OwnedMutexGuard<()>>,
    ) -> Self {
        let snapshot = match options.isolation_level {
            Some(
                IsolationLevel::RepeatableRead
                | IsolationLevel::Snapshot
                | IsolationLevel::Serializable,
            ) => Some(store.snapshot()),
            _ => None,
        };
        Self {
            inner: Arc::new(SessionInner {
                txid,
                deadline: Instant::now().checked_add(options.timeout),
                store,
                options,
                snapshot,
                data: Mutex::new(SessionData {
                    state: SessionState::Active,
                    writes: BTreeMap::new(),
                    writer,
                }),
            }),
        }
    }

    /// Returns the session id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.txid
    }

    /// Returns the options the session was opened with.
    pub fn options(&self) -> &TxOptions {
        &self.inner.options
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.inner.data.lock().state
    }

    /// Returns the number of writes waiting for commit.
    pub fn pending_writes(&self) -> usize {
        self.inner.data.lock().writes.len()
    }

    /// Returns true if both handles refer to the same session.
    pub fn same_session(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Applies the pending writes to the store.
    pub(crate) fn commit(&self) -> MemoryResult<()> {
        self.with_active(|data| {
            let writes = std::mem::take(&mut data.writes);
            let count = writes.len();
            self.inner.store.apply(writes);
            data.state = SessionState::Committed;
            data.writer = None;
            self.inner.store.stats.record_commit();
            tracing::debug!(txid = self.inner.txid, writes = count, "session committed");
            Ok(())
        })
    }

    /// Discards the pending writes.
    ///
    /// Rolling back a session that already rolled back or expired is a no-op.
    pub(crate) fn rollback(&self) -> MemoryResult<()> {
        let mut data = self.inner.data.lock();
        match data.state {
            SessionState::Active => {
                data.writes.clear();
                data.writer = None;
                data.state = SessionState::RolledBack;
                self.inner.store.stats.record_rollback();
                tracing::debug!(txid = self.inner.txid, "session rolled back");
                Ok(())
            }
            SessionState::RolledBack | SessionState::Expired => Ok(()),
            SessionState::Committed => Err(MemoryError::TransactionClosed {
                txid: self.inner.txid,
            }),
        }
    }

    fn with_active<R>(
        &self,
        f: impl FnOnce(&mut SessionData) -> MemoryResult<R>,
    ) -> MemoryResult<R> {
        let mut data = self.inner.data.lock();
        let expired = self
            .inner
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline);
        if data.state == SessionState::Active && expired {
            data.writes.clear();
            data.writer = None;
            data.state = SessionState::Expired;
            self.inner.store.stats.record_expiry();
            tracing::debug!(txid = self.inner.txid, "session expired");
        }
        match data.state {
            SessionState::Active => f(&mut *data),
            SessionState::Expired => Err(MemoryError::TransactionExpired {
                txid: self.inner.txid,
                timeout: self.inner.options.timeout,
            }),
            SessionState::Committed | SessionState::RolledBack => {
                Err(MemoryError::TransactionClosed {
                    txid: self.inner.txid,
                })
            }
        }
    }

    fn base_get(&self, collection: &str, id: u64) -> Option<Value> {
        match &self.inner.snapshot {
            Some(snapshot) => snapshot.get(collection)?.get(&id).cloned(),
            None => self.inner.store.committed_get(collection, id),
        }
    }

    fn base_collection(&self, collection: &str) -> BTreeMap<u64, Value> {
        match &self.inner.snapshot {
            Some(snapshot) => snapshot.get(collection).cloned().unwrap_or_default(),
            None => self.inner.store.committed_collection(collection),
        }
    }

    fn lookup(&self, data: &SessionData, collection: &str, id: u64) -> Option<Value> {
        match data.writes.get(&(collection.to_string(), id)) {
            Some(PendingWrite::Insert(value) | PendingWrite::Update(value)) => Some(value.clone()),
            Some(PendingWrite::Delete) => None,
            None => self.base_get(collection, id),
        }
    }

    fn visible(&self, data: &SessionData, collection: &str) -> BTreeMap<u64, Value> {
        let mut records = self.base_collection(collection);
        let range = (collection.to_string(), 0)..=(collection.to_string(), u64::MAX);
        for ((_, id), write) in data.writes.range(range) {
            match write {
                PendingWrite::Insert(value) | PendingWrite::Update(value) => {
                    records.insert(*id, value.clone());
                }
                PendingWrite::Delete => {
                    records.remove(id);
                }
            }
        }
        records
    }

    fn remove(&self, data: &mut SessionData, collection: &str, id: u64) -> MemoryResult<Value> {
        let current = self
            .lookup(data, collection, id)
            .ok_or_else(|| MemoryError::not_found(collection, id))?;
        let key = (collection.to_string(), id);
        match data.writes.get(&key) {
            Some(PendingWrite::Insert(_)) => {
                data.writes.remove(&key);
            }
            _ => {
                data.writes.insert(key, PendingWrite::Delete);
            }
        }
        Ok(current)
    }
}

#[async_trait]
impl RecordStore for MemorySession {
    async fn insert(&self, collection: &str, value: Value) -> MemoryResult<Record> {
        tokio::task::yield_now().await;
        self.with_active(|data| {
            let id = self.inner.store.next_record_id();
            data.writes.insert(
                (collection.to_string(), id),
                PendingWrite::Insert(value.clone()),
            );
            Ok(Record::new(id, value))
        })
    }

    async fn get(&self, collection: &str, id: u64) -> MemoryResult<Option<Record>> {
        tokio::task::yield_now().await;
        self.with_active(|data| {
            Ok(self
                .lookup(data, collection, id)
                .map(|value| Record::new(id, value)))
        })
    }

    async fn list(&self, collection: &str) -> MemoryResult<Vec<Record>> {
        tokio::task::yield_now().await;
        self.with_active(|data| {
            Ok(self
                .visible(data, collection)
                .into_iter()
                .map(|(id, value)| Record::new(id, value))
                .collect())
        })
    }

    async fn update(&self, collection: &str, id: u64, patch: Value) -> MemoryResult<Record> {
        tokio::task::yield_now().await;
        self.with_active(|data| {
            let mut value = self
                .lookup(data, collection, id)
                .ok_or_else(|| MemoryError::not_found(collection, id))?;
            merge(&mut value, patch);
            let key = (collection.to_string(), id);
            let write = match data.writes.get(&key) {
                Some(PendingWrite::Insert(_)) => PendingWrite::Insert(value.clone()),
                _ => PendingWrite::Update(value.clone()),
            };
            data.writes.insert(key, write);
            Ok(Record::new(id, value))
        })
    }

    async fn delete(&self, collection: &str, id: u64) -> MemoryResult<Record> {
        tokio::task::yield_now().await;
        self.with_active(|data| {
            let value = self.remove(data, collection, id)?;
            Ok(Record::new(id, value))
        })
    }

    async fn delete_all(&self, collection: &str) -> MemoryResult<usize> {
        tokio::task::yield_now().await;
        self.with_active(|data| {
            let ids: Vec<u64> = self.visible(data, collection).into_keys().collect();
            for id in &ids {
                self.remove(data, collection, *id)?;
            }
            Ok(ids.len())
        })
    }

    async fn count(&self, collection: &str) -> MemoryResult<usize> {
        tokio::task::yield_now().await;
        self.with_active(|data| Ok(self.visible(data, collection).len()))
    }
}
