//! Execution context store.
//!
//! An [`ExecutionContext`] is a key-value cell bound to one logical execution: the
//! future passed to [`ExecutionContext::run`] and everything it awaits, including
//! code resumed after suspension points. It is backed by a tokio task-local, so two
//! `run` calls never observe each other's values even when they interleave on the
//! same worker thread.
//!
//! Task-locals are not inherited by `tokio::spawn`. Use [`spawn`] or
//! [`ExecutionContext::scope`] to carry the current context into spawned work.

use crate::error::{TxError, TxResult};
use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

tokio::task_local! {
    static CURRENT: Option<ExecutionContext>;
}

/// Name of the slot holding the ambient session handle.
pub const ACTIVE_SESSION_HANDLE: &str = "activeSessionHandle";

/// Name of the slot holding queued success callbacks.
pub const PENDING_SUCCESS_CALLBACKS: &str = "pendingSuccessCallbacks";

/// Typed key of a context slot.
///
/// Slots are addressed by name *and* value type, so two keys sharing a name but
/// holding different types never alias.
pub struct ContextKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> ContextKey<T> {
    /// Creates a key.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// Returns the key name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    fn slot(&self) -> SlotId {
        SlotId {
            name: self.name,
            type_id: TypeId::of::<T>(),
        }
    }
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ContextKey<T> {}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContextKey").field(&self.name).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SlotId {
    name: &'static str,
    type_id: TypeId,
}

struct ContextInner {
    id: Uuid,
    slots: Mutex<HashMap<SlotId, Box<dyn Any + Send + Sync>>>,
    /// Reads and in-place updates that miss in `slots` continue here. Writes and
    /// removals never reach it.
    parent: Option<ExecutionContext>,
}

/// Handle to one execution context. Clones share the same cell.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

impl ExecutionContext {
    /// Creates a detached, empty context.
    ///
    /// The context becomes current only inside [`ExecutionContext::scope`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_parent(None)
    }

    /// Creates an empty context layered over this one.
    ///
    /// Reads and updates fall back to `self` for slots the child does not hold;
    /// writes and removals only touch the child.
    #[must_use]
    pub fn child(&self) -> Self {
        Self::with_parent(Some(self.clone()))
    }

    fn with_parent(parent: Option<Self>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id: Uuid::new_v4(),
                slots: Mutex::new(HashMap::new()),
                parent,
            }),
        }
    }

    /// Runs `body` inside a new, isolated context.
    pub async fn run<F: Future>(body: F) -> F::Output {
        Self::new().scope(body).await
    }

    /// Runs `body` with this context as the current one.
    pub async fn scope<F: Future>(&self, body: F) -> F::Output {
        CURRENT.scope(Some(self.clone()), body).await
    }

    /// Runs `body` with no current context, hiding any enclosing one.
    pub async fn detach<F: Future>(body: F) -> F::Output {
        CURRENT.scope(None, body).await
    }

    /// Returns the current context, if any.
    pub fn current() -> Option<Self> {
        CURRENT.try_with(Clone::clone).ok().flatten()
    }

    /// Reports whether a context is open for the calling code.
    pub fn is_active() -> bool {
        CURRENT.try_with(Option::is_some).unwrap_or(false)
    }

    /// Reads a value from the current context.
    ///
    /// Returns `None` outside of any context.
    pub fn get<T>(key: &ContextKey<T>) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        Self::current().and_then(|ctx| ctx.read(key))
    }

    /// Writes a value into the current context.
    ///
    /// # Errors
    ///
    /// Returns [`TxError::NoActiveContext`] outside of any context.
    pub fn set<T>(key: &ContextKey<T>, value: T) -> TxResult<()>
    where
        T: Send + Sync + 'static,
    {
        let ctx = Self::current().ok_or(TxError::NoActiveContext)?;
        ctx.write(key, value);
        Ok(())
    }

    /// Removes a value from the current context.
    ///
    /// Returns `None` outside of any context.
    pub fn remove<T>(key: &ContextKey<T>) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        Self::current().and_then(|ctx| ctx.take(key))
    }

    /// Returns the context id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Returns the context this one was created from with [`ExecutionContext::child`].
    pub fn parent(&self) -> Option<&Self> {
        self.inner.parent.as_ref()
    }

    /// Reads a value from this context or, if absent, from its ancestors.
    pub fn read<T>(&self, key: &ContextKey<T>) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let own = self
            .inner
            .slots
            .lock()
            .get(&key.slot())
            .and_then(|value| value.downcast_ref::<T>())
            .cloned();
        own.or_else(|| self.parent().and_then(|parent| parent.read(key)))
    }

    /// Checks whether this context or one of its ancestors holds a value for `key`.
    pub fn contains<T: 'static>(&self, key: &ContextKey<T>) -> bool {
        self.inner.slots.lock().contains_key(&key.slot())
            || self.parent().is_some_and(|parent| parent.contains(key))
    }

    /// Writes a value, returning the previous one.
    pub fn write<T>(&self, key: &ContextKey<T>, value: T) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.inner
            .slots
            .lock()
            .insert(key.slot(), Box::new(value))
            .and_then(|previous| previous.downcast::<T>().ok())
            .map(|previous| *previous)
    }

    /// Removes and returns a value.
    pub fn take<T>(&self, key: &ContextKey<T>) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.inner
            .slots
            .lock()
            .remove(&key.slot())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    /// Runs `f` in place against the slot of the nearest context holding it.
    ///
    /// The slot lock is held while `f` runs; `f` must not touch this context.
    pub fn update<T, R>(&self, key: &ContextKey<T>, f: impl FnOnce(Option<&mut T>) -> R) -> R
    where
        T: Send + Sync + 'static,
    {
        let mut slots = self.inner.slots.lock();
        if let Some(slot) = slots
            .get_mut(&key.slot())
            .and_then(|value| value.downcast_mut::<T>())
        {
            return f(Some(slot));
        }
        drop(slots);
        match self.parent() {
            Some(parent) => parent.update(key, f),
            None => f(None),
        }
    }

}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.inner.id)
            .field("parent", &self.parent().map(Self::id))
            .field("slots", &self.inner.slots.lock().len())
            .finish()
    }
}

/// Spawns `future` on the tokio runtime, carrying the current context along.
///
/// Outside of any context this is plain `tokio::spawn`.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match ExecutionContext::current() {
        Some(ctx) => tokio::spawn(async move { ctx.scope(future).await }),
        None => tokio::spawn(future),
    }
}
