//! Transactional executor.
//!
//! [`Transactional::execute`] decides, for one unit of work, whether to open a new
//! session or join the ambient one:
//!
//! 1. A session handle for this client is present in the current context: the unit
//!    runs immediately and joins it. Nothing is committed, nothing is flushed.
//! 2. Otherwise this call is the outermost boundary. The session gets a context of
//!    its own (a child of the current one, if any), its handle is stored there, the
//!    unit runs, and the session is committed (success) or rolled back (failure).
//!    The handle is removed on every exit path, including panics and cancellation.
//! 3. After a successful commit, queued success callbacks run in insertion order.
//!    Their failures are logged and swallowed.
//!
//! Errors from the unit of work are returned exactly as produced.

use crate::client::TransactionalClient;
use crate::config::{IsolationLevel, TxOptions};
use crate::context::{
    ContextKey, ExecutionContext, ACTIVE_SESSION_HANDLE, PENDING_SUCCESS_CALLBACKS,
};
use crate::error::{BoxError, TxError, TxResult};
use crate::logger::{LogEntry, TxLogger};
use crate::manager::SessionManager;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

type SuccessCallback = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), BoxError>> + Send>;

/// Success callbacks collected while a session is open.
#[derive(Default)]
struct CallbackQueue(Mutex<Vec<SuccessCallback>>);

const CALLBACKS: ContextKey<CallbackQueue> = ContextKey::new(PENDING_SUCCESS_CALLBACKS);

/// Key of the ambient session handle of client type `C`.
pub(crate) const fn session_key<C: TransactionalClient>() -> ContextKey<C::Session> {
    ContextKey::new(ACTIVE_SESSION_HANDLE)
}

/// Returns the ambient session of client type `C`, if one is open.
pub(crate) fn ambient_session<C: TransactionalClient>() -> Option<C::Session> {
    ExecutionContext::get(&session_key::<C>())
}

/// Outcome of [`on_success`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnSuccess<R> {
    /// Queued; it runs after the ambient session commits.
    Deferred,
    /// No session was active; the callback ran immediately.
    Completed(R),
}

impl<R> OnSuccess<R> {
    /// Returns true if the callback was queued.
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred)
    }

    /// Returns the callback's result if it ran immediately.
    pub fn into_completed(self) -> Option<R> {
        match self {
            Self::Deferred => None,
            Self::Completed(result) => Some(result),
        }
    }
}

/// Registers `callback` to run after the ambient session commits.
///
/// With no session active the callback runs right away and its result is
/// returned. Queued callbacks are dropped without running if the session rolls
/// back.
pub async fn on_success<F, Fut, T, E>(callback: F) -> OnSuccess<Result<T, E>>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    let callback = match ExecutionContext::current() {
        Some(ctx) => {
            let rejected = ctx.update(&CALLBACKS, move |queue| match queue {
                Some(queue) => {
                    let erased: SuccessCallback = Box::new(move || {
                        async move { callback().await.map(|_| ()).map_err(Into::into) }.boxed()
                    });
                    queue.0.get_mut().push(erased);
                    None
                }
                None => Some(callback),
            });
            match rejected {
                Some(callback) => callback,
                None => return OnSuccess::Deferred,
            }
        }
        None => callback,
    };
    OnSuccess::Completed(callback().await)
}

/// Runs units of work inside ambient sessions of client `C`.
pub struct Transactional<C: TransactionalClient> {
    manager: Arc<SessionManager<C>>,
}

impl<C: TransactionalClient> Clone for Transactional<C> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
        }
    }
}

impl<C: TransactionalClient> fmt::Debug for Transactional<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transactional")
            .field("manager", &self.manager)
            .finish()
    }
}

impl<C: TransactionalClient> Transactional<C> {
    /// Creates an executor over a set up manager.
    pub fn new(manager: Arc<SessionManager<C>>) -> Self {
        Self { manager }
    }

    /// Returns the shared manager.
    pub fn manager(&self) -> &Arc<SessionManager<C>> {
        &self.manager
    }

    /// Reports whether the calling code runs inside an ambient session.
    pub fn in_transaction(&self) -> bool {
        ExecutionContext::current().is_some_and(|ctx| ctx.contains(&session_key::<C>()))
    }

    /// Runs `unit` in the ambient session, opening one with default options if
    /// needed.
    pub async fn execute<F, Fut, T, E>(&self, unit: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<TxError> + From<C::Error>,
    {
        self.execute_with(self.manager.default_options(), unit).await
    }

    /// Like [`Transactional::execute`] with an explicit isolation level.
    pub async fn execute_with_isolation<F, Fut, T, E>(
        &self,
        isolation_level: IsolationLevel,
        unit: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<TxError> + From<C::Error>,
    {
        let options = self
            .manager
            .default_options()
            .isolation_level(isolation_level);
        self.execute_with(options, unit).await
    }

    /// Runs `unit` in the ambient session, opening one with `options` if needed.
    ///
    /// `options` only matter when a new session is opened; a joining call runs
    /// under the options of the session it joins.
    pub async fn execute_with<F, Fut, T, E>(&self, options: TxOptions, unit: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<TxError> + From<C::Error>,
    {
        if self.in_transaction() {
            self.manager
                .logger()
                .verbose(&LogEntry::new(EXECUTE, "Joining the ambient session"));
            return unit().await;
        }
        run_outermost(&self.manager, options, move |_session| unit()).await
    }

    /// Queues `callback` to run after the ambient session commits.
    ///
    /// See [`on_success`].
    pub async fn on_success<F, Fut, T, E>(&self, callback: F) -> OnSuccess<Result<T, E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        on_success(callback).await
    }

    /// Returns the raw client, ignoring any ambient session.
    ///
    /// # Errors
    ///
    /// Returns [`TxError::Configuration`] if no client was set.
    pub fn root(&self) -> TxResult<Arc<C>> {
        self.manager.client()
    }

    /// Runs `unit` against the raw client outside of any ambient session.
    ///
    /// The unit runs with no current execution context, so every call made
    /// through a [`crate::TxClient`] during it reaches the raw client, and a
    /// transactional call inside it opens an independent top-level session.
    pub async fn execute_isolated<F, Fut, T, E>(&self, unit: F) -> Result<T, E>
    where
        F: FnOnce(Arc<C>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<TxError>,
    {
        let client = self.manager.client()?;
        self.manager
            .logger()
            .verbose(&LogEntry::new(ISOLATED, "Running outside of the ambient session"));
        ExecutionContext::detach(async move { unit(client).await }).await
    }

    /// Wraps `f` so that every call runs through [`Transactional::execute_with`].
    ///
    /// This is the function form of marking a method transactional. `None`
    /// options use the configured defaults at call time.
    ///
    /// ```rust,ignore
    /// let create_user = tx.wrap(None, move |name: String| {
    ///     let users = users.clone();
    ///     async move { users.insert(name).await }
    /// });
    /// create_user("ada".into()).await?;
    /// ```
    pub fn wrap<A, F, Fut, T, E>(
        &self,
        options: Option<TxOptions>,
        f: F,
    ) -> impl Fn(A) -> BoxFuture<'static, Result<T, E>> + Clone + Send + Sync
    where
        A: Send + 'static,
        F: Fn(A) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<TxError> + From<C::Error> + Send + 'static,
    {
        let tx = self.clone();
        move |args: A| {
            let tx = tx.clone();
            let f = f.clone();
            let options = options.clone();
            async move {
                let options = options.unwrap_or_else(|| tx.manager.default_options());
                tx.execute_with(options, move || f(args)).await
            }
            .boxed()
        }
    }
}

const EXECUTE: &str = "Transactional.execute";
const ISOLATED: &str = "Transactional.execute_isolated";
const OUTERMOST: &str = "Transactional.run_outermost";
const CALLBACK: &str = "Transactional.run_success_callbacks";

/// Runs `unit` as the outermost transactional boundary.
///
/// The session lives in a context of its own: a child of the current context if
/// there is one, a fresh context otherwise. Executions sharing the enclosing
/// context therefore never see each other's sessions; each opens, commits and
/// rolls back its own.
///
/// Shared by the executor and by the proxy's transaction-opening operation.
pub(crate) async fn run_outermost<C, F, Fut, T, E>(
    manager: &SessionManager<C>,
    options: TxOptions,
    unit: F,
) -> Result<T, E>
where
    C: TransactionalClient,
    F: FnOnce(C::Session) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<TxError> + From<C::Error>,
{
    let logger = manager.logger();
    let ctx = match ExecutionContext::current() {
        Some(parent) => {
            logger.verbose(&LogEntry::new(
                OUTERMOST,
                "Context active without session handle, opening a child context",
            ));
            parent.child()
        }
        None => ExecutionContext::new(),
    };
    let (result, callbacks) = ctx.scope(run_in_context(manager, &ctx, options, unit)).await;
    // Back in the enclosing context: a callback opening a transaction starts a
    // fresh top-level one.
    run_success_callbacks(logger.as_ref(), callbacks).await;
    result
}

async fn run_in_context<C, F, Fut, T, E>(
    manager: &SessionManager<C>,
    ctx: &ExecutionContext,
    options: TxOptions,
    unit: F,
) -> (Result<T, E>, Vec<SuccessCallback>)
where
    C: TransactionalClient,
    F: FnOnce(C::Session) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<TxError> + From<C::Error>,
{
    let logger = manager.logger();
    let client = match manager.client() {
        Ok(client) => client,
        Err(err) => return (Err(err.into()), Vec::new()),
    };

    tracing::debug!(context = %ctx.id(), ?options, "beginning session");
    let session = match client.begin(&options).await {
        Ok(session) => session,
        Err(err) => return (Err(err.into()), Vec::new()),
    };
    let active = ActiveSession::install(ctx, session_key::<C>(), session.clone());
    logger.verbose(&LogEntry::new(
        OUTERMOST,
        "Top-level: open context, store session handle and propagate",
    ));

    let outcome = match unit(session.clone()).await {
        Ok(value) => match client.commit(session).await {
            Ok(()) => {
                tracing::debug!(context = %ctx.id(), "session committed");
                (Ok(value), active.finish())
            }
            Err(err) => {
                drop(active);
                (Err(err.into()), Vec::new())
            }
        },
        Err(err) => {
            if let Err(rollback_err) = client.rollback(session).await {
                logger.error(
                    &LogEntry::new(OUTERMOST, "Rollback failed").with_error(&rollback_err),
                );
            }
            tracing::debug!(context = %ctx.id(), "session rolled back");
            drop(active);
            (Err(err), Vec::new())
        }
    };

    logger.verbose(&LogEntry::new(OUTERMOST, "Top-level: context reset"));
    outcome
}

/// Session handle and callback queue installed in a session's own context.
///
/// Dropping the guard removes both, so the handle never outlives the unit of
/// work, whatever way it exits.
struct ActiveSession<S: Send + Sync + 'static> {
    ctx: ExecutionContext,
    key: ContextKey<S>,
}

impl<S: Send + Sync + 'static> ActiveSession<S> {
    fn install(ctx: &ExecutionContext, key: ContextKey<S>, session: S) -> Self {
        ctx.write(&key, session);
        ctx.write(&CALLBACKS, CallbackQueue::default());
        Self {
            ctx: ctx.clone(),
            key,
        }
    }

    /// Clears the handle and hands over the queued callbacks.
    fn finish(self) -> Vec<SuccessCallback> {
        self.ctx
            .take(&CALLBACKS)
            .map(|queue| queue.0.into_inner())
            .unwrap_or_default()
    }
}

impl<S: Send + Sync + 'static> Drop for ActiveSession<S> {
    fn drop(&mut self) {
        self.ctx.take(&self.key);
        self.ctx.take(&CALLBACKS);
    }
}

async fn run_success_callbacks(logger: &dyn TxLogger, callbacks: Vec<SuccessCallback>) {
    for callback in callbacks {
        match AssertUnwindSafe(callback()).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => logger.error(
                &LogEntry::new(CALLBACK, "Error executing success callback").with_error(&*err),
            ),
            Err(panic) => {
                let message = format!(
                    "Success callback panicked: {}",
                    panic_message(panic.as_ref())
                );
                logger.error(&LogEntry::new(CALLBACK, &message));
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
