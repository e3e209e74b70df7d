//! Transparent client proxy.
//!
//! A [`TxClient`] wraps the raw client and routes every data operation to the
//! ambient session when one is open, and to the raw client otherwise. Client crates
//! implement their data surface three times: for the raw client, for its session
//! handle, and for `TxClient<TheirClient>` by matching on [`TxClient::target`]:
//!
//! ```rust,ignore
//! #[async_trait]
//! impl RecordStore for TxClient<MemoryClient> {
//!     async fn get(&self, collection: &str, id: u64) -> MemoryResult<Option<Record>> {
//!         match self.target() {
//!             Target::Root(client) => client.get(collection, id).await,
//!             Target::Session(session) => session.get(collection, id).await,
//!         }
//!     }
//! }
//! ```
//!
//! The routing state is private. Code holding a proxy cannot swap out its
//! transaction-opening operation:
//!
//! ```compile_fail
//! use txscope_core::{TransactionalClient, TxClient};
//!
//! fn spy<C: TransactionalClient>(client: &mut TxClient<C>) {
//!     client.transaction = |_| unimplemented!();
//! }
//! ```

use crate::client::{BatchClient, TransactionalClient};
use crate::config::{TxConfig, TxOptions};
use crate::error::{TxError, TxResult};
use crate::executor::{ambient_session, run_outermost, Transactional};
use crate::logger::LogEntry;
use crate::manager::SessionManager;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Where a data operation issued through a [`TxClient`] goes.
pub enum Target<C: TransactionalClient> {
    /// No session is open: the raw client, in autocommit mode.
    Root(Arc<C>),
    /// The ambient session.
    Session(C::Session),
}

impl<C: TransactionalClient> Target<C> {
    /// Returns true when routed to the ambient session.
    pub fn is_session(&self) -> bool {
        matches!(self, Self::Session(_))
    }
}

impl<C: TransactionalClient> Clone for Target<C> {
    fn clone(&self) -> Self {
        match self {
            Self::Root(client) => Self::Root(Arc::clone(client)),
            Self::Session(session) => Self::Session(session.clone()),
        }
    }
}

impl<C: TransactionalClient> fmt::Debug for Target<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root(_) => f.write_str("Target::Root"),
            Self::Session(_) => f.write_str("Target::Session"),
        }
    }
}

/// Raw client wrapped for ambient session routing.
pub struct TxClient<C: TransactionalClient> {
    raw: Arc<C>,
    manager: Arc<SessionManager<C>>,
}

impl<C: TransactionalClient> Clone for TxClient<C> {
    fn clone(&self) -> Self {
        Self {
            raw: Arc::clone(&self.raw),
            manager: Arc::clone(&self.manager),
        }
    }
}

impl<C: TransactionalClient> fmt::Debug for TxClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxClient")
            .field("target", &self.target())
            .finish_non_exhaustive()
    }
}

const PROXY: &str = "TxClient";
const TRANSACTION: &str = "TxClient.transaction";
const BATCH: &str = "TxClient.batch";

impl<C: TransactionalClient> TxClient<C> {
    /// Wraps the client held by `manager`.
    ///
    /// # Errors
    ///
    /// Returns [`TxError::Configuration`] if the manager has no client.
    pub fn new(manager: Arc<SessionManager<C>>) -> TxResult<Self> {
        let raw = manager.client()?;
        Ok(Self { raw, manager })
    }

    /// Returns the raw client, bypassing any ambient session.
    ///
    /// Use it for writes that must survive a rollback of the surrounding
    /// transaction, or to start an independent top-level transaction.
    pub fn root(&self) -> Arc<C> {
        self.manager
            .logger()
            .verbose(&LogEntry::new(PROXY, "[Proxy] Accessing root client"));
        Arc::clone(&self.raw)
    }

    /// Resolves where an operation issued right now goes.
    pub fn target(&self) -> Target<C> {
        match ambient_session::<C>() {
            Some(session) => Target::Session(session),
            None => Target::Root(Arc::clone(&self.raw)),
        }
    }

    /// Returns the ambient session handle, if one is open.
    pub fn session(&self) -> Option<C::Session> {
        ambient_session::<C>()
    }

    /// Returns the shared manager.
    pub fn manager(&self) -> &Arc<SessionManager<C>> {
        &self.manager
    }

    /// Returns an executor sharing this proxy's manager.
    pub fn transactional(&self) -> Transactional<C> {
        Transactional::new(Arc::clone(&self.manager))
    }

    /// Opens a transaction with the default options and passes its handle to `f`.
    ///
    /// See [`TxClient::transaction_with`].
    pub async fn transaction<F, Fut, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(C::Session) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<TxError> + From<C::Error>,
    {
        self.transaction_with(self.manager.default_options(), f).await
    }

    /// Opens a transaction and passes its handle to `f`.
    ///
    /// While a session is already open, no nested transaction is created: `f`
    /// receives the existing handle and its writes belong to the ambient session.
    /// Otherwise this is the outermost boundary, with the same commit, rollback,
    /// and success callback handling as [`Transactional::execute`].
    pub async fn transaction_with<F, Fut, T, E>(&self, options: TxOptions, f: F) -> Result<T, E>
    where
        F: FnOnce(C::Session) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<TxError> + From<C::Error>,
    {
        if let Some(session) = self.session() {
            self.manager.logger().verbose(&LogEntry::new(
                TRANSACTION,
                "[Proxy] transaction called on a session, continue nesting it",
            ));
            return f(session).await;
        }
        run_outermost(&self.manager, options, f).await
    }
}

impl<C> TxClient<C>
where
    C: BatchClient,
    C::Error: From<TxError>,
{
    /// Runs `operations` atomically in one native transaction of the raw client.
    ///
    /// # Errors
    ///
    /// Fails with [`TxError::UnsupportedUsage`] while a session is open: a batch
    /// cannot be merged into the ambient session.
    pub async fn batch(&self, operations: Vec<C::Operation>) -> Result<Vec<C::Output>, C::Error> {
        self.batch_with(self.manager.default_options(), operations)
            .await
    }

    /// Like [`TxClient::batch`] with explicit options.
    pub async fn batch_with(
        &self,
        options: TxOptions,
        operations: Vec<C::Operation>,
    ) -> Result<Vec<C::Output>, C::Error> {
        if self.session().is_some() {
            let err = TxError::unsupported("batched transaction called while a session is active");
            self.manager.logger().warn(
                &LogEntry::new(BATCH, "Rejected batch inside an ambient session").with_error(&err),
            );
            return Err(err.into());
        }
        self.raw.batch(operations, &options).await
    }
}

/// Sets up ambient transactions for `raw` and returns the routing proxy.
///
/// The returned proxy and every executor obtained through
/// [`TxClient::transactional`] share one [`SessionManager`].
pub fn patch_client<C: TransactionalClient>(raw: C, config: TxConfig) -> TxClient<C> {
    let raw = Arc::new(raw);
    let manager = SessionManager::new();
    manager.set_shared_client(Arc::clone(&raw));
    manager.set_config(config);
    TxClient {
        raw,
        manager: Arc::new(manager),
    }
}
