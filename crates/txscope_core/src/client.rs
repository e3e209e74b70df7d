//! Capabilities a data client must expose to take part in ambient transactions.

use crate::config::TxOptions;
use async_trait::async_trait;

/// A data client able to open transactional sessions.
///
/// The client owns the actual transaction semantics: isolation, timeouts, and what
/// happens to data on commit or rollback. The core only decides *when* a session is
/// opened and *who* gets to use it.
///
/// # Invariants
///
/// - A `Session` handle is only valid between `begin` and `commit`/`rollback`.
/// - Dropping every clone of a `Session` without committing it must leave the data
///   as if `rollback` had been called.
/// - Timeouts in [`TxOptions`] are enforced by the client; an expired session fails
///   its next operation or its commit.
#[async_trait]
pub trait TransactionalClient: Send + Sync + 'static {
    /// Handle to an open session. Cloned into every nested call that joins it.
    type Session: Clone + Send + Sync + 'static;

    /// Error type of session management operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Opens a new session.
    async fn begin(&self, options: &TxOptions) -> Result<Self::Session, Self::Error>;

    /// Commits a session, making its writes visible.
    async fn commit(&self, session: Self::Session) -> Result<(), Self::Error>;

    /// Rolls a session back, discarding its writes.
    async fn rollback(&self, session: Self::Session) -> Result<(), Self::Error>;
}

/// The array form of the transaction-opening operation: a batch of operations
/// executed atomically by the client in one native transaction.
#[async_trait]
pub trait BatchClient: TransactionalClient {
    /// One operation of the batch.
    type Operation: Send + 'static;

    /// Result of one operation.
    type Output: Send + 'static;

    /// Runs every operation in a single native transaction.
    async fn batch(
        &self,
        operations: Vec<Self::Operation>,
        options: &TxOptions,
    ) -> Result<Vec<Self::Output>, Self::Error>;
}
