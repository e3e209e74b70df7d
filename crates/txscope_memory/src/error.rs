//! Error types for the in-memory client.

use std::time::Duration;
use thiserror::Error;
use txscope_core::TxError;

/// Result type for in-memory client operations.
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Errors raised by the in-memory client.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// No record with this id exists in the collection.
    #[error("record not found: {id} in collection {collection}")]
    NotFound {
        /// The collection searched.
        collection: String,
        /// The missing record id.
        id: u64,
    },

    /// The session was already committed or rolled back.
    #[error("transaction {txid} is no longer active")]
    TransactionClosed {
        /// Id of the closed session.
        txid: u64,
    },

    /// The session outlived its timeout and was aborted.
    #[error("transaction {txid} expired after {timeout:?}")]
    TransactionExpired {
        /// Id of the expired session.
        txid: u64,
        /// The configured timeout.
        timeout: Duration,
    },

    /// The writer lock could not be acquired in time.
    #[error("could not start a serializable transaction within {max_wait:?}")]
    LockTimeout {
        /// The configured maximum wait.
        max_wait: Duration,
    },

    /// Error raised by the propagation layer.
    #[error(transparent)]
    Tx(#[from] TxError),
}

impl MemoryError {
    /// Creates a not found error.
    pub fn not_found(collection: impl Into<String>, id: u64) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id,
        }
    }

    /// Returns true if the error is a not found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
