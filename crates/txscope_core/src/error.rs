//! Error types for txscope core.

use thiserror::Error;

/// Result type for core operations.
pub type TxResult<T> = Result<T, TxError>;

/// Boxed error used where the concrete type is erased (success callbacks).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by the propagation layer itself.
///
/// Errors produced by application code or by the underlying client are never
/// converted into a `TxError`; they reach the caller as they were returned.
#[derive(Debug, Error)]
pub enum TxError {
    /// The session manager was used before it was set up.
    #[error("configuration error: {message}")]
    Configuration {
        /// What is missing.
        message: String,
    },

    /// An operation that cannot be merged into the ambient session.
    #[error("unsupported usage: {message}")]
    UnsupportedUsage {
        /// Description of the rejected call.
        message: String,
    },

    /// A context value was written outside of any execution context.
    #[error("no active execution context")]
    NoActiveContext,
}

impl TxError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates an unsupported usage error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedUsage {
            message: message.into(),
        }
    }

    /// Returns true for errors caused by missing setup.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}
