//! # txscope core
//!
//! Ambient transaction propagation for async data clients.
//!
//! Data-access code written against a [`TxClient`] never takes a transaction
//! parameter. When it runs inside [`Transactional::execute`], every call it makes is
//! routed to the session opened by the outermost transactional call; otherwise it
//! reaches the raw client directly.
//!
//! This crate provides:
//! - An execution context store bound to one logical async execution
//! - A session manager holding the raw client and the logging policy
//! - The transactional executor: join or open, commit or roll back, success callbacks
//! - A transparent client proxy with a `root` escape hatch
//!
//! ## Example
//!
//! ```rust,ignore
//! use txscope_core::{patch_client, on_success, TxConfig};
//!
//! let client = patch_client(raw_client, TxConfig::new().enable_logging(true));
//! let tx = client.transactional();
//!
//! tx.execute(|| async {
//!     users.create("ada").await?;      // goes through `client`
//!     audit.record("created").await?;  // same session
//!     on_success(|| async { mailer.welcome("ada").await }).await;
//!     Ok::<_, AppError>(())
//! })
//! .await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod context;
mod error;
mod executor;
mod logger;
mod manager;
mod proxy;

pub use client::{BatchClient, TransactionalClient};
pub use config::{
    IsolationLevel, ParseIsolationLevelError, TxConfig, TxOptions, DEFAULT_MAX_WAIT,
    DEFAULT_TRANSACTION_TIMEOUT,
};
pub use context::{
    spawn, ContextKey, ExecutionContext, ACTIVE_SESSION_HANDLE, PENDING_SUCCESS_CALLBACKS,
};
pub use error::{BoxError, TxError, TxResult};
pub use executor::{on_success, OnSuccess, Transactional};
pub use logger::{LogEntry, NoopLogger, TracingLogger, TxLogger};
pub use manager::SessionManager;
pub use proxy::{patch_client, Target, TxClient};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
