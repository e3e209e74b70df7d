//! # txscope memory
//!
//! In-memory transactional record store for txscope.
//!
//! This crate provides:
//! - [`MemoryClient`]: collections of JSON records with begin/commit/rollback
//! - [`MemorySession`]: a session with private pending writes, isolation levels,
//!   a timeout, and a bounded wait for the writer lock
//! - [`RecordStore`]: the record operations, available on the client, on a session,
//!   and on `TxClient<MemoryClient>`
//! - Batched transactions through [`BatchOp`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use serde_json::json;
//! use txscope_core::{patch_client, TxConfig};
//! use txscope_memory::{MemoryClient, MemoryError, RecordStore};
//!
//! # async fn demo() -> Result<(), MemoryError> {
//! let client = patch_client(MemoryClient::new(), TxConfig::default());
//! let tx = client.transactional();
//!
//! let db = client.clone();
//! tx.execute(move || async move {
//!     db.insert("posts", json!({"title": "hello"})).await?;
//!     Ok::<_, MemoryError>(())
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod record;
mod routing;
mod session;
mod store;

pub use error::{MemoryError, MemoryResult};
pub use record::{Record, RecordStore};
pub use session::{MemorySession, SessionState};
pub use store::{BatchOp, MemoryClient, MemoryStats};
