//! # txscope Testkit
//!
//! Test utilities for txscope.
//!
//! This crate provides:
//! - Memory-backed fixtures wiring the proxy, the executor and a recording logger
//! - A logger that keeps every entry for assertions
//! - A small post application written without passing transaction handles
//! - End-to-end scenarios over that application
//!
//! ## Usage
//!
//! ```rust,ignore
//! use txscope_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn nested_calls_share_a_session() {
//!     let fx = memory_fixture();
//!     let report = run_nested(&fx).await.unwrap();
//!     assert!(report.failures().is_empty());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod logger;
pub mod posts;
pub mod scenarios;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::logger::*;
    pub use crate::posts::*;
    pub use crate::scenarios::*;
}

pub use fixtures::*;
pub use logger::*;
pub use posts::*;
pub use scenarios::*;
