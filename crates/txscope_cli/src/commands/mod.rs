//! CLI command implementations.

pub mod demo;
