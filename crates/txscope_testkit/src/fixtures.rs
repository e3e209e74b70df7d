//! Test fixtures.
//!
//! Provides a fully wired memory-backed setup: the routing proxy, an executor
//! sharing its manager, the raw client, and a recording logger.

use crate::logger::RecordingLogger;
use std::sync::Arc;
use txscope_core::{patch_client, Transactional, TxClient, TxConfig};
use txscope_memory::{MemoryClient, MemoryStats};

/// A memory-backed setup.
pub struct MemoryFixture {
    /// The routing proxy.
    pub client: TxClient<MemoryClient>,
    /// Executor sharing the proxy's manager.
    pub tx: Transactional<MemoryClient>,
    /// The raw client.
    pub raw: Arc<MemoryClient>,
    /// Logger receiving the propagation layer's diagnostics.
    pub logger: Arc<RecordingLogger>,
}

impl MemoryFixture {
    /// Returns the raw client's session counters.
    pub fn stats(&self) -> MemoryStats {
        self.raw.stats()
    }
}

impl std::fmt::Debug for MemoryFixture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryFixture")
            .field("raw", &self.raw)
            .finish_non_exhaustive()
    }
}

/// Creates a fixture with logging enabled into a [`RecordingLogger`].
pub fn memory_fixture() -> MemoryFixture {
    memory_fixture_with(TxConfig::new().enable_logging(true))
}

/// Creates a fixture from `config`.
///
/// Unless `config` names its own logger, entries go to the fixture's
/// [`RecordingLogger`]. Whether anything is logged still follows
/// `config.enable_logging`.
pub fn memory_fixture_with(config: TxConfig) -> MemoryFixture {
    memory_fixture_with_logger(config, Arc::new(RecordingLogger::new()))
}

/// Creates a fixture from `config` recording into `logger`.
///
/// `logger` is installed unless `config` names its own logger.
pub fn memory_fixture_with_logger(config: TxConfig, logger: Arc<RecordingLogger>) -> MemoryFixture {
    let config = if config.custom_logger.is_some() {
        config
    } else {
        config.custom_logger(logger.clone())
    };
    let client = patch_client(MemoryClient::new(), config);
    MemoryFixture {
        tx: client.transactional(),
        raw: client.root(),
        client,
        logger,
    }
}

/// Runs `f` with a fresh default fixture.
///
/// # Example
///
/// ```rust,ignore
/// use txscope_testkit::with_memory_fixture;
///
/// #[tokio::test]
/// async fn my_test() {
///     with_memory_fixture(|fx| async move {
///         fx.client.insert("posts", json!({})).await.unwrap();
///     })
///     .await;
/// }
/// ```
pub async fn with_memory_fixture<F, Fut, R>(f: F) -> R
where
    F: FnOnce(MemoryFixture) -> Fut,
    Fut: std::future::Future<Output = R>,
{
    f(memory_fixture()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::LogLevel;
    use txscope_core::NoopLogger;

    #[test]
    fn fixture_shares_one_client() {
        let fx = memory_fixture();
        assert!(Arc::ptr_eq(&fx.raw, &fx.client.root()));
        assert!(Arc::ptr_eq(fx.tx.manager(), fx.client.manager()));
        assert!(fx.logger.contains(LogLevel::Verbose, "Accessing root client"));
    }

    #[test]
    fn custom_logger_is_respected() {
        let fx = memory_fixture_with(
            TxConfig::new()
                .enable_logging(true)
                .custom_logger(Arc::new(NoopLogger)),
        );
        let _ = fx.client.root();
        assert!(fx.logger.entries().is_empty());
    }

    #[test]
    fn disabled_logging_records_nothing() {
        let fx = memory_fixture_with(TxConfig::new());
        let _ = fx.client.root();
        assert!(fx.logger.entries().is_empty());
    }
}
