//! Session manager: the raw client and the logging policy.

use crate::client::TransactionalClient;
use crate::config::{TxConfig, TxOptions};
use crate::error::{TxError, TxResult};
use crate::logger::{NoopLogger, TxLogger};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Holds the raw client and the effective configuration.
///
/// Both are set during setup and only read afterwards. The manager is shared by
/// the executor and the proxy through an `Arc`; there is no process-wide instance.
pub struct SessionManager<C> {
    client: RwLock<Option<Arc<C>>>,
    config: RwLock<TxConfig>,
    logger: RwLock<Arc<dyn TxLogger>>,
}

impl<C: TransactionalClient> SessionManager<C> {
    /// Creates an empty manager with the default (silent) configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: RwLock::new(None),
            config: RwLock::new(TxConfig::default()),
            logger: RwLock::new(Arc::new(NoopLogger)),
        }
    }

    /// Creates a fully set up manager.
    #[must_use]
    pub fn with_client(client: C, config: TxConfig) -> Self {
        let manager = Self::new();
        manager.set_client(client);
        manager.set_config(config);
        manager
    }

    /// Stores the raw client.
    pub fn set_client(&self, client: C) {
        self.set_shared_client(Arc::new(client));
    }

    /// Stores a raw client that is already shared.
    pub fn set_shared_client(&self, client: Arc<C>) {
        *self.client.write() = Some(client);
    }

    /// Stores the configuration and resolves the logger policy.
    pub fn set_config(&self, config: TxConfig) {
        *self.logger.write() = config.logger();
        *self.config.write() = config;
    }

    /// Returns the raw client.
    ///
    /// # Errors
    ///
    /// Returns [`TxError::Configuration`] if no client was set.
    pub fn client(&self) -> TxResult<Arc<C>> {
        self.client
            .read()
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| TxError::configuration("session manager: client not set"))
    }

    /// Returns true once a client was set.
    pub fn has_client(&self) -> bool {
        self.client.read().is_some()
    }

    /// Returns the effective logger.
    pub fn logger(&self) -> Arc<dyn TxLogger> {
        self.logger.read().clone()
    }

    /// Returns a copy of the configuration.
    pub fn config(&self) -> TxConfig {
        self.config.read().clone()
    }

    /// Options used by transactions started without explicit options.
    pub fn default_options(&self) -> TxOptions {
        self.config.read().default_options()
    }
}

impl<C: TransactionalClient> Default for SessionManager<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for SessionManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("has_client", &self.client.read().is_some())
            .field("config", &*self.config.read())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::LogEntry;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug)]
    struct NullClient;

    #[async_trait]
    impl TransactionalClient for NullClient {
        type Session = ();
        type Error = TxError;

        async fn begin(&self, _options: &TxOptions) -> TxResult<()> {
            Ok(())
        }
        async fn commit(&self, _session: ()) -> TxResult<()> {
            Ok(())
        }
        async fn rollback(&self, _session: ()) -> TxResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct WarnCounter(AtomicUsize);

    impl TxLogger for WarnCounter {
        fn log(&self, _entry: &LogEntry<'_>) {}
        fn error(&self, _entry: &LogEntry<'_>) {}
        fn warn(&self, _entry: &LogEntry<'_>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn client_before_setup_is_a_configuration_error() {
        let manager = SessionManager::<NullClient>::new();
        assert!(!manager.has_client());
        let err = manager.client().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn client_after_setup() {
        let manager = SessionManager::new();
        manager.set_client(NullClient);
        assert!(manager.has_client());
        assert!(manager.client().is_ok());
    }

    #[test]
    fn logger_follows_config() {
        let counter = Arc::new(WarnCounter::default());
        let manager = SessionManager::with_client(
            NullClient,
            TxConfig::new()
                .enable_logging(true)
                .custom_logger(counter.clone()),
        );
        manager.logger().warn(&LogEntry::new("test", "warned"));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);

        manager.set_config(TxConfig::default());
        manager.logger().warn(&LogEntry::new("test", "silenced"));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_options_come_from_config() {
        let manager = SessionManager::with_client(
            NullClient,
            TxConfig::new().default_timeout(Duration::from_secs(3)),
        );
        assert_eq!(manager.default_options().timeout, Duration::from_secs(3));
    }
}
