//! Setup-time configuration and per-transaction options.

use crate::logger::{NoopLogger, TracingLogger, TxLogger};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Maximum lifetime of a transaction opened by the executor.
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum time a client may wait to start a transaction.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(2);

/// Transaction isolation level requested from the underlying client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    /// Dirty reads allowed.
    ReadUncommitted,
    /// Only committed data is read.
    ReadCommitted,
    /// Repeated reads return the same rows.
    RepeatableRead,
    /// Snapshot isolation.
    Snapshot,
    /// Full serializability.
    Serializable,
}

impl IsolationLevel {
    /// Returns the canonical name of the level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadUncommitted => "ReadUncommitted",
            Self::ReadCommitted => "ReadCommitted",
            Self::RepeatableRead => "RepeatableRead",
            Self::Snapshot => "Snapshot",
            Self::Serializable => "Serializable",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown isolation level name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown isolation level: {0}")]
pub struct ParseIsolationLevelError(pub String);

impl FromStr for IsolationLevel {
    type Err = ParseIsolationLevelError;

    /// Accepts `Serializable`, `serializable`, `read committed`, `READ_COMMITTED`, ...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "readuncommitted" => Ok(Self::ReadUncommitted),
            "readcommitted" => Ok(Self::ReadCommitted),
            "repeatableread" => Ok(Self::RepeatableRead),
            "snapshot" => Ok(Self::Snapshot),
            "serializable" => Ok(Self::Serializable),
            _ => Err(ParseIsolationLevelError(s.to_string())),
        }
    }
}

/// Options passed to the client when a new session is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOptions {
    /// Requested isolation level. `None` keeps the client's default.
    pub isolation_level: Option<IsolationLevel>,
    /// Maximum duration of the session before the client aborts it.
    pub timeout: Duration,
    /// Maximum time to wait for the client to start the session.
    pub max_wait: Duration,
}

impl Default for TxOptions {
    fn default() -> Self {
        Self {
            isolation_level: None,
            timeout: DEFAULT_TRANSACTION_TIMEOUT,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

impl TxOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the isolation level.
    #[must_use]
    pub const fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    /// Sets the session timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the maximum wait for session start.
    #[must_use]
    pub const fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }
}

/// Configuration supplied once at setup.
#[derive(Clone)]
pub struct TxConfig {
    /// Whether diagnostics are emitted at all.
    pub enable_logging: bool,
    /// Logger used when logging is enabled. Falls back to [`TracingLogger`].
    pub custom_logger: Option<Arc<dyn TxLogger>>,
    /// Timeout applied to transactions opened without explicit options.
    pub default_timeout: Duration,
    /// Max wait applied to transactions opened without explicit options.
    pub default_max_wait: Duration,
    /// Isolation level applied to transactions opened without explicit options.
    pub default_isolation: Option<IsolationLevel>,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            enable_logging: false,
            custom_logger: None,
            default_timeout: DEFAULT_TRANSACTION_TIMEOUT,
            default_max_wait: DEFAULT_MAX_WAIT,
            default_isolation: None,
        }
    }
}

impl fmt::Debug for TxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxConfig")
            .field("enable_logging", &self.enable_logging)
            .field("custom_logger", &self.custom_logger.is_some())
            .field("default_timeout", &self.default_timeout)
            .field("default_max_wait", &self.default_max_wait)
            .field("default_isolation", &self.default_isolation)
            .finish()
    }
}

impl TxConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables diagnostics.
    #[must_use]
    pub fn enable_logging(mut self, value: bool) -> Self {
        self.enable_logging = value;
        self
    }

    /// Sets the logger used when logging is enabled.
    #[must_use]
    pub fn custom_logger(mut self, logger: Arc<dyn TxLogger>) -> Self {
        self.custom_logger = Some(logger);
        self
    }

    /// Sets the default transaction timeout.
    #[must_use]
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Sets the default max wait.
    #[must_use]
    pub fn default_max_wait(mut self, max_wait: Duration) -> Self {
        self.default_max_wait = max_wait;
        self
    }

    /// Sets the default isolation level.
    #[must_use]
    pub fn default_isolation(mut self, level: IsolationLevel) -> Self {
        self.default_isolation = Some(level);
        self
    }

    /// Resolves the effective logger policy.
    pub fn logger(&self) -> Arc<dyn TxLogger> {
        if !self.enable_logging {
            return Arc::new(NoopLogger);
        }
        match &self.custom_logger {
            Some(logger) => Arc::clone(logger),
            None => Arc::new(TracingLogger),
        }
    }

    /// Options used when a caller does not pass any.
    pub fn default_options(&self) -> TxOptions {
        TxOptions {
            isolation_level: self.default_isolation,
            timeout: self.default_timeout,
            max_wait: self.default_max_wait,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::LogEntry;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingLogger(AtomicUsize);

    impl TxLogger for CountingLogger {
        fn log(&self, _entry: &LogEntry<'_>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn error(&self, _entry: &LogEntry<'_>) {}
        fn warn(&self, _entry: &LogEntry<'_>) {}
    }

    #[test]
    fn default_config() {
        let config = TxConfig::default();
        assert!(!config.enable_logging);
        assert!(config.custom_logger.is_none());
        assert_eq!(config.default_timeout, DEFAULT_TRANSACTION_TIMEOUT);
        assert_eq!(config.default_options(), TxOptions::default());
    }

    #[test]
    fn builder_pattern() {
        let config = TxConfig::new()
            .enable_logging(true)
            .default_timeout(Duration::from_millis(500))
            .default_isolation(IsolationLevel::Serializable);

        let options = config.default_options();
        assert_eq!(options.timeout, Duration::from_millis(500));
        assert_eq!(options.isolation_level, Some(IsolationLevel::Serializable));
        assert_eq!(options.max_wait, DEFAULT_MAX_WAIT);
    }

    #[test]
    fn custom_logger_ignored_when_logging_disabled() {
        let custom = Arc::new(CountingLogger::default());
        let config = TxConfig::new().custom_logger(custom.clone());
        config.logger().log(&LogEntry::new("test", "dropped"));
        assert_eq!(custom.0.load(Ordering::SeqCst), 0);

        let config = config.enable_logging(true);
        config.logger().log(&LogEntry::new("test", "kept"));
        assert_eq!(custom.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn isolation_level_parsing() {
        assert_eq!(
            "Serializable".parse::<IsolationLevel>(),
            Ok(IsolationLevel::Serializable)
        );
        assert_eq!(
            "read committed".parse::<IsolationLevel>(),
            Ok(IsolationLevel::ReadCommitted)
        );
        assert_eq!(
            "REPEATABLE_READ".parse::<IsolationLevel>(),
            Ok(IsolationLevel::RepeatableRead)
        );
        assert!("chaos".parse::<IsolationLevel>().is_err());
    }

    #[test]
    fn isolation_level_display_round_trips() {
        let level = IsolationLevel::ReadUncommitted;
        assert_eq!(level.to_string().parse::<IsolationLevel>(), Ok(level));
    }
}
