//! Pluggable diagnostics for the propagation layer.
//!
//! The core reports what it does (joining, opening a context, rejected calls,
//! failing success callbacks) through a [`TxLogger`]. Logging is off by default;
//! see [`crate::TxConfig::enable_logging`].

use std::error::Error;
use std::fmt;

/// A single diagnostic message.
#[derive(Clone, Copy)]
pub struct LogEntry<'a> {
    /// Where the message comes from, e.g. `TxClient.transaction`.
    pub context: &'a str,
    /// Human readable message.
    pub message: &'a str,
    /// Error attached to the message, if any.
    pub error: Option<&'a (dyn Error + 'static)>,
}

impl<'a> LogEntry<'a> {
    /// Creates an entry without an attached error.
    pub fn new(context: &'a str, message: &'a str) -> Self {
        Self {
            context,
            message,
            error: None,
        }
    }

    /// Attaches an error to the entry.
    #[must_use]
    pub fn with_error(mut self, error: &'a (dyn Error + 'static)) -> Self {
        self.error = Some(error);
        self
    }
}

impl fmt::Debug for LogEntry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogEntry")
            .field("context", &self.context)
            .field("message", &self.message)
            .field("error", &self.error.map(|e| e.to_string()))
            .finish()
    }
}

/// Logger interface consumed by the core.
///
/// `debug` and `verbose` are optional and do nothing unless overridden.
pub trait TxLogger: Send + Sync {
    /// General information.
    fn log(&self, entry: &LogEntry<'_>);

    /// Failures that were handled but should be visible.
    fn error(&self, entry: &LogEntry<'_>);

    /// Suspicious usage.
    fn warn(&self, entry: &LogEntry<'_>);

    /// Debug output.
    fn debug(&self, _entry: &LogEntry<'_>) {}

    /// Step-by-step tracing of context propagation.
    fn verbose(&self, _entry: &LogEntry<'_>) {}
}

/// Discards everything. The default policy.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl TxLogger for NoopLogger {
    fn log(&self, _entry: &LogEntry<'_>) {}
    fn error(&self, _entry: &LogEntry<'_>) {}
    fn warn(&self, _entry: &LogEntry<'_>) {}
}

/// Forwards entries to `tracing` events under the `txscope` target.
///
/// `verbose` maps to `TRACE`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl TxLogger for TracingLogger {
    fn log(&self, entry: &LogEntry<'_>) {
        match entry.error {
            Some(error) => tracing::info!(
                target: "txscope",
                context = entry.context,
                error = %error,
                "{}",
                entry.message
            ),
            None => tracing::info!(
                target: "txscope",
                context = entry.context,
                "{}",
                entry.message
            ),
        }
    }

    fn error(&self, entry: &LogEntry<'_>) {
        match entry.error {
            Some(error) => tracing::error!(
                target: "txscope",
                context = entry.context,
                error = %error,
                "{}",
                entry.message
            ),
            None => tracing::error!(
                target: "txscope",
                context = entry.context,
                "{}",
                entry.message
            ),
        }
    }

    fn warn(&self, entry: &LogEntry<'_>) {
        match entry.error {
            Some(error) => tracing::warn!(
                target: "txscope",
                context = entry.context,
                error = %error,
                "{}",
                entry.message
            ),
            None => tracing::warn!(
                target: "txscope",
                context = entry.context,
                "{}",
                entry.message
            ),
        }
    }

    fn debug(&self, entry: &LogEntry<'_>) {
        tracing::debug!(target: "txscope", context = entry.context, "{}", entry.message);
    }

    fn verbose(&self, entry: &LogEntry<'_>) {
        tracing::trace!(target: "txscope", context = entry.context, "{}", entry.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TxError;

    #[test]
    fn entry_builder_attaches_error() {
        let err = TxError::NoActiveContext;
        let entry = LogEntry::new("ctx", "msg").with_error(&err);
        assert_eq!(entry.context, "ctx");
        assert_eq!(entry.message, "msg");
        assert_eq!(
            entry.error.map(|e| e.to_string()),
            Some("no active execution context".to_string())
        );
    }

    #[test]
    fn debug_renders_error_text() {
        let err = TxError::unsupported("array form");
        let entry = LogEntry::new("ctx", "msg").with_error(&err);
        let rendered = format!("{entry:?}");
        assert!(rendered.contains("array form"));
    }

    #[test]
    fn builtin_loggers_accept_every_level() {
        let entry = LogEntry::new("ctx", "msg");
        for logger in [&NoopLogger as &dyn TxLogger, &TracingLogger] {
            logger.log(&entry);
            logger.error(&entry);
            logger.warn(&entry);
            logger.debug(&entry);
            logger.verbose(&entry);
        }
    }
}
