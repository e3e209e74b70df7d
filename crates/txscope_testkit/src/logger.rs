//! A logger that keeps every entry for later assertions.

use parking_lot::Mutex;
use txscope_core::{LogEntry, TracingLogger, TxLogger};

/// Level an entry was logged at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    /// `log`
    Log,
    /// `error`
    Error,
    /// `warn`
    Warn,
    /// `debug`
    Debug,
    /// `verbose`
    Verbose,
}

/// An owned copy of a [`LogEntry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEntry {
    /// Level the entry was logged at.
    pub level: LogLevel,
    /// Where the entry comes from.
    pub context: String,
    /// The message.
    pub message: String,
    /// Rendered attached error, if any.
    pub error: Option<String>,
}

/// Records every entry it receives.
#[derive(Debug, Default)]
pub struct RecordingLogger {
    entries: Mutex<Vec<RecordedEntry>>,
    forward: Option<TracingLogger>,
}

impl RecordingLogger {
    /// Creates an empty logger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty logger that also emits every entry as a `tracing` event.
    #[must_use]
    pub fn forwarding() -> Self {
        Self {
            entries: Mutex::default(),
            forward: Some(TracingLogger),
        }
    }

    /// Returns a copy of every recorded entry.
    pub fn entries(&self) -> Vec<RecordedEntry> {
        self.entries.lock().clone()
    }

    /// Returns the entries logged at `level`.
    pub fn at(&self, level: LogLevel) -> Vec<RecordedEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.level == level)
            .cloned()
            .collect()
    }

    /// Counts entries at `level` whose message contains `needle`.
    pub fn count(&self, level: LogLevel, needle: &str) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.level == level && entry.message.contains(needle))
            .count()
    }

    /// Returns true if an entry at `level` contains `needle`.
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.count(level, needle) > 0
    }

    /// Forgets every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    fn record(&self, level: LogLevel, entry: &LogEntry<'_>) {
        self.entries.lock().push(RecordedEntry {
            level,
            context: entry.context.to_string(),
            message: entry.message.to_string(),
            error: entry.error.map(ToString::to_string),
        });
    }
}

impl TxLogger for RecordingLogger {
    fn log(&self, entry: &LogEntry<'_>) {
        self.record(LogLevel::Log, entry);
        if let Some(forward) = &self.forward {
            forward.log(entry);
        }
    }

    fn error(&self, entry: &LogEntry<'_>) {
        self.record(LogLevel::Error, entry);
        if let Some(forward) = &self.forward {
            forward.error(entry);
        }
    }

    fn warn(&self, entry: &LogEntry<'_>) {
        self.record(LogLevel::Warn, entry);
        if let Some(forward) = &self.forward {
            forward.warn(entry);
        }
    }

    fn debug(&self, entry: &LogEntry<'_>) {
        self.record(LogLevel::Debug, entry);
        if let Some(forward) = &self.forward {
            forward.debug(entry);
        }
    }

    fn verbose(&self, entry: &LogEntry<'_>) {
        self.record(LogLevel::Verbose, entry);
        if let Some(forward) = &self.forward {
            forward.verbose(entry);
        }
    }
}
