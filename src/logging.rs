//! Structured logging setup.
//!
//! Logs go to stderr through a `tracing_subscriber` fmt layer. `RUST_LOG`
//! overrides the configured level when it is set.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Configuration for gateway logging.
///
/// # Example
///
/// ```rust
/// use gateway_core::logging::{LogLevel, LoggingConfig};
///
/// let config = LoggingConfig::new().with_level(LogLevel::Debug);
/// assert!(config.enabled);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Whether logging is enabled.
    pub enabled: bool,
    /// Log level filter.
    pub level: LogLevel,
    /// Whether to emit ANSI colour codes.
    pub ansi: bool,
}

impl LoggingConfig {
    /// Creates a new LoggingConfig with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a disabled logging configuration.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Sets the log level filter.
    #[must_use]
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Enables or disables ANSI colour codes.
    #[must_use]
    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: LogLevel::default(),
            ansi: false,
        }
    }
}

/// Log level filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogLevel {
    /// Trace level - most verbose.
    Trace,
    /// Debug level.
    Debug,
    /// Info level - default.
    #[default]
    Info,
    /// Warn level.
    Warn,
    /// Error level - least verbose.
    Error,
}

impl LogLevel {
    /// Returns the directive string understood by `EnvFilter`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Error raised when the global subscriber cannot be installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingError {
    /// The reason for failure.
    pub reason: String,
}

impl fmt::Display for LoggingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to initialize tracing subscriber: {}; \
             a subscriber may already be set",
            self.reason
        )
    }
}

impl std::error::Error for LoggingError {}

fn build_filter(config: &LoggingConfig) -> EnvFilter {
    match std::env::var("RUST_LOG") {
        Ok(directives) if !directives.is_empty() => EnvFilter::try_new(&directives)
            .unwrap_or_else(|_| EnvFilter::new(config.level.as_str())),
        _ => EnvFilter::new(config.level.as_str()),
    }
}

/// Installs the global tracing subscriber.
///
/// # Returns
///
/// `Ok(true)` if logging was initialized, `Ok(false)` if it is disabled.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<bool, LoggingError> {
    if !config.enabled {
        return Ok(false);
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(config.ansi)
                .with_target(false),
        )
        .with(build_filter(config))
        .try_init()
        .map_err(|e| LoggingError {
            reason: e.to_string(),
        })?;

    Ok(true)
}
