//! Structured Logging
//!
//! Tracing setup for the peg client: human-readable output for interactive
//! CLI use, JSON for log aggregation. The `PEG_LOG_LEVEL` environment
//! variable (or `RUST_LOG` filter directives) control verbosity.

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

/// Logging errors
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to initialize logging: {0}")]
    Init(String),
}

/// Application log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl From<&str> for LogLevel {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// Initialize global logging.
///
/// `json` switches to newline-delimited JSON events for aggregation
/// services; interactive use wants it off.
pub fn init_logging(level: LogLevel, json: bool) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pegbtc={}", Level::from(level))));

    let result = if json {
        fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .try_init()
    } else {
        fmt().with_env_filter(filter).with_target(false).try_init()
    };

    result.map_err(|e| LoggingError::Init(e.to_string()))
}

/// Initialize from the `PEG_LOG_LEVEL` environment variable
pub fn init_from_env() -> Result<(), LoggingError> {
    let level = std::env::var("PEG_LOG_LEVEL")
        .map(|s| LogLevel::from(s.as_str()))
        .unwrap_or(LogLevel::Info);
    init_logging(level, false)
}
