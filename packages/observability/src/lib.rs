//! # Observability
//!
//! Logging setup for the event delivery binaries.
//!
//! Services call `observability::init()` once at startup and use the
//! standard `tracing` macros everywhere else. Library crates never install
//! a subscriber themselves; they only emit events.
//!
//! Two output formats are supported:
//!
//! - [`LogFormat::Compact`]: human-readable lines on stderr
//! - [`LogFormat::Json`]: one JSON object per line (JSONL), on stderr or
//!   appended to [`LogConfig::log_path`]
//!
//! `RUST_LOG` overrides [`LogConfig::default_level`] when set.
//!
//! ## Usage
//!
//! ```rust,ignore
//! fn main() {
//!     observability::init_with_config(observability::LogConfig {
//!         service_name: "event-courier".into(),
//!         default_level: "debug".into(),
//!         format: observability::LogFormat::Json,
//!         ..Default::default()
//!     });
//!
//!     tracing::info!("service started");
//! }
//! ```

mod json_layer;
mod writer;

pub use json_layer::{JsonLayer, LogEntry};
pub use writer::LogFileWriter;

use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compact" | "text" => Ok(Self::Compact),
            "json" | "jsonl" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, included in every JSON log line.
    pub service_name: String,

    /// Default filter directive (e.g. "info", "event_delivery=debug").
    /// `RUST_LOG` takes precedence when set.
    pub default_level: String,

    pub format: LogFormat,

    /// Append JSON lines to this file instead of stderr.
    /// Ignored for [`LogFormat::Compact`].
    pub log_path: Option<PathBuf>,

    /// Include the module path in compact output.
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            format: LogFormat::Compact,
            log_path: None,
            with_target: true,
        }
    }
}

/// Errors from installing the global subscriber.
#[derive(Error, Debug)]
pub enum InitError {
    #[error("failed to open log file: {0}")]
    LogFile(#[from] io::Error),

    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("a global subscriber is already installed")]
    AlreadyInitialized(#[from] tracing_subscriber::util::TryInitError),
}

/// Initialize logging with default settings.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize logging with custom configuration.
///
/// Failures are reported on stderr; the process keeps running without logs
/// rather than refusing to start.
pub fn init_with_config(config: LogConfig) {
    if let Err(e) = try_init_with_config(config) {
        eprintln!("observability: {e}");
    }
}

/// Initialize logging, returning an error instead of reporting it.
pub fn try_init_with_config(config: LogConfig) -> Result<(), InitError> {
    let filter = build_filter(&config.default_level)?;

    match config.format {
        LogFormat::Compact => {
            let layer = tracing_subscriber::fmt::layer()
                .with_target(config.with_target)
                .compact()
                .with_writer(io::stderr);
            tracing_subscriber::registry()
                .with(layer.with_filter(filter))
                .try_init()?;
        }
        LogFormat::Json => match &config.log_path {
            Some(path) => {
                let writer = LogFileWriter::open(path)?;
                let layer = JsonLayer::new(config.service_name.clone(), writer);
                tracing_subscriber::registry()
                    .with(layer.with_filter(filter))
                    .try_init()?;
            }
            None => {
                let layer = JsonLayer::new(config.service_name.clone(), io::stderr);
                tracing_subscriber::registry()
                    .with(layer.with_filter(filter))
                    .try_init()?;
            }
        },
    }

    tracing::debug!(
        service = %config.service_name,
        format = ?config.format,
        "observability initialized"
    );
    Ok(())
}

fn build_filter(default_level: &str) -> Result<EnvFilter, InitError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(default_level)?),
    }
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.service_name, "unknown");
        assert_eq!(config.default_level, "info");
        assert_eq!(config.format, LogFormat::Compact);
        assert!(config.log_path.is_none());
        assert!(config.with_target);
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("JSONL".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("compact".parse::<LogFormat>(), Ok(LogFormat::Compact));
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
