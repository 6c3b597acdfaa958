//! Error types for the delivery pipeline.

use std::time::Duration;
use thiserror::Error;

/// Failure of a single delivery attempt.
///
/// Every layer of the pipeline reports failures through this one type so
/// callers match on the variant instead of inspecting messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The collector could not be reached or answered with a retryable error.
    #[error("Transient delivery failure: {message}")]
    Transient {
        message: String,
        /// Backoff recommended by the collector (e.g. a `Retry-After` header).
        backoff: Option<Duration>,
        /// Response code, if the collector answered at all.
        response_code: Option<u16>,
    },

    /// The circuit breaker is engaged; no network attempt was made.
    #[error("Circuit open, sends are locked down for another {remaining:?}")]
    CircuitOpen { remaining: Duration },

    /// The collector is throttling this client.
    #[error("Rate limited by collector (retry after {retry_after:?})")]
    RateLimited {
        retry_after: Option<Duration>,
        response_code: u16,
    },

    /// Retrying can never succeed (unserializable payload, definitive rejection).
    #[error("Event cannot be delivered: {reason}")]
    NonRetryable {
        reason: String,
        response_code: Option<u16>,
    },
}

impl ConnectionError {
    /// Shorthand for a transient failure where the collector never answered.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            backoff: None,
            response_code: None,
        }
    }

    /// Backoff the collector asked for, if any.
    pub fn recommended_backoff(&self) -> Option<Duration> {
        match self {
            Self::Transient { backoff, .. } => *backoff,
            Self::RateLimited { retry_after, .. } => *retry_after,
            Self::CircuitOpen { .. } | Self::NonRetryable { .. } => None,
        }
    }

    /// Definitive response code, present only when the collector answered.
    pub fn response_code(&self) -> Option<u16> {
        match self {
            Self::Transient { response_code, .. } => *response_code,
            Self::RateLimited { response_code, .. } => Some(*response_code),
            Self::NonRetryable { response_code, .. } => *response_code,
            Self::CircuitOpen { .. } => None,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Whether a later attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NonRetryable { .. })
    }
}

/// Durable store error type.
#[derive(Error, Debug)]
pub enum StoreError {
    /// IO error (buffer directory, event files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored event could not be encoded or decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Store already holds its maximum number of events
    #[error("Store is full ({capacity} events)")]
    Full { capacity: usize },
}

/// Marshalling error: the event could not be turned into a request body.
#[derive(Error, Debug)]
#[error("Failed to marshal event: {0}")]
pub struct MarshalError(#[from] pub serde_json::Error);

/// Configuration error type.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading a config file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed config file
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Collector URL could not be parsed
    #[error("Invalid collector URL: {0}")]
    Url(#[from] url::ParseError),

    /// Collector URL scheme has no transport
    #[error("Unsupported collector scheme '{0}'")]
    UnsupportedScheme(String),

    /// A value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Failure to assemble a pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] delivery_lifecycle::LifecycleError),
}

/// Result type alias using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias using ConfigError.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type alias using PipelineError.
pub type PipelineResult<T> = Result<T, PipelineError>;
