//! Pipeline configuration.
//!
//! Values are layered: built-in defaults, then an optional JSON file, then
//! `EVENT_DELIVERY_*` environment variables. Durations are written in
//! milliseconds; for optional durations `null` or a negative number means
//! "unset" (for shutdown timeouts: wait indefinitely).

use crate::buffer::{BufferConfig, RetentionPolicy};
use crate::dispatch::{DispatchConfig, DispatchPriority, OverflowPolicy};
use crate::error::{ConfigError, ConfigResult};
use crate::lockdown::LockdownConfig;
use crate::transport::TransportConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "EVENT_DELIVERY_";

const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "udp", "out", "noop"];

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub transport: TransportConfig,
    pub lockdown: LockdownConfig,
    #[serde(rename = "async")]
    pub dispatch: DispatchConfig,
    pub buffer: BufferConfig,
}

impl PipelineConfig {
    /// Defaults, then `path` if given, then the environment; validated.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file. Missing fields keep their defaults.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Override configuration from `EVENT_DELIVERY_*` environment variables.
    pub fn load_from_env(&mut self) -> ConfigResult<()> {
        self.apply_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Apply overrides from any key lookup (keys are given without the prefix).
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> ConfigResult<()> {
        let env = Overrides { lookup: &lookup };

        if let Some(url) = env.get("COLLECTOR_URL") {
            self.transport.collector_url = url;
        }
        if let Some(token) = env.get("AUTH_TOKEN") {
            self.transport.auth_token = Some(token).filter(|t| !t.is_empty());
        }
        if let Some(ms) = env.parse::<u64>("TIMEOUT_MS")? {
            self.transport.timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env.parse::<i64>("CONNECT_TIMEOUT_MS")? {
            self.transport.connect_timeout = optional_millis::from_signed(ms);
        }
        if let Some(proxy) = env.get("PROXY") {
            self.transport.proxy = Some(proxy).filter(|p| !p.is_empty());
        }
        if let Some(rate) = env.parse::<f64>("SAMPLE_RATE")? {
            self.transport.sample_rate = Some(rate);
        }

        if let Some(ms) = env.parse::<u64>("LOCKDOWN_BASE_MS")? {
            self.lockdown.base_duration = Duration::from_millis(ms);
        }
        if let Some(ms) = env.parse::<u64>("LOCKDOWN_MAX_MS")? {
            self.lockdown.max_duration = Duration::from_millis(ms);
        }

        if let Some(enabled) = env.parse::<bool>("ASYNC_ENABLED")? {
            self.dispatch.enabled = enabled;
        }
        if let Some(workers) = env.parse::<usize>("ASYNC_WORKERS")? {
            self.dispatch.workers = workers;
        }
        if let Some(priority) = env.variant::<DispatchPriority>("ASYNC_PRIORITY")? {
            self.dispatch.priority = priority;
        }
        if let Some(size) = env.parse::<i64>("ASYNC_QUEUE_SIZE")? {
            self.dispatch.queue_size = usize::try_from(size).ok();
        }
        if let Some(overflow) = env.variant::<OverflowPolicy>("ASYNC_OVERFLOW")? {
            self.dispatch.overflow = overflow;
        }
        if let Some(graceful) = env.parse::<bool>("ASYNC_GRACEFUL_SHUTDOWN")? {
            self.dispatch.graceful_shutdown = graceful;
        }
        if let Some(ms) = env.parse::<i64>("ASYNC_SHUTDOWN_TIMEOUT_MS")? {
            self.dispatch.shutdown_timeout = optional_millis::from_signed(ms);
        }

        if let Some(enabled) = env.parse::<bool>("BUFFER_ENABLED")? {
            self.buffer.enabled = enabled;
        }
        if let Some(dir) = env.get("BUFFER_DIR") {
            self.buffer.dir = Some(PathBuf::from(dir)).filter(|d| !d.as_os_str().is_empty());
        }
        if let Some(max) = env.parse::<usize>("BUFFER_MAX_EVENTS")? {
            self.buffer.max_events = max;
        }
        if let Some(ms) = env.parse::<u64>("BUFFER_FLUSH_INTERVAL_MS")? {
            self.buffer.flush_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env.parse::<i64>("BUFFER_MIN_AGE_MS")? {
            self.buffer.min_age = optional_millis::from_signed(ms);
        }
        if let Some(retention) = env.variant::<RetentionPolicy>("BUFFER_RETENTION")? {
            self.buffer.retention = retention;
        }
        if let Some(graceful) = env.parse::<bool>("BUFFER_GRACEFUL_SHUTDOWN")? {
            self.buffer.graceful_shutdown = graceful;
        }
        if let Some(ms) = env.parse::<i64>("BUFFER_SHUTDOWN_TIMEOUT_MS")? {
            self.buffer.shutdown_timeout = optional_millis::from_signed(ms);
        }

        Ok(())
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        let url = Url::parse(&self.transport.collector_url)?;
        if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
            return Err(ConfigError::UnsupportedScheme(url.scheme().to_string()));
        }
        if let Some(rate) = self.transport.sample_rate {
            if !(0.0..=1.0).contains(&rate) {
                return invalid(format!("sample_rate must be between 0 and 1, got {rate}"));
            }
        }
        if self.transport.timeout.is_zero() {
            return invalid("transport timeout must be positive");
        }
        if self.transport.connect_timeout == Some(Duration::ZERO) {
            return invalid("transport connect timeout must be positive");
        }
        if let Some(proxy) = &self.transport.proxy {
            let proxy = Url::parse(proxy)?;
            if !matches!(proxy.scheme(), "http" | "https") {
                return invalid(format!("unsupported proxy scheme: {}", proxy.scheme()));
            }
        }

        if self.lockdown.base_duration.is_zero() {
            return invalid("lockdown base must be positive");
        }
        if self.lockdown.base_duration > self.lockdown.max_duration {
            return invalid("lockdown base must not exceed lockdown max");
        }

        if self.dispatch.workers == 0 {
            return invalid("async workers must be at least 1");
        }
        if self.dispatch.queue_size == Some(0) {
            return invalid("async queue size must be at least 1");
        }

        if self.buffer.max_events == 0 {
            return invalid("buffer max_events must be at least 1");
        }
        if self.buffer.flush_interval.is_zero() {
            return invalid("buffer flush interval must be positive");
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ConfigResult<()> {
    Err(ConfigError::Invalid(message.into()))
}

struct Overrides<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Overrides<'_> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    fn parse<T: FromStr>(&self, key: &str) -> ConfigResult<Option<T>>
    where
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|e| ConfigError::Invalid(format!("{ENV_PREFIX}{key}={raw}: {e}"))),
            None => Ok(None),
        }
    }

    /// Parse a snake_case enum variant name.
    fn variant<T: DeserializeOwned>(&self, key: &str) -> ConfigResult<Option<T>> {
        match self.get(key) {
            Some(raw) => serde_json::from_value(serde_json::Value::String(raw.trim().to_string()))
                .map(Some)
                .map_err(|e| ConfigError::Invalid(format!("{ENV_PREFIX}{key}={raw}: {e}"))),
            None => Ok(None),
        }
    }
}

/// `Duration` as integer milliseconds.
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// `Option<Duration>` as milliseconds; `null` or negative is `None`.
pub(crate) mod optional_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn from_signed(ms: i64) -> Option<Duration> {
        u64::try_from(ms).ok().map(Duration::from_millis)
    }

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<i64>::deserialize(deserializer)?.and_then(from_signed))
    }
}
