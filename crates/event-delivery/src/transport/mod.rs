//! Leaf transports that perform the actual I/O.
//!
//! | Scheme            | Transport                 |
//! |-------------------|---------------------------|
//! | `http`, `https`   | [`HttpTransport`]         |
//! | `udp`             | [`UdpTransport`]          |
//! | `out`             | [`OutputStreamTransport`] |
//! | `noop`            | [`NoopTransport`]         |

mod http;
mod stream;
mod udp;

pub use http::HttpTransport;
pub use stream::{NoopTransport, OutputStreamTransport};
pub use udp::{UdpTransport, MAX_DATAGRAM_SIZE};

use crate::connection::Transport;
use crate::error::{ConfigError, ConfigResult};
use crate::sampler::{EventSampler, RandomEventSampler};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use url::Url;

/// Default collector request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1_000);

/// Default `User-Agent` for network transports.
pub const DEFAULT_USER_AGENT: &str = concat!("event-delivery/", env!("CARGO_PKG_VERSION"));

/// Collector and transport configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Where events go; the scheme picks the transport.
    pub collector_url: String,
    /// Sent as a bearer token by the HTTP transport.
    pub auth_token: Option<String>,
    /// Whole-request timeout, connecting included.
    #[serde(rename = "timeout_ms", with = "crate::config::millis")]
    pub timeout: Duration,
    /// Limit on establishing the connection alone.
    #[serde(rename = "connect_timeout_ms", with = "crate::config::optional_millis")]
    pub connect_timeout: Option<Duration>,
    /// HTTP(S) proxy for all collector traffic.
    pub proxy: Option<String>,
    /// Fraction of events to send; everything when unset.
    pub sample_rate: Option<f64>,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            collector_url: "noop://".to_string(),
            auth_token: None,
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: None,
            proxy: None,
            sample_rate: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl TransportConfig {
    pub fn sampler(&self) -> ConfigResult<Option<Arc<dyn EventSampler>>> {
        match self.sample_rate {
            Some(rate) => Ok(Some(Arc::new(RandomEventSampler::new(rate)?))),
            None => Ok(None),
        }
    }
}

/// Build the transport selected by the collector URL's scheme.
pub fn from_config(config: &TransportConfig) -> ConfigResult<Arc<dyn Transport>> {
    let url = Url::parse(&config.collector_url)?;
    let sampler = config.sampler()?;

    let transport: Arc<dyn Transport> = match url.scheme() {
        "http" | "https" => {
            let mut transport = HttpTransport::new(url.clone(), config)?;
            if let Some(sampler) = sampler {
                transport = transport.with_sampler(sampler);
            }
            Arc::new(transport)
        }
        "udp" => {
            let host = url
                .host_str()
                .ok_or_else(|| ConfigError::Invalid("udp collector URL needs a host".into()))?;
            let port = url
                .port()
                .ok_or_else(|| ConfigError::Invalid("udp collector URL needs a port".into()))?;
            let mut transport = UdpTransport::new(format!("{host}:{port}"));
            if let Some(sampler) = sampler {
                transport = transport.with_sampler(sampler);
            }
            Arc::new(transport)
        }
        "out" => Arc::new(OutputStreamTransport::stdout()),
        "noop" => Arc::new(NoopTransport),
        other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
    };

    info!(transport = transport.name(), collector = %url, "Transport configured");
    Ok(transport)
}
