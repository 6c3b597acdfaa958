//! HTTP(S) transport.

use super::TransportConfig;
use crate::connection::{SendOutcome, Transport};
use crate::error::{ConfigError, ConfigResult, ConnectionError};
use crate::event::Event;
use crate::marshaller::{JsonMarshaller, Marshaller};
use crate::sampler::EventSampler;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_ENCODING, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, Proxy, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

/// Posts each event to the collector as one request.
///
/// Status mapping:
/// - 2xx: delivered
/// - 403: filtered by the collector, treated as success
/// - 429: rate limited, honoring `Retry-After`
/// - anything else: transient failure carrying the status code
#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
    url: Url,
    auth_token: Option<String>,
    marshaller: Arc<dyn Marshaller>,
    sampler: Option<Arc<dyn EventSampler>>,
}

impl HttpTransport {
    pub fn new(url: Url, config: &TransportConfig) -> ConfigResult<Self> {
        let mut builder = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone());
        if let Some(connect_timeout) = config.connect_timeout {
            builder = builder.connect_timeout(connect_timeout);
        }
        if let Some(proxy) = &config.proxy {
            let proxy = Proxy::all(proxy)
                .map_err(|e| ConfigError::Invalid(format!("invalid proxy {proxy}: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| ConfigError::Invalid(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url,
            auth_token: config.auth_token.clone(),
            marshaller: Arc::new(JsonMarshaller),
            sampler: None,
        })
    }

    pub fn with_sampler(mut self, sampler: Arc<dyn EventSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn with_marshaller(mut self, marshaller: Arc<dyn Marshaller>) -> Self {
        self.marshaller = marshaller;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// `Retry-After` in (possibly fractional) seconds.
///
/// Values a `Duration` cannot hold are ignored, leaving the default backoff.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let seconds: f64 = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()?;
    Duration::try_from_secs_f64(seconds).ok()
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn do_send(&self, event: &Event) -> Result<SendOutcome, ConnectionError> {
        if let Some(sampler) = &self.sampler {
            if !sampler.should_send_event(event) {
                return Ok(SendOutcome::SampledOut);
            }
        }

        let body = self
            .marshaller
            .marshall(event)
            .map_err(|e| ConnectionError::NonRetryable {
                reason: e.to_string(),
                response_code: None,
            })?;

        let mut request = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, self.marshaller.content_type())
            .body(body);
        if let Some(encoding) = self.marshaller.content_encoding() {
            request = request.header(CONTENT_ENCODING, encoding);
        }
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            ConnectionError::unreachable(format!("couldn't reach the collector: {e}"))
        })?;

        let status = response.status();
        if status.is_success() {
            trace!(event_id = %event.id, status = status.as_u16(), "Event delivered");
            return Ok(SendOutcome::Delivered);
        }

        let code = status.as_u16();
        if status == StatusCode::FORBIDDEN {
            debug!(event_id = %event.id, "Event was rejected by the collector's filters");
            return Ok(SendOutcome::Filtered {
                response_code: code,
            });
        }

        let retry_after = parse_retry_after(response.headers());
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ConnectionError::RateLimited {
                retry_after,
                response_code: code,
            });
        }

        let detail = response.text().await.unwrap_or_default();
        Err(ConnectionError::Transient {
            message: format!("collector responded with HTTP {code}: {}", detail.trim()),
            backoff: retry_after,
            response_code: Some(code),
        })
    }
}
