// crates/network/src/client.rs
//! HTTP client wrapper with resilience

use crate::error::{NetworkError, NetworkResult};
use lotkeeper_resilience::{CallError, CircuitBreaker, CircuitBreakerConfig, CircuitState};
use reqwest::{Client as ReqwestClient, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Service root, e.g. `http://localhost:8000/api/v1`
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// User agent string
    pub user_agent: String,
    /// Basic auth credentials
    pub credentials: Option<(String, String)>,
    /// Circuit breaker config
    pub circuit_breaker_config: Option<CircuitBreakerConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/v1".to_string(),
            timeout: Duration::from_secs(30),
            user_agent: format!("Lotkeeper/{}", env!("CARGO_PKG_VERSION")),
            credentials: None,
            circuit_breaker_config: Some(CircuitBreakerConfig::new(5, Duration::from_secs(60))),
        }
    }
}

/// HTTP client bound to one service root
#[derive(Clone)]
pub struct Client {
    inner: ReqwestClient,
    base: Url,
    config: ClientConfig,
    circuit_breaker: Option<CircuitBreaker>,
}

/// Trims whitespace and trailing slashes; requires an http(s) scheme
fn parse_base_url(raw: &str) -> NetworkResult<Url> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(NetworkError::InvalidUrl("base URL must not be empty".to_string()));
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(NetworkError::InvalidUrl(format!(
            "'{}' must start with http:// or https://",
            trimmed
        )));
    }
    Url::parse(trimmed).map_err(|e| NetworkError::InvalidUrl(format!("{}: {}", trimmed, e)))
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Human-readable message from an error response body
pub(crate) fn api_error_message(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return message.trim().to_string();
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        status.canonical_reason().unwrap_or("Unknown").to_string()
    } else {
        trimmed.to_string()
    }
}

impl Client {
    /// Creates a new client with custom configuration
    pub fn with_config(config: ClientConfig) -> NetworkResult<Self> {
        let base = parse_base_url(&config.base_url)?;
        let client = ReqwestClient::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(NetworkError::Http)?;

        let circuit_breaker = config
            .circuit_breaker_config
            .as_ref()
            .map(|cfg| CircuitBreaker::new(cfg.clone()));

        Ok(Self {
            inner: client,
            base,
            config,
            circuit_breaker,
        })
    }

    /// Creates a client for `base_url` with default settings
    pub fn new(base_url: &str) -> NetworkResult<Self> {
        Self::with_config(ClientConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn circuit_state(&self) -> Option<CircuitState> {
        self.circuit_breaker.as_ref().map(|cb| cb.state())
    }

    /// URL of `segments` below the base; each segment is percent-encoded
    pub fn endpoint(&self, segments: &[&str]) -> NetworkResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| NetworkError::InvalidUrl(format!("{} cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub fn get(&self, url: Url) -> RequestBuilder {
        self.authorize(self.inner.get(url))
    }

    pub fn post(&self, url: Url) -> RequestBuilder {
        self.authorize(self.inner.post(url))
    }

    pub fn put(&self, url: Url) -> RequestBuilder {
        self.authorize(self.inner.put(url))
    }

    pub fn delete(&self, url: Url) -> RequestBuilder {
        self.authorize(self.inner.delete(url))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.credentials {
            Some((user, password)) => request.basic_auth(user, Some(password)),
            None => request,
        }
    }

    /// Sends a request through the circuit breaker.
    ///
    /// 5xx responses are errors; 4xx responses are returned for the caller to
    /// interpret and do not trip the breaker.
    pub async fn send(&self, request: RequestBuilder) -> NetworkResult<Response> {
        let attempt = async {
            let response = request.send().await?;
            let status = response.status();
            if status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                return Err(NetworkError::Status {
                    status: status.as_u16(),
                    message: api_error_message(status, &body),
                });
            }
            Ok(response)
        };

        let Some(cb) = &self.circuit_breaker else {
            return attempt.await;
        };
        match cb.call(attempt, NetworkError::counts_against_service).await {
            Ok(response) => Ok(response),
            Err(CallError::Rejected(e)) => Err(NetworkError::Resilience(e)),
            Err(CallError::Inner(e)) => Err(e),
        }
    }

    /// Turns any non-success response into [`NetworkError::Status`]
    pub async fn expect_success(response: Response) -> NetworkResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(NetworkError::Status {
            status: status.as_u16(),
            message: api_error_message(status, &body),
        })
    }
}
