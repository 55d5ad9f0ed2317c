// crates/network/src/error.rs
//! Error types for network operations

use lotkeeper_resilience::ResilienceError;
use lotkeeper_sync_engine::RemoteError;
use thiserror::Error;

/// Result type for network operations
pub type NetworkResult<T> = Result<T, NetworkError>;

/// Errors that can occur during network operations
#[derive(Debug, Error)]
pub enum NetworkError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Non-success response
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// Response body did not match the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Resilience error
    #[error("Resilience error: {0}")]
    Resilience(#[from] ResilienceError),
}

impl NetworkError {
    /// Returns true if the error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            NetworkError::Http(e) => !e.is_builder() && !e.is_redirect(),
            NetworkError::Status { status, .. } => is_retryable_status(*status),
            NetworkError::Resilience(e) => e.is_transient(),
            NetworkError::InvalidUrl(_) | NetworkError::InvalidResponse(_) => false,
        }
    }

    /// Whether the failure suggests the service itself is unhealthy
    pub fn counts_against_service(&self) -> bool {
        match self {
            NetworkError::Http(e) => e.is_connect() || e.is_timeout(),
            NetworkError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns true if the error is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        matches!(self, NetworkError::Status { status, .. } if (400..500).contains(status))
    }
}

/// Request timeout and throttling are worth retrying; other 4xx are not
fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || status >= 500
}

impl From<NetworkError> for RemoteError {
    fn from(err: NetworkError) -> Self {
        let message = err.to_string();
        match err {
            NetworkError::Http(e) if e.is_connect() => RemoteError::Unreachable(message),
            NetworkError::Http(e) if e.is_builder() => RemoteError::Permanent(message),
            NetworkError::Http(_) => RemoteError::Transient(message),
            NetworkError::Status { status: 404, .. } => RemoteError::NotFound(message),
            NetworkError::Status { status, .. } if is_retryable_status(status) => {
                RemoteError::Transient(message)
            }
            NetworkError::Status { .. } => RemoteError::Permanent(message),
            NetworkError::Resilience(ResilienceError::CircuitBreakerOpen { .. }) => {
                RemoteError::Unreachable(message)
            }
            NetworkError::Resilience(_) => RemoteError::Transient(message),
            NetworkError::InvalidUrl(_) => RemoteError::Permanent(message),
            NetworkError::InvalidResponse(_) => RemoteError::Transient(message),
        }
    }
}
