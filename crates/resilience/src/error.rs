// crates/resilience/src/error.rs
//! Error types for resilience operations

use thiserror::Error;

/// Result type for resilience operations
pub type ResilienceResult<T> = Result<T, ResilienceError>;

/// Errors that can occur in resilience operations
#[derive(Debug, Error)]
pub enum ResilienceError {
    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Circuit breaker is open
    #[error(
        "Circuit breaker is open (failures: {failures}, last failure: {last_failure_ago:?} ago)"
    )]
    CircuitBreakerOpen {
        failures: usize,
        last_failure_ago: std::time::Duration,
    },

    /// Custom error
    #[error("{0}")]
    Custom(String),
}

impl ResilienceError {
    /// Timeouts and an open breaker clear up on their own
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::CircuitBreakerOpen { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_error() {
        let err = ResilienceError::Timeout(std::time::Duration::from_secs(5));
        assert!(err.to_string().contains("timed out"));
        assert!(err.to_string().contains("5s"));
        assert!(err.is_transient());
    }

    #[test]
    fn test_circuit_breaker_error() {
        let err = ResilienceError::CircuitBreakerOpen {
            failures: 5,
            last_failure_ago: std::time::Duration::from_secs(10),
        };
        assert!(err.to_string().contains("Circuit breaker"));
        assert!(err.is_transient());
    }
}
