// crates/resilience/src/circuit_breaker.rs
//! Circuit breaker pattern implementation
//!
//! Wraps calls to the remote service so that a dead endpoint fails fast
//! instead of tying up every push worker until its timeout.

use crate::error::{ResilienceError, ResilienceResult};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests are rejected
    Open,
    /// Circuit is half-open, testing if service recovered
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    failure_threshold: usize,
    /// Duration to wait before trying again after opening
    timeout: Duration,
    /// Number of successful requests needed to close from half-open
    success_threshold: usize,
}

impl CircuitBreakerConfig {
    /// Creates a new configuration
    pub fn new(failure_threshold: usize, timeout: Duration) -> Self {
        Self {
            failure_threshold,
            timeout,
            success_threshold: 1,
        }
    }

    /// Sets the success threshold
    pub fn with_success_threshold(mut self, threshold: usize) -> Self {
        self.success_threshold = threshold;
        self
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30))
    }
}

#[derive(Debug)]
struct CircuitBreakerState {
    state: CircuitState,
    failure_count: usize,
    success_count: usize,
    last_failure_time: Option<Instant>,
}

/// Circuit breaker shared by clones
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Arc<Mutex<CircuitBreakerState>>,
}

impl CircuitBreaker {
    /// Creates a new circuit breaker
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(CircuitBreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
            })),
        }
    }

    /// Gets the current state
    pub fn state(&self) -> CircuitState {
        self.state.lock().map(|s| s.state).unwrap_or(CircuitState::Open)
    }

    pub fn failure_count(&self) -> usize {
        self.state.lock().map(|s| s.failure_count).unwrap_or(0)
    }

    /// Records a successful operation
    pub fn record_success(&self) {
        if let Ok(mut state) = self.state.lock() {
            match state.state {
                CircuitState::HalfOpen => {
                    state.success_count += 1;
                    if state.success_count >= self.config.success_threshold {
                        log::info!("Circuit breaker closed after successful trial call");
                        state.state = CircuitState::Closed;
                        state.failure_count = 0;
                        state.success_count = 0;
                    }
                }
                CircuitState::Closed => {
                    state.failure_count = 0;
                }
                CircuitState::Open => {}
            }
        }
    }

    /// Records a failed operation
    pub fn record_failure(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.failure_count += 1;
            state.last_failure_time = Some(Instant::now());
            state.success_count = 0;

            let should_open = state.state == CircuitState::HalfOpen
                || state.failure_count >= self.config.failure_threshold;
            if should_open && state.state != CircuitState::Open {
                log::warn!(
                    "Circuit breaker opened after {} consecutive failures",
                    state.failure_count
                );
                state.state = CircuitState::Open;
            }
        }
    }

    /// Checks if a request can proceed
    pub fn can_proceed(&self) -> ResilienceResult<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ResilienceError::Custom("Lock poisoned".to_string()))?;

        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = state
                    .last_failure_time
                    .map(|t| t.elapsed())
                    .unwrap_or(self.config.timeout);
                if elapsed >= self.config.timeout {
                    state.state = CircuitState::HalfOpen;
                    state.success_count = 0;
                    Ok(())
                } else {
                    Err(ResilienceError::CircuitBreakerOpen {
                        failures: state.failure_count,
                        last_failure_ago: elapsed,
                    })
                }
            }
        }
    }

    /// Runs an async operation through the breaker.
    ///
    /// `counts_as_failure` decides which errors trip the breaker; a remote
    /// rejecting a single request is not a sign the service is down.
    pub async fn call<F, T, E, P>(&self, operation: F, counts_as_failure: P) -> Result<T, CallError<E>>
    where
        F: Future<Output = Result<T, E>>,
        P: FnOnce(&E) -> bool,
    {
        self.can_proceed().map_err(CallError::Rejected)?;

        match operation.await {
            Ok(result) => {
                self.record_success();
                Ok(result)
            }
            Err(e) => {
                if counts_as_failure(&e) {
                    self.record_failure();
                } else {
                    self.record_success();
                }
                Err(CallError::Inner(e))
            }
        }
    }

    /// Resets the circuit breaker to closed state
    pub fn reset(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.state = CircuitState::Closed;
            state.failure_count = 0;
            state.success_count = 0;
            state.last_failure_time = None;
        }
    }
}

/// Failure of a call made through a [`CircuitBreaker`]
#[derive(Debug)]
pub enum CallError<E> {
    /// The breaker is open; the operation never ran
    Rejected(ResilienceError),
    /// The operation ran and failed
    Inner(E),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_breaker_initial_state() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_circuit_opens_after_threshold() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(3, Duration::from_secs(1)));

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.can_proceed().is_err());
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(2, Duration::from_secs(1)));
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_trial_closes_or_reopens() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(2, Duration::from_millis(30)));
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(40));
        assert!(cb.can_proceed().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(40));
        assert!(cb.can_proceed().is_ok());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_needs_enough_successes() {
        let config =
            CircuitBreakerConfig::new(1, Duration::from_millis(20)).with_success_threshold(2);
        let cb = CircuitBreaker::new(config);
        cb.record_failure();

        std::thread::sleep(Duration::from_millis(30));
        assert!(cb.can_proceed().is_ok());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_call_ignores_non_tripping_errors() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(1, Duration::from_secs(10)));

        let result = cb
            .call(async { Err::<(), _>("rejected") }, |_| false)
            .await;
        assert!(matches!(result, Err(CallError::Inner("rejected"))));
        assert_eq!(cb.state(), CircuitState::Closed);

        let result = cb.call(async { Err::<(), _>("down") }, |_| true).await;
        assert!(matches!(result, Err(CallError::Inner("down"))));
        assert_eq!(cb.state(), CircuitState::Open);

        let result = cb.call(async { Ok::<_, &str>(1) }, |_| true).await;
        assert!(matches!(result, Err(CallError::Rejected(_))));
    }

    #[test]
    fn test_circuit_breaker_reset() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(2, Duration::from_secs(1)));
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
