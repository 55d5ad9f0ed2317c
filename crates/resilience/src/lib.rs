// crates/resilience/src/lib.rs
//! Resilience patterns for talking to an unreliable remote
//!
//! This module provides:
//! - Exponential backoff schedule
//! - Circuit breaker
//! - Async timeouts
//! - Per-key async locks
//!
//! # Example
//!
//! ```rust
//! use lotkeeper_resilience::{RetryPolicy, CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! // Backoff between queue retries
//! let policy = RetryPolicy::new(5)
//!     .with_initial_delay(Duration::from_millis(500));
//! assert!(policy.delay_for_attempt(2) > policy.delay_for_attempt(1));
//!
//! // Circuit breaker around the remote client
//! let cb_config = CircuitBreakerConfig::new(5, Duration::from_secs(30));
//! let cb = CircuitBreaker::new(cb_config);
//! assert!(cb.can_proceed().is_ok());
//! ```

mod circuit_breaker;
mod error;
mod keyed_lock;
mod retry;
mod timeout;

pub use circuit_breaker::{CallError, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use error::{ResilienceError, ResilienceResult};
pub use keyed_lock::{KeyedGuard, KeyedLock};
pub use retry::RetryPolicy;
pub use timeout::with_timeout;
