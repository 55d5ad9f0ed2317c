//! Sync engine configuration section

use crate::validation::{ConfigSection, ValidationError, Validator};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sync cadence, batching and retry policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Run sync cycles at all
    pub enabled: bool,

    /// Seconds between scheduled cycles
    pub interval_secs: u64,

    /// Operations fetched per dequeue
    pub batch_size: usize,

    /// Concurrent remote calls within a batch
    pub max_workers: usize,

    /// Attempts before an operation becomes a terminal failure
    pub max_attempts: u32,

    /// Bound on every remote call, in seconds
    pub request_timeout_secs: u64,

    /// Maximum modification-time gap for automatic merging, in seconds
    pub merge_window_secs: u64,

    /// Backoff before the first retry, in milliseconds
    pub initial_backoff_ms: u64,

    /// Backoff ceiling, in seconds
    pub max_backoff_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
            batch_size: 50,
            max_workers: 4,
            max_attempts: 5,
            request_timeout_secs: 30,
            merge_window_secs: 15 * 60,
            initial_backoff_ms: 1_000,
            max_backoff_secs: 300,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn merge_window(&self) -> Duration {
        Duration::from_secs(self.merge_window_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

impl ConfigSection for SyncConfig {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut results = vec![
            Validator::in_range(self.interval_secs, 5, 86_400, "sync.interval_secs"),
            Validator::in_range(self.batch_size, 1, 500, "sync.batch_size"),
            Validator::in_range(self.max_workers, 1, 32, "sync.max_workers"),
            Validator::in_range(self.max_attempts, 1, 100, "sync.max_attempts"),
            Validator::in_range(self.request_timeout_secs, 1, 600, "sync.request_timeout_secs"),
            Validator::in_range(self.merge_window_secs, 0, 86_400, "sync.merge_window_secs"),
        ];

        if self.initial_backoff_ms > self.max_backoff_secs.saturating_mul(1_000) {
            results.push(Err(ValidationError::with_value(
                "sync.initial_backoff_ms",
                "must not exceed sync.max_backoff_secs",
                self.initial_backoff_ms,
            )));
        }

        Validator::collect_errors(results)
    }

    fn merge(&mut self, other: Self) {
        *self = other;
    }

    fn section_name(&self) -> &'static str {
        "sync"
    }
}
