//! Remote service configuration section

use crate::validation::{ConfigSection, ValidationError, Validator};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where the remote record service lives and how to talk to it
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RemoteConfig {
    /// Service root, e.g. `http://localhost:8000/api/v1`
    pub base_url: String,

    /// HTTP request timeout in seconds
    pub timeout_secs: u64,

    /// Basic auth user; auth is only sent when both user and password are set
    pub username: Option<String>,

    pub password: Option<String>,

    /// Consecutive failures before the circuit breaker opens
    pub breaker_threshold: u32,

    /// Seconds the breaker stays open before probing again
    pub breaker_reset_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/v1".to_string(),
            timeout_secs: 30,
            username: None,
            password: None,
            breaker_threshold: 5,
            breaker_reset_secs: 60,
        }
    }
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("breaker_threshold", &self.breaker_threshold)
            .field("breaker_reset_secs", &self.breaker_reset_secs)
            .finish()
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn breaker_reset(&self) -> Duration {
        Duration::from_secs(self.breaker_reset_secs)
    }

    /// `(user, password)` when both are configured
    pub fn credentials(&self) -> Option<(String, String)> {
        match (&self.username, &self.password) {
            (Some(user), Some(password)) if !user.trim().is_empty() => {
                Some((user.trim().to_string(), password.clone()))
            }
            _ => None,
        }
    }
}

impl ConfigSection for RemoteConfig {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut results = vec![
            Validator::http_url(&self.base_url, "remote.base_url"),
            Validator::in_range(self.timeout_secs, 1, 600, "remote.timeout_secs"),
            Validator::in_range(self.breaker_threshold, 1, 1_000, "remote.breaker_threshold"),
            Validator::in_range(self.breaker_reset_secs, 1, 3_600, "remote.breaker_reset_secs"),
        ];

        if self.username.is_some() != self.password.is_some() {
            results.push(Err(ValidationError::new(
                "remote.password",
                "username and password must be set together",
            )));
        }

        Validator::collect_errors(results)
    }

    fn merge(&mut self, other: Self) {
        self.base_url = other.base_url;
        self.timeout_secs = other.timeout_secs;
        self.breaker_threshold = other.breaker_threshold;
        self.breaker_reset_secs = other.breaker_reset_secs;
        if other.username.is_some() {
            self.username = other.username;
        }
        if other.password.is_some() {
            self.password = other.password;
        }
    }

    fn section_name(&self) -> &'static str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = RemoteConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.credentials().is_none());
    }

    #[test]
    fn test_invalid_url() {
        let config = RemoteConfig {
            base_url: "localhost:8000".to_string(),
            ..Default::default()
        };
        assert_eq!(config.validate().unwrap_err()[0].field, "remote.base_url");
    }

    #[test]
    fn test_credentials_must_pair() {
        let config = RemoteConfig {
            username: Some("admin".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RemoteConfig {
            username: Some(" admin ".to_string()),
            password: Some("secret".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(
            config.credentials(),
            Some(("admin".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn test_debug_hides_password() {
        let config = RemoteConfig {
            username: Some("admin".to_string()),
            password: Some("secret".to_string()),
            ..Default::default()
        };
        let printed = format!("{:?}", config);
        assert!(!printed.contains("secret"));
        assert!(printed.contains("***"));
    }

    #[test]
    fn test_merge_keeps_credentials() {
        let mut base = RemoteConfig {
            username: Some("admin".to_string()),
            password: Some("secret".to_string()),
            ..Default::default()
        };
        base.merge(RemoteConfig {
            base_url: "https://lot.example.com/api".to_string(),
            ..Default::default()
        });
        assert_eq!(base.base_url, "https://lot.example.com/api");
        assert!(base.credentials().is_some());
    }
}
