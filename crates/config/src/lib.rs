//! Lotkeeper Configuration System
//!
//! TOML configuration split into sections that each implement
//! [`ConfigSection`]. Files are written atomically and invalid values are
//! reported rather than silently replaced.
//!
//! # Example
//!
//! ```rust,no_run
//! use lotkeeper_config::{Config, ConfigManager};
//!
//! let manager = ConfigManager::new().expect("Failed to initialize config");
//! let config = manager.load().unwrap_or_else(|e| {
//!     eprintln!("Config error: {}, using defaults", e);
//!     Config::default()
//! });
//!
//! println!("Remote: {}", config.remote.base_url);
//! ```

mod error;
mod manager;
mod persistence;
mod validation;

pub mod app_config;
mod fee_config;
mod remote_config;
mod sync_config;

pub use error::{ConfigError, ConfigResult, ValidationError};
pub use manager::{apply_overrides, ConfigManager, ENV_PREFIX};
pub use validation::{ConfigSection, Validator};

pub use app_config::{AppConfig, LogLevel};
pub use fee_config::FeeConfig;
pub use remote_config::RemoteConfig;
pub use sync_config::SyncConfig;

use serde::{Deserialize, Serialize};

/// Current config file format version
pub const CONFIG_VERSION: u32 = 1;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Config file format version
    pub version: u32,

    pub app: AppConfig,

    pub sync: SyncConfig,

    pub remote: RemoteConfig,

    pub fees: FeeConfig,
}

fn collect<S: ConfigSection>(section: &S, errors: &mut Vec<ValidationError>) {
    if let Err(mut e) = section.validate() {
        errors.append(&mut e);
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates every section, returning all problems found
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        collect(&self.app, &mut errors);
        collect(&self.sync, &mut errors);
        collect(&self.remote, &mut errors);
        collect(&self.fees, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Merges another config into this one, preferring values from `other`
    pub fn merge(&mut self, other: Config) {
        self.app.merge(other.app);
        self.sync.merge(other.sync);
        self.remote.merge(other.remote);
        self.fees.merge(other.fees);
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            app: AppConfig::default(),
            sync: SyncConfig::default(),
            remote: RemoteConfig::default(),
            fees: FeeConfig::default(),
        }
    }
}
