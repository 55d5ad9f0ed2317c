//! Configuration manager - main API for config operations

use crate::persistence::ConfigPersistence;
use crate::{Config, ConfigError, ConfigResult, LogLevel};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Prefix of environment overrides, e.g. `LOTKEEPER_REMOTE_BASE_URL`
pub const ENV_PREFIX: &str = "LOTKEEPER_";

/// Main configuration manager
///
/// Owns the config file location and the data directory that relative
/// database paths are resolved against.
pub struct ConfigManager {
    persistence: ConfigPersistence,
    config_dir: PathBuf,
    data_dir: PathBuf,
}

impl ConfigManager {
    /// Creates a manager using the platform directories
    ///
    /// - Linux: `~/.config/lotkeeper/` and `~/.local/share/lotkeeper/`
    /// - macOS: `~/Library/Application Support/lotkeeper/`
    /// - Windows: `%APPDATA%\lotkeeper\`
    pub fn new() -> ConfigResult<Self> {
        let dirs = ProjectDirs::from("", "", "lotkeeper").ok_or_else(|| {
            ConfigError::PathResolutionError {
                reason: "Could not determine user config directory".to_string(),
            }
        })?;
        Ok(Self::with_directories(
            dirs.config_dir().to_path_buf(),
            dirs.data_dir().to_path_buf(),
        ))
    }

    /// Keeps both the config file and the databases under `dir`
    pub fn with_directory(dir: PathBuf) -> ConfigResult<Self> {
        Ok(Self::with_directories(dir.clone(), dir))
    }

    pub fn with_directories(config_dir: PathBuf, data_dir: PathBuf) -> Self {
        Self {
            persistence: ConfigPersistence::new(config_dir.join("config.toml")),
            config_dir,
            data_dir,
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.persistence.path().to_path_buf()
    }

    /// Loads the configuration; a missing file yields defaults
    pub fn load(&self) -> ConfigResult<Config> {
        self.persistence.load()
    }

    /// Loads the configuration, falling back to defaults on any error
    pub fn load_or_default(&self) -> Config {
        match self.load() {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Failed to load config: {}, using defaults", e);
                Config::default()
            }
        }
    }

    /// Validates and saves the configuration atomically
    pub fn save(&self, config: &Config) -> ConfigResult<()> {
        self.persistence.save(config)
    }

    /// Loads, applies `update_fn` and saves the result
    ///
    /// ```rust,no_run
    /// # use lotkeeper_config::ConfigManager;
    /// # let manager = ConfigManager::new().unwrap();
    /// manager.update(|config| {
    ///     config.sync.interval_secs = 60;
    /// }).expect("Failed to update config");
    /// ```
    pub fn update<F>(&self, update_fn: F) -> ConfigResult<()>
    where
        F: FnOnce(&mut Config),
    {
        let mut config = self.load()?;
        update_fn(&mut config);
        self.save(&config)
    }

    /// Writes a default config file if none exists
    ///
    /// Returns `Ok(true)` if a new file was created.
    pub fn initialize(&self) -> ConfigResult<bool> {
        if self.config_path().exists() {
            log::info!(
                "Config file already exists at {}",
                self.config_path().display()
            );
            return Ok(false);
        }

        self.save(&Config::default())?;
        log::info!("Generated default config at {}", self.config_path().display());
        Ok(true)
    }

    /// Overwrites the config file with defaults
    pub fn reset(&self) -> ConfigResult<()> {
        self.save(&Config::default())
    }

    /// Validates the current configuration file, returning readable problems
    pub fn validate(&self) -> ConfigResult<Vec<String>> {
        let config = self.load()?;

        match config.validate() {
            Ok(()) => Ok(Vec::new()),
            Err(errors) => Ok(errors.iter().map(|e| e.to_string()).collect()),
        }
    }

    /// Loads the file and applies `LOTKEEPER_*` environment overrides
    pub fn load_with_env_overrides(&self) -> ConfigResult<Config> {
        let mut config = self.load()?;
        apply_overrides(&mut config, |key| std::env::var(key).ok());

        if let Err(errors) = config.validate() {
            log::warn!(
                "Config validation warnings after env overrides: {:?}",
                errors
            );
        }

        Ok(config)
    }
}

fn parse_or_warn<T: std::str::FromStr>(key: &str, raw: &str) -> Option<T> {
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring {}{}={:?}: not a valid value", ENV_PREFIX, key, raw);
            None
        }
    }
}

/// Applies overrides looked up by `lookup` (normally the process environment)
pub fn apply_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let var = |key: &str| lookup(&format!("{}{}", ENV_PREFIX, key));

    if let Some(path) = var("APP_DATABASE_PATH") {
        config.app.database_path = PathBuf::from(path);
    }
    if let Some(path) = var("APP_QUEUE_PATH") {
        config.app.queue_path = PathBuf::from(path);
    }
    if let Some(level) = var("APP_LOG_LEVEL") {
        if let Some(level) = parse_or_warn::<LogLevel>("APP_LOG_LEVEL", &level) {
            config.app.log_level = level;
        }
    }

    if let Some(enabled) = var("SYNC_ENABLED") {
        if let Some(enabled) = parse_or_warn("SYNC_ENABLED", &enabled) {
            config.sync.enabled = enabled;
        }
    }
    if let Some(secs) = var("SYNC_INTERVAL_SECS") {
        if let Some(secs) = parse_or_warn("SYNC_INTERVAL_SECS", &secs) {
            config.sync.interval_secs = secs;
        }
    }

    if let Some(url) = var("REMOTE_BASE_URL") {
        config.remote.base_url = url.trim().to_string();
    }
    if let Some(user) = var("REMOTE_USERNAME") {
        config.remote.username = Some(user);
    }
    if let Some(password) = var("REMOTE_PASSWORD") {
        config.remote.password = Some(password);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn setup_test_manager() -> (TempDir, ConfigManager) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let manager = ConfigManager::with_directory(temp_dir.path().to_path_buf())
            .expect("Failed to create manager");
        (temp_dir, manager)
    }

    #[test]
    fn test_load_or_default_with_missing_file() {
        let (_temp_dir, manager) = setup_test_manager();
        assert_eq!(manager.load_or_default(), Config::default());
    }

    #[test]
    fn test_update() {
        let (_temp_dir, manager) = setup_test_manager();
        manager.save(&Config::default()).expect("Should save");

        manager
            .update(|config| config.sync.interval_secs = 60)
            .expect("Should update");

        let loaded = manager.load().expect("Should load");
        assert_eq!(loaded.sync.interval_secs, 60);
    }

    #[test]
    fn test_initialize_once() {
        let (_temp_dir, manager) = setup_test_manager();

        assert!(manager.initialize().expect("Should initialize"));
        assert!(manager.config_path().exists());
        assert!(!manager.initialize().expect("Should initialize"));
    }

    #[test]
    fn test_reset() {
        let (_temp_dir, manager) = setup_test_manager();

        let mut config = Config::default();
        config.sync.enabled = false;
        manager.save(&config).expect("Should save");
        manager.reset().expect("Should reset");

        assert_eq!(manager.load().expect("Should load"), Config::default());
    }

    #[test]
    fn test_validate_reports_problems() {
        let (_temp_dir, manager) = setup_test_manager();
        std::fs::write(manager.config_path(), "[sync]\nmax_workers = 0\n").expect("write");

        let problems = manager.validate().expect("Should validate");
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("sync.max_workers"));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("LOTKEEPER_REMOTE_BASE_URL", " https://lot.example.com/api "),
            ("LOTKEEPER_REMOTE_USERNAME", "gate"),
            ("LOTKEEPER_REMOTE_PASSWORD", "s3cret"),
            ("LOTKEEPER_SYNC_ENABLED", "false"),
            ("LOTKEEPER_SYNC_INTERVAL_SECS", "soon"),
            ("LOTKEEPER_APP_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        apply_overrides(&mut config, |key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.remote.base_url, "https://lot.example.com/api");
        assert_eq!(
            config.remote.credentials(),
            Some(("gate".to_string(), "s3cret".to_string()))
        );
        assert!(!config.sync.enabled);
        // Unparsable values are ignored
        assert_eq!(config.sync.interval_secs, 300);
        assert_eq!(config.app.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_paths() {
        let manager = ConfigManager::with_directories(
            PathBuf::from("/etc/lotkeeper"),
            PathBuf::from("/var/lib/lotkeeper"),
        );
        assert_eq!(manager.config_path(), PathBuf::from("/etc/lotkeeper/config.toml"));
        assert_eq!(manager.data_dir(), Path::new("/var/lib/lotkeeper"));
    }
}
