use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::utils;

/// Current configuration version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_tasks_collection")]
    pub tasks_collection: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default = "default_config_version")]
    pub config_version: Option<u32>,
}

/// Login lockout and inactivity settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_max_login_attempts")]
    pub max_login_attempts: u32,
    #[serde(default = "default_lockout_minutes")]
    pub lockout_minutes: u64,
    #[serde(default = "default_inactivity_timeout_minutes")]
    pub inactivity_timeout_minutes: u64,
    #[serde(default = "default_inactivity_warning_secs")]
    pub inactivity_warning_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            tasks_collection: default_tasks_collection(),
            poll_interval_secs: default_poll_interval_secs(),
            security: SecurityConfig::default(),
            config_version: Some(CURRENT_CONFIG_VERSION),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_login_attempts: default_max_login_attempts(),
            lockout_minutes: default_lockout_minutes(),
            inactivity_timeout_minutes: default_inactivity_timeout_minutes(),
            inactivity_warning_secs: default_inactivity_warning_secs(),
        }
    }
}

impl SecurityConfig {
    pub fn lockout_duration(&self) -> Duration {
        Duration::from_secs(self.lockout_minutes * 60)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_minutes * 60)
    }

    pub fn inactivity_warning(&self) -> Duration {
        Duration::from_secs(self.inactivity_warning_secs)
    }
}

// Default value functions
fn default_database_path() -> String {
    // This is a fallback - actual profile will be determined at load time
    if let Some(data_dir) = utils::get_data_dir(utils::Profile::Prod) {
        data_dir.join("smarttask.db").to_string_lossy().to_string()
    } else {
        "~/.local/share/smarttask/smarttask.db".to_string()
    }
}

fn default_tasks_collection() -> String {
    "tasks".to_string()
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_max_login_attempts() -> u32 {
    5
}

fn default_lockout_minutes() -> u64 {
    15
}

fn default_inactivity_timeout_minutes() -> u64 {
    15
}

fn default_inactivity_warning_secs() -> u64 {
    60
}

fn default_config_version() -> Option<u32> {
    Some(CURRENT_CONFIG_VERSION)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config directory: {0}")]
    ConfigDirError(String),
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to write config file: {0}")]
    WriteError(String),
    #[error("Invalid setting: {0}")]
    InvalidSetting(String),
}

impl Config {
    /// Load configuration from file, or create default if missing
    /// Uses the provided profile to determine config and database paths
    pub fn load_with_profile(profile: utils::Profile) -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path(profile)?;
        let mut config = Self::load_from_path(&config_path)?;
        if !config_path.exists() {
            config.database_path = Self::default_database_path_for_profile(profile);
            if let Err(e) = config.save_to_path(&config_path) {
                tracing::error!(path = ?config_path, "failed to save config file: {}", e);
                return Err(e);
            }
        }
        Ok(config)
    }

    /// Load configuration from an explicit path; a missing file yields defaults
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to an explicit path
    pub fn save_to_path(&mut self, path: &Path) -> Result<(), ConfigError> {
        // Ensure config version is set before saving
        self.config_version = Some(CURRENT_CONFIG_VERSION);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError(e.to_string()))?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::WriteError(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string).map_err(|e| ConfigError::WriteError(e.to_string()))?;

        Ok(())
    }

    /// Reject settings that would disable the polling loop, the lockout or the idle timeout
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidSetting("poll_interval_secs must be at least 1".to_string()));
        }
        if self.security.max_login_attempts == 0 {
            return Err(ConfigError::InvalidSetting("max_login_attempts must be at least 1".to_string()));
        }
        if self.security.lockout_minutes == 0 {
            return Err(ConfigError::InvalidSetting("lockout_minutes must be at least 1".to_string()));
        }
        if self.security.inactivity_timeout_minutes == 0 {
            return Err(ConfigError::InvalidSetting(
                "inactivity_timeout_minutes must be at least 1".to_string(),
            ));
        }
        if self.tasks_collection.trim().is_empty() {
            return Err(ConfigError::InvalidSetting("tasks_collection must not be empty".to_string()));
        }
        Ok(())
    }

    /// Get the path to the config file
    pub fn get_config_path(profile: utils::Profile) -> Result<PathBuf, ConfigError> {
        let config_dir = utils::get_config_dir(profile)
            .ok_or_else(|| ConfigError::ConfigDirError("Could not determine config directory".to_string()))?;
        Ok(config_dir.join("config.toml"))
    }

    /// Get default database path for a specific profile
    fn default_database_path_for_profile(profile: utils::Profile) -> String {
        if let Some(data_dir) = utils::get_data_dir(profile) {
            data_dir.join("smarttask.db").to_string_lossy().to_string()
        } else {
            match profile {
                utils::Profile::Dev => "~/.local/share/smarttask-dev/smarttask.db".to_string(),
                utils::Profile::Prod => "~/.local/share/smarttask/smarttask.db".to_string(),
            }
        }
    }

    /// Get the expanded database path (with ~ expansion)
    pub fn get_database_path(&self) -> PathBuf {
        utils::expand_path(&self.database_path)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
