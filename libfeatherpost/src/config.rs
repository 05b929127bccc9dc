//! Configuration management for Featherpost

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Seconds between scheduling ticks
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    /// Maximum due reservations fetched per account per tick
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum successful posts per account per tick
    #[serde(default = "default_posts_per_tick")]
    pub posts_per_tick: usize,
    /// Refresh proactively when the access token expires within this window
    #[serde(default = "default_refresh_threshold")]
    pub token_refresh_threshold_secs: i64,
    /// Root directory media references resolve against
    #[serde(default = "default_media_root")]
    pub media_root: String,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    60
}

fn default_batch_size() -> usize {
    5
}

fn default_posts_per_tick() -> usize {
    1
}

fn default_refresh_threshold() -> i64 {
    300
}

fn default_media_root() -> String {
    "~/.local/share/featherpost/media".to_string()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            batch_size: default_batch_size(),
            posts_per_tick: default_posts_per_tick(),
            token_refresh_threshold_secs: default_refresh_threshold(),
            media_root: default_media_root(),
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/featherpost/posts.db".to_string(),
            },
            api: ApiConfig {
                base_url: "https://api.x.com/2".to_string(),
                timeout_secs: default_timeout_secs(),
            },
            worker: WorkerConfig::default(),
        }
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("FEATHERPOST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("featherpost").join("config.toml"))
}

/// Resolve the data directory path following XDG Base Directory spec
pub fn resolve_data_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| ConfigError::MissingField("data directory".to_string()))?;

    Ok(data_dir.join("featherpost"))
}
