//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.
//!
//! Octopus credentials are normally supplied through `OCTOPUS_API_KEY` and
//! `OCTOPUS_ACCOUNT_NUMBER` rather than the config file.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::ApiConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub octopus: OctopusConfig,

    #[serde(default)]
    pub poller: PollerSettings,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Octopus Energy API configuration
#[derive(Clone, Deserialize)]
pub struct OctopusConfig {
    pub api_key: Option<String>,

    pub account_number: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_base_url() -> String {
    crate::octopus::DEFAULT_BASE_URL.to_string()
}

fn default_request_timeout() -> u64 {
    10_000
}

impl Default for OctopusConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            account_number: None,
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl std::fmt::Debug for OctopusConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OctopusConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("account_number", &self.account_number)
            .field("base_url", &self.base_url)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .finish()
    }
}

/// Poll loop configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PollerSettings {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
}

fn default_interval() -> u64 {
    10
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
        }
    }
}

impl PollerSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Reading store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_store_enabled")]
    pub enabled: bool,
}

fn default_db_path() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("octowatch").join("readings.db"))
        .unwrap_or_else(|| PathBuf::from("./octowatch_data/readings.db"))
        .to_string_lossy()
        .to_string()
}

fn default_store_enabled() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            enabled: default_store_enabled(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("octowatch").join("config.toml")),
            Some(PathBuf::from("/etc/octowatch/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // Credentials
        if let Some(key) = var("OCTOPUS_API_KEY").filter(|v| !v.is_empty()) {
            self.octopus.api_key = Some(key);
        }
        if let Some(number) = var("OCTOPUS_ACCOUNT_NUMBER").filter(|v| !v.is_empty()) {
            self.octopus.account_number = Some(number);
        }
        if let Some(url) = var("OCTOWATCH_BASE_URL") {
            self.octopus.base_url = url;
        }

        // Poller overrides
        if let Some(secs) = var("OCTOWATCH_POLL_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.poller.interval_secs = secs;
        }

        // API overrides
        if let Some(host) = var("OCTOWATCH_API_HOST") {
            self.api.host = host;
        }
        if let Some(port) = var("OCTOWATCH_API_PORT").and_then(|v| v.parse().ok()) {
            self.api.port = port;
        }

        // Storage overrides
        if let Some(path) = var("OCTOWATCH_DB_PATH") {
            self.storage.db_path = path;
        }

        // Logging overrides
        if let Some(level) = var("OCTOWATCH_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("OCTOWATCH_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Octowatch Configuration
#
# Environment variables override these settings:
# - OCTOPUS_API_KEY
# - OCTOPUS_ACCOUNT_NUMBER
# - OCTOWATCH_BASE_URL
# - OCTOWATCH_POLL_INTERVAL_SECS
# - OCTOWATCH_API_HOST
# - OCTOWATCH_API_PORT
# - OCTOWATCH_DB_PATH
# - OCTOWATCH_LOG_LEVEL
# - OCTOWATCH_LOG_FORMAT

[octopus]
# Prefer the OCTOPUS_API_KEY and OCTOPUS_ACCOUNT_NUMBER environment variables
# api_key = ""
# account_number = ""

# Kraken GraphQL endpoint
base_url = "https://api.octopus.energy/v1/graphql/"

# HTTP request timeout (ms)
request_timeout_ms = 10000

[poller]
# Seconds between telemetry polls
interval_secs = 10

[api]
# API server host
host = "0.0.0.0"

# API server port
port = 8080

# How long a live websocket stays open (seconds)
socket_lifetime_secs = 60

[storage]
# SQLite database for polled readings
db_path = "~/.local/share/octowatch/readings.db"

# Persist readings at all
enabled = true

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
