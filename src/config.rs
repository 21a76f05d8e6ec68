//! Configuration.

use serde::Deserialize;
use std::path::Path;
use url::Url;

/// Main configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Redis connection settings. Leaving the table out disables redis.
    #[serde(default)]
    pub redis: Option<RedisConfig>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }
}

/// Endpoint used when `url` is not set.
pub const DEFAULT_URL: &str = "redis://localhost:6379";

/// Redis connection settings.
///
/// A non-empty `sentinel` list switches the client to sentinel mode; `url`
/// is only used when the list is empty.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedisConfig {
    /// Endpoint URL, e.g. `redis://localhost:6379` or `tcp://localhost:6379`.
    /// Defaults to [`DEFAULT_URL`].
    pub url: Option<Url>,

    /// Database index. Defaults to 0.
    pub db: Option<i64>,

    #[serde(default)]
    pub password: String,

    /// Maximum idle connections. Defaults to 1.
    pub max_idle: Option<usize>,

    /// Maximum active connections. Defaults to 1.
    pub max_active: Option<usize>,

    /// Sentinel URLs, e.g. `redis://:password@sentinel-1:26379`.
    #[serde(default)]
    pub sentinel: Vec<Url>,

    /// Name of the master the sentinels monitor.
    #[serde(default)]
    pub sentinel_master: String,

    /// Password for the sentinels themselves. Falls back to the first password
    /// embedded in a sentinel URL.
    #[serde(default)]
    pub sentinel_password: String,
}

impl RedisConfig {
    /// The endpoint URL as text, falling back to [`DEFAULT_URL`].
    pub fn url_str(&self) -> &str {
        self.url.as_ref().map_or(DEFAULT_URL, Url::as_str)
    }

    /// True if the master is located through sentinels.
    pub fn uses_sentinel(&self) -> bool {
        !self.sentinel.is_empty()
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Log format: "pretty", "json", or "compact".
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            format: Self::default_format(),
        }
    }
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }

    fn default_format() -> String {
        "pretty".to_string()
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}
