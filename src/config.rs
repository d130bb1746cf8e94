//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and `PROMINGEST_*` environment overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Catalog database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Pooled SQLite connections
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// How long a connection waits for a competing writer
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,

    /// Apply pending schema migrations on open
    #[serde(default = "default_auto_migrate")]
    pub auto_migrate: bool,

    /// Written as the default chunk interval on open when set
    #[serde(default)]
    pub default_chunk_interval_secs: Option<u64>,
}

fn default_db_path() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("promingest").join("catalog.db"))
        .unwrap_or_else(|| PathBuf::from("./promingest_data/catalog.db"))
        .to_string_lossy()
        .to_string()
}

fn default_pool_size() -> usize {
    4
}

fn default_busy_timeout() -> u64 {
    5000 // 5 seconds
}

fn default_auto_migrate() -> bool {
    true
}

impl StorageConfig {
    /// Database path with a leading `~/` expanded to the home directory
    pub fn resolved_db_path(&self) -> PathBuf {
        match (self.db_path.strip_prefix("~/"), dirs::home_dir()) {
            (Some(rest), Some(home)) => home.join(rest),
            _ => PathBuf::from(&self.db_path),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            pool_size: default_pool_size(),
            busy_timeout_ms: default_busy_timeout(),
            auto_migrate: default_auto_migrate(),
            default_chunk_interval_secs: None,
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

    pub file: Option<String>,
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
            file: None,
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

        Self::parse(&content).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        })
    }

    fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
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
            dirs::config_dir().map(|p| p.join("promingest").join("config.toml")),
            Some(PathBuf::from("/etc/promingest/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
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

    fn apply_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Storage overrides
        if let Some(db_path) = var("PROMINGEST_DB_PATH") {
            self.storage.db_path = db_path;
        }
        if let Some(size) = var("PROMINGEST_POOL_SIZE").and_then(|v| v.parse().ok()) {
            self.storage.pool_size = size;
        }
        if let Some(ms) = var("PROMINGEST_BUSY_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.storage.busy_timeout_ms = ms;
        }
        if let Some(flag) = var("PROMINGEST_AUTO_MIGRATE").and_then(|v| v.parse().ok()) {
            self.storage.auto_migrate = flag;
        }

        // Logging overrides
        if let Some(level) = var("PROMINGEST_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("PROMINGEST_LOG_FORMAT") {
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
    r#"# promingest Configuration
#
# Environment variables override these settings:
# - PROMINGEST_DB_PATH
# - PROMINGEST_POOL_SIZE
# - PROMINGEST_BUSY_TIMEOUT_MS
# - PROMINGEST_AUTO_MIGRATE
# - PROMINGEST_LOG_LEVEL
# - PROMINGEST_LOG_FORMAT

[storage]
# SQLite database holding the label/series catalog and samples
db_path = "~/.local/share/promingest/catalog.db"

# Number of pooled connections
pool_size = 4

# How long to wait for a competing writer (ms)
busy_timeout_ms = 5000

# Apply pending schema migrations on startup
auto_migrate = true

# Default chunk interval for new metrics (seconds, default 8h)
# default_chunk_interval_secs = 28800

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/promingest/promingest.log"
"#
    .to_string()
}
