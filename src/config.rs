//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::query::DEFAULT_LIMIT;

/// Environment variable overriding the database path
pub const ENV_DB_PATH: &str = "GRAPHDEX_DB_PATH";
/// Environment variable overriding the log level
pub const ENV_LOG_LEVEL: &str = "GRAPHDEX_LOG_LEVEL";
/// Environment variable overriding the log format
pub const ENV_LOG_FORMAT: &str = "GRAPHDEX_LOG_FORMAT";

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Graph database location
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("graphdex").join("index.db").to_string_lossy().to_string())
        .unwrap_or_else(|| "./graphdex.db".to_string())
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Defaults applied when a request leaves them out
#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_limit")]
    pub default_limit: i64,

    #[serde(default = "default_limit")]
    pub default_aggregate_limit: i64,
}

fn default_limit() -> i64 {
    DEFAULT_LIMIT
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            default_aggregate_limit: default_limit(),
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

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
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
        let (config, source) = Self::load_default_with_source();
        source.log();
        config
    }

    /// Like [`Config::load_default`], but leaves logging the outcome to the
    /// caller, for use before a subscriber is installed
    pub fn load_default_with_source() -> (Self, ConfigSource) {
        let config_paths: Vec<PathBuf> = [
            dirs::config_dir().map(|p| p.join("graphdex").join("config.toml")),
            Some(PathBuf::from("/etc/graphdex/config.toml")),
            Some(PathBuf::from("./graphdex.toml")),
        ]
        .into_iter()
        .flatten()
        .collect();

        Self::load_first(&config_paths)
    }

    /// First existing path that loads wins; otherwise defaults plus environment
    fn load_first(paths: &[PathBuf]) -> (Self, ConfigSource) {
        let mut source = ConfigSource::default();

        for path in paths.iter().filter(|p| p.exists()) {
            match Self::load_with_env(path) {
                Ok(config) => {
                    source.path = Some(path.clone());
                    return (config, source);
                }
                Err(e) => source.failures.push(e),
            }
        }

        (Self::from_env(), source)
    }

    /// Database path as a filesystem path, with a leading `~` expanded
    pub fn database_path(&self) -> PathBuf {
        expand_home(&self.database.path)
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_DB_PATH) {
            self.database.path = path;
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            self.logging.format = format;
        }
    }
}

/// Where a configuration came from
#[derive(Debug, Default)]
pub struct ConfigSource {
    /// File that was loaded; `None` means defaults plus environment
    pub path: Option<PathBuf>,
    /// Candidate files that exist but could not be loaded
    pub failures: Vec<ConfigError>,
}

impl ConfigSource {
    /// Source for an explicitly given file
    pub fn file(path: &Path) -> Self {
        Self {
            path: Some(path.to_path_buf()),
            failures: Vec::new(),
        }
    }

    pub fn log(&self) {
        for failure in &self.failures {
            tracing::warn!("Failed to load config: {}", failure);
        }
        match &self.path {
            Some(path) => tracing::info!("Loaded config from {:?}", path),
            None => tracing::debug!("Using default config with environment overrides"),
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\') => rest,
        _ => return PathBuf::from(path),
    };

    match dirs::home_dir() {
        Some(home) => home.join(rest.trim_start_matches(['/', '\\'])),
        None => PathBuf::from(path),
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
    let path = toml::Value::String(default_db_path()).to_string();
    format!(
        r#"# Graphdex Configuration
#
# Environment variables override these settings:
# - GRAPHDEX_DB_PATH
# - GRAPHDEX_LOG_LEVEL
# - GRAPHDEX_LOG_FORMAT

[database]
# SQLite file holding the indexed graph export
path = {path}

[query]
# Page size when a query gives no limit
default_limit = 100

# Group cap when an aggregation gives no limit
default_aggregate_limit = 100

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#,
        path = path
    )
}
