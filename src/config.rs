//! Configuration management for tsview
//!
//! TOML file support, environment variable overrides, and defaults for every
//! field, so an empty file (or no file) is a valid configuration.
//!
//! ```toml
//! [server]
//! log_level = "info"
//!
//! [cache]
//! url = "redis://127.0.0.1:6379"
//! entry_ttl_secs = 3600
//!
//! [aggregation]
//! max_points = 10000
//!
//! [storage]
//! data_dir = "/var/lib/tsview"
//! ```

use crate::cache::ViewCacheConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest accepted cache entry expiry (one year)
pub const MAX_ENTRY_TTL_SECS: u64 = 365 * 24 * 3_600;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Process-level settings
    #[serde(default)]
    pub server: ServerConfig,

    /// View cache and its store
    #[serde(default)]
    pub cache: CacheConfig,

    /// Downsampling
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Durable dataset files
    #[serde(default)]
    pub storage: StorageConfig,

    /// Forecast defaults
    #[serde(default)]
    pub forecast: ForecastConfig,
}

/// Process-level configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Log level or `EnvFilter` directive (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Redis URL; may carry credentials, never logged unsanitized
    #[serde(default = "default_cache_url")]
    pub url: String,

    /// Maximum in-flight store commands
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Connection establishment deadline
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// Per-command deadline
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Expiry of every cache entry
    #[serde(default = "default_entry_ttl_secs")]
    pub entry_ttl_secs: u64,

    /// Use Redis; when false an in-process store is used instead
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Aggregation configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AggregationConfig {
    /// Global point budget per view
    #[serde(default = "default_max_points")]
    pub max_points: usize,
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Directory holding `{dataset}.parquet` files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Deadline for loading one dataset
    #[serde(default = "default_load_timeout_ms")]
    pub load_timeout_ms: u64,
}

/// Forecast configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ForecastConfig {
    /// Steps forecast when a request does not say
    #[serde(default = "default_horizon")]
    pub default_horizon: usize,

    /// Interval width in standard deviations (1.96 ≈ 95%)
    #[serde(default = "default_z_score")]
    pub z_score: f64,
}

// Default value functions
fn default_log_level() -> String { "info".to_string() }
fn default_cache_url() -> String { "redis://127.0.0.1:6379".to_string() }
fn default_pool_size() -> u32 { 16 }
fn default_connection_timeout_ms() -> u64 { 5_000 }
fn default_command_timeout_ms() -> u64 { 1_000 }
fn default_entry_ttl_secs() -> u64 { 3_600 }
fn default_max_points() -> usize { 10_000 }
fn default_data_dir() -> PathBuf { PathBuf::from("data") }
fn default_load_timeout_ms() -> u64 { 30_000 }
fn default_horizon() -> usize { 10 }
fn default_z_score() -> f64 { 1.96 }
fn default_true() -> bool { true }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: default_cache_url(),
            pool_size: default_pool_size(),
            connection_timeout_ms: default_connection_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            entry_ttl_secs: default_entry_ttl_secs(),
            enabled: true,
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            max_points: default_max_points(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            load_timeout_ms: default_load_timeout_ms(),
        }
    }
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            default_horizon: default_horizon(),
            z_score: default_z_score(),
        }
    }
}

impl Config {
    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| Error::Configuration(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&contents)
    }

    /// Load a file, apply environment overrides, and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`
    ///
    /// Recognized keys: `TSVIEW_REDIS_URL`, `TSVIEW_DATA_DIR`,
    /// `TSVIEW_MAX_POINTS`, `TSVIEW_CACHE_TTL_SECS`, `RUST_LOG`. Values that
    /// do not parse are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("TSVIEW_REDIS_URL") {
            self.cache.url = url;
        }
        if let Some(dir) = lookup("TSVIEW_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(p) = lookup("TSVIEW_MAX_POINTS").and_then(|v| v.parse().ok()) {
            self.aggregation.max_points = p;
        }
        if let Some(ttl) = lookup("TSVIEW_CACHE_TTL_SECS").and_then(|v| v.parse().ok()) {
            self.cache.entry_ttl_secs = ttl;
        }
        if let Some(level) = lookup("RUST_LOG") {
            self.server.log_level = level;
        }
    }

    /// Validate configuration
    ///
    /// Timeouts must be non-zero and `entry_ttl_secs` at most [`MAX_ENTRY_TTL_SECS`].
    pub fn validate(&self) -> Result<()> {
        if self.aggregation.max_points == 0 {
            return Err(Error::Configuration("max_points must be > 0".to_string()));
        }
        if self.cache.entry_ttl_secs == 0 {
            return Err(Error::Configuration(
                "entry_ttl_secs must be > 0".to_string(),
            ));
        }
        if self.cache.entry_ttl_secs > MAX_ENTRY_TTL_SECS {
            return Err(Error::Configuration(format!(
                "entry_ttl_secs must be <= {}",
                MAX_ENTRY_TTL_SECS
            )));
        }
        for (name, value) in [
            ("connection_timeout_ms", self.cache.connection_timeout_ms),
            ("command_timeout_ms", self.cache.command_timeout_ms),
            ("load_timeout_ms", self.storage.load_timeout_ms),
        ] {
            if value == 0 {
                return Err(Error::Configuration(format!("{} must be > 0", name)));
            }
        }
        if self.cache.url.is_empty() {
            return Err(Error::Configuration("cache url cannot be empty".to_string()));
        }
        if self.cache.pool_size == 0 {
            return Err(Error::Configuration("pool_size must be > 0".to_string()));
        }
        if !(self.forecast.z_score.is_finite() && self.forecast.z_score >= 0.0) {
            return Err(Error::Configuration(
                "z_score must be a non-negative number".to_string(),
            ));
        }
        Ok(())
    }

    /// View cache settings derived from the `[cache]` and `[storage]` sections
    pub fn view_cache(&self) -> ViewCacheConfig {
        ViewCacheConfig {
            entry_ttl: Duration::from_secs(self.cache.entry_ttl_secs),
            command_timeout: Duration::from_millis(self.cache.command_timeout_ms),
            load_timeout: Duration::from_millis(self.storage.load_timeout_ms),
            ..ViewCacheConfig::default()
        }
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Configuration(format!("Failed to serialize config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.aggregation.max_points, 10_000);
        assert_eq!(config.cache.entry_ttl_secs, 3_600);
        assert_eq!(config.forecast.default_horizon, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::from_toml(
            r#"
            [cache]
            url = "redis://cache:6379/1"

            [aggregation]
            max_points = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.cache.url, "redis://cache:6379/1");
        assert_eq!(config.cache.pool_size, 16);
        assert_eq!(config.aggregation.max_points, 500);
    }

    #[test]
    fn test_invalid_values() {
        let mut config = Config::default();
        config.aggregation.max_points = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.cache.entry_ttl_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.cache.url.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.cache.pool_size = 0;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let mut config = Config::default();
        config.cache.entry_ttl_secs = MAX_ENTRY_TTL_SECS + 1;
        assert!(config.validate().is_err());
        config.cache.entry_ttl_secs = MAX_ENTRY_TTL_SECS;
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        config.storage.load_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.cache.command_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.cache.connection_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("TSVIEW_REDIS_URL", "redis://override:6379"),
            ("TSVIEW_DATA_DIR", "/srv/data"),
            ("TSVIEW_MAX_POINTS", "250"),
            ("TSVIEW_CACHE_TTL_SECS", "not-a-number"),
            ("RUST_LOG", "tsview=debug"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.cache.url, "redis://override:6379");
        assert_eq!(config.storage.data_dir, PathBuf::from("/srv/data"));
        assert_eq!(config.aggregation.max_points, 250);
        assert_eq!(config.cache.entry_ttl_secs, 3_600);
        assert_eq!(config.server.log_level, "tsview=debug");
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tsview.toml");
        let mut config = Config::default();
        config.forecast.z_score = 2.58;
        std::fs::write(&path, config.to_toml().unwrap()).unwrap();

        assert_eq!(Config::from_file(&path).unwrap(), config);
        assert!(Config::from_file(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_view_cache_settings() {
        let mut config = Config::default();
        config.cache.entry_ttl_secs = 60;
        config.cache.command_timeout_ms = 250;
        let view = config.view_cache();
        assert_eq!(view.entry_ttl, Duration::from_secs(60));
        assert_eq!(view.command_timeout, Duration::from_millis(250));
        assert_eq!(view.load_timeout, Duration::from_secs(30));
    }
}
