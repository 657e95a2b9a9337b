use crate::core::{DbPeekError, Result};
use crate::export::ExportOptions;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "dbpeek";

/// Longest accepted query timeout, one day
pub const MAX_TIMEOUT_SECS: f64 = 86_400.0;

/// Top-level configuration structure parsed from a TOML file.
///
/// Every section is optional; missing keys take their defaults.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub query: QueryConfig,
    pub history: HistoryConfig,
    pub export: ExportConfig,
    pub logging: LoggingConfig,
}

/// Query execution settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueryConfig {
    /// Seconds before a running statement is interrupted
    pub timeout_secs: f64,
    /// Rows per page for `:data`
    pub page_size: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig {
            timeout_secs: 30.0,
            page_size: 100,
        }
    }
}

impl QueryConfig {
    pub fn timeout(&self) -> Result<Duration> {
        timeout_from_secs(self.timeout_secs)
    }
}

/// Converts a user supplied number of seconds into a query timeout.
///
/// The value must be finite, positive and at most [`MAX_TIMEOUT_SECS`].
pub fn timeout_from_secs(secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 || secs > MAX_TIMEOUT_SECS {
        return Err(DbPeekError::Config(format!(
            "timeout must be between 0 and {} seconds, got {}",
            MAX_TIMEOUT_SECS, secs
        )));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| DbPeekError::Config(format!("timeout {}: {}", secs, e)))
}

/// Query history settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct HistoryConfig {
    /// History database file; the platform data directory when unset
    pub path: Option<PathBuf>,
    /// Entries shown by `:hist`
    pub limit: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        HistoryConfig {
            path: None,
            limit: 100,
        }
    }
}

/// Export settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExportConfig {
    pub pretty_json: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        ExportConfig { pretty_json: true }
    }
}

impl From<&ExportConfig> for ExportOptions {
    fn from(config: &ExportConfig) -> Self {
        ExportOptions {
            pretty_json: config.pretty_json,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive, overridden by `RUST_LOG`
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Loads the default config file if one exists, defaults otherwise
    pub fn load_default() -> Result<Config> {
        match default_config_path() {
            Some(path) if path.exists() => load_config(path),
            _ => Ok(Config::default()),
        }
    }
}

/// `<config_dir>/dbpeek/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
}

/// `<data_dir>/dbpeek/query_history.db`
pub fn default_history_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join(APP_DIR).join("query_history.db"))
}

/// Loads configuration from a TOML file at the given path.
///
/// # Arguments
///
/// * `path` - The file path to the TOML configuration file.
///
/// # Example
///
/// ```no_run
/// let config = dbpeek::config::load_config("config.toml").expect("Failed to load config");
/// println!("{:?}", config);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .map_err(|e| DbPeekError::Config(format!("{}: {}", path.display(), e)))?;
    let config: Config =
        toml::from_str(&content).map_err(|e| DbPeekError::Config(format!("{}: {}", path.display(), e)))?;
    if let Err(DbPeekError::Config(msg)) = config.query.timeout() {
        return Err(DbPeekError::Config(format!("{}: [query] {}", path.display(), msg)));
    }
    Ok(config)
}
