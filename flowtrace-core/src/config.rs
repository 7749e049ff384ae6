//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/flowtrace/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/flowtrace/` (~/.config/flowtrace/)
//! - State/Logs: `$XDG_STATE_HOME/flowtrace/` (~/.local/state/flowtrace/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Event normalizer tuning
    #[serde(default)]
    pub normalize: NormalizeConfig,

    /// Raw log ingest settings (text dumps)
    #[serde(default)]
    pub ingest: IngestConfig,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// Settings that shape how raw entries are inspected.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct NormalizeConfig {
    /// How deep the recursive `wait_on` / status code search descends
    #[serde(default = "default_max_search_depth")]
    pub max_search_depth: usize,

    /// HTTP status at or above which an entry counts as an error
    #[serde(default = "default_error_status_threshold")]
    pub error_status_threshold: u16,

    /// Object keys excluded from wait_on and error searches
    #[serde(default = "default_skip_keys")]
    pub skip_keys: Vec<String>,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            max_search_depth: default_max_search_depth(),
            error_status_threshold: default_error_status_threshold(),
            skip_keys: default_skip_keys(),
        }
    }
}

fn default_max_search_depth() -> usize {
    10
}

fn default_error_status_threshold() -> u16 {
    400
}

fn default_skip_keys() -> Vec<String> {
    vec!["SessionData".to_string()]
}

/// Settings for the SmartFlow plain-text dump parser.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    /// Substring identifying the host line that opens each record
    #[serde(default = "default_host_marker")]
    pub host_marker: String,

    /// Plain-text records are cut off after this many lines
    #[serde(default = "default_max_text_lines")]
    pub max_text_lines: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            host_marker: default_host_marker(),
            max_text_lines: default_max_text_lines(),
        }
    }
}

fn default_host_marker() -> String {
    "intelepeer.net".to_string()
}

fn default_max_text_lines() -> usize {
    20
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.normalize.max_search_depth == 0 {
            return Err(Error::Config(
                "normalize.max_search_depth must be at least 1".to_string(),
            ));
        }
        if !(100..=599).contains(&self.normalize.error_status_threshold) {
            return Err(Error::Config(
                "normalize.error_status_threshold must be an HTTP status (100-599)".to_string(),
            ));
        }
        if self.ingest.host_marker.trim().is_empty() {
            return Err(Error::Config(
                "ingest.host_marker must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/flowtrace/config.toml` (~/.config/flowtrace/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("flowtrace").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/flowtrace/` (~/.local/state/flowtrace/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("flowtrace")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("flowtrace.log")
    }
}
