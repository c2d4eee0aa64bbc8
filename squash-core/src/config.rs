//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/squash/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/squash/` (~/.config/squash/)
//! - State/Logs: `$XDG_STATE_HOME/squash/` (~/.local/state/squash/)
//!
//! Recorded occurrences live outside XDG, in `~/.SquashOccurrences/<api key>/`,
//! unless `client.occurrence_root` says otherwise.

use crate::error::{Error, Result};
use crate::signals::{default_handled_signals, Signal};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
pub(crate) fn home_dir() -> PathBuf {
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
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Squash client configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
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

/// Squash client configuration
///
/// `host`, `api_key`, `environment` and `revision` must be set before the
/// interceptor can be hooked.
#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    /// Squash server, scheme and port included (e.g. `https://squash.example.com:3000`)
    pub host: Option<String>,

    /// API key of the project occurrences belong to
    pub api_key: Option<String>,

    /// Deployment environment (development, production, ...)
    pub environment: Option<String>,

    /// Source-control revision the running build was made from
    pub revision: Option<String>,

    /// Human-readable version of a released build
    pub version: Option<String>,

    /// Machine-readable build identifier matching `revision`
    pub build: Option<String>,

    /// When true nothing is recorded or reported
    #[serde(default)]
    pub disabled: bool,

    /// Path occurrences are posted to
    #[serde(default = "default_notify_path")]
    pub notify_path: String,

    /// Seconds to wait for the collector before giving up on one occurrence
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Class names that are never reported
    #[serde(default)]
    pub ignored_exceptions: HashSet<String>,

    /// Signals trapped by the interceptor
    #[serde(default = "default_handled_signals")]
    pub handled_signals: Vec<Signal>,

    /// Strings removed from occurrence messages before they are stored
    #[serde(default)]
    pub filter_strings: Vec<String>,

    /// Root folder for queued occurrences (one subfolder per API key)
    #[serde(default = "default_occurrence_root")]
    pub occurrence_root: PathBuf,

    /// Additional keys merged into every occurrence, overriding built-in ones
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: None,
            api_key: None,
            environment: None,
            revision: None,
            version: None,
            build: None,
            disabled: false,
            notify_path: default_notify_path(),
            timeout_secs: default_timeout_secs(),
            ignored_exceptions: HashSet::new(),
            handled_signals: default_handled_signals(),
            filter_strings: Vec::new(),
            occurrence_root: default_occurrence_root(),
            extra: serde_json::Map::new(),
        }
    }
}

fn default_notify_path() -> String {
    "/api/1.0/notify".to_string()
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_occurrence_root() -> PathBuf {
    home_dir().join(".SquashOccurrences")
}

fn is_set(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}

impl ClientConfig {
    /// Check that the fields required for hooking are present
    pub fn require_hookable(&self) -> Result<()> {
        if !is_set(&self.revision) {
            return Err(Error::MissingConfig("a revision"));
        }
        if !is_set(&self.api_key) {
            return Err(Error::MissingConfig("an api_key"));
        }
        if !is_set(&self.host) {
            return Err(Error::MissingConfig("a host"));
        }
        if !is_set(&self.environment) {
            return Err(Error::MissingConfig("an environment"));
        }
        Ok(())
    }

    /// Queue folder for this API key
    ///
    /// An unset key maps to a shared `unknown` folder so that records made
    /// before configuration completes are not lost.
    pub fn occurrence_folder(&self) -> PathBuf {
        self.occurrence_root
            .join(self.api_key.as_deref().unwrap_or("unknown"))
    }
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

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/squash/config.toml` (~/.config/squash/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("squash").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/squash/` (~/.local/state/squash/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("squash")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("squash.log")
    }
}
