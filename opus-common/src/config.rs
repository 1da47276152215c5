//! Bootstrap configuration loading and cache folder resolution
//!
//! The TOML file is optional. Every field is optional as well; values that are
//! absent fall through to environment/CLI overrides or built-in defaults applied
//! by the service (see `opus_sync::config`).
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application directory name used below the platform config/data folders
pub const APP_DIR_NAME: &str = "opus-sync";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct TomlConfig {
    /// Folder holding the track cache database and the run lock
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Target playlist identifier
    #[serde(default)]
    pub playlist_id: Option<String>,

    /// Secondary playlist for special-genre tracks
    #[serde(default)]
    pub special_playlist_id: Option<String>,

    /// Radio feed endpoint
    #[serde(default)]
    pub feed_url: Option<String>,

    /// Station name passed to the feed endpoint
    #[serde(default)]
    pub feed_station: Option<String>,

    /// IANA time zone of local feed timestamps such as "2025.05.26 15:51"
    #[serde(default)]
    pub feed_time_zone: Option<String>,

    /// Window length in hours
    #[serde(default)]
    pub window_hours: Option<u64>,

    /// Minimum match score (0.0-1.0) for accepting a catalog candidate
    #[serde(default)]
    pub match_threshold: Option<f64>,

    /// Lifetime of "no match found" cache entries, in hours
    #[serde(default)]
    pub negative_ttl_hours: Option<u64>,

    /// Grace period added to positive cache entries and used by the sweep, in hours
    #[serde(default)]
    pub grace_hours: Option<u64>,

    /// Genre tags / keywords marking a special-genre track
    #[serde(default)]
    pub special_markers: Option<Vec<String>>,

    /// Maximum number of tracks kept on the special playlist
    #[serde(default)]
    pub special_max_tracks: Option<usize>,

    /// Retry configuration (optional)
    #[serde(default)]
    pub retry: RetryConfig,

    /// Concurrent catalog searches
    #[serde(default)]
    pub resolve_concurrency: Option<usize>,

    /// Catalog search requests per second
    #[serde(default)]
    pub search_rate_per_second: Option<u32>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Retry/backoff overrides
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Delay before the first retry, in milliseconds
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
    /// Upper bound of a single backoff, in milliseconds
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load the bootstrap TOML file
///
/// An explicitly requested file must exist and parse. Without an explicit path the
/// default locations are probed and a missing file yields `TomlConfig::default()`.
pub fn load_toml_config(explicit_path: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit_path {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            path.to_path_buf()
        }
        None => match find_config_file() {
            Some(path) => path,
            None => {
                tracing::debug!("No config file found, using built-in defaults");
                return Ok(TomlConfig::default());
            }
        },
    };

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
    let config = parse_toml_config(&content)
        .map_err(|e| Error::Config(format!("{} ({})", e, path.display())))?;

    tracing::info!(path = %path.display(), "Loaded configuration file");
    Ok(config)
}

/// Parse TOML text into a bootstrap config
pub fn parse_toml_config(content: &str) -> Result<TomlConfig> {
    toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
}

/// Probe the platform config locations
///
/// Linux: `~/.config/opus-sync/config.toml`, then `/etc/opus-sync/config.toml`.
fn find_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc").join(APP_DIR_NAME).join("config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Cache folder resolution in priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_cache_dir(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_config: &TomlConfig,
) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(path) = &toml_config.cache_dir {
        return path.clone();
    }

    // Priority 4: OS-dependent compiled default
    default_cache_dir()
}

/// Get OS-dependent default cache folder path
fn default_cache_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("./opus_sync_data"))
}

/// Validate a setting value (non-empty, non-whitespace)
pub fn is_valid_value(value: &str) -> bool {
    !value.trim().is_empty()
}
