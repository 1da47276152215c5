//! Service configuration
//!
//! Resolves the effective settings of a run from, in priority order:
//! 1. Command-line arguments / environment variables (`Overrides`, parsed by clap)
//! 2. TOML bootstrap file (`opus_common::config::TomlConfig`)
//! 3. Built-in defaults below

use crate::db::DB_FILE_NAME;
use crate::error::{Result, SyncError};
use crate::services::catalog_client::SpotifyCredentials;
use crate::services::feed_client::{DEFAULT_FEED_URL, DEFAULT_STATION, DEFAULT_TIME_ZONE};
use crate::services::genre_classifier::DEFAULT_SPECIAL_MARKERS;
use crate::services::sync_orchestrator::{SpecialPlaylist, SyncOptions};
use crate::services::track_resolver::ResolverSettings;
use crate::utils::retry::RetryPolicy;
use chrono::Duration;
use chrono_tz::Tz;
use opus_common::config::{is_valid_value, resolve_cache_dir, TomlConfig};
use opus_common::time::hours;
use std::path::{Path, PathBuf};

/// Environment variable naming the cache folder
pub const CACHE_DIR_ENV: &str = "CACHE_DIR";

pub const DEFAULT_WINDOW_HOURS: u64 = 72;
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.80;
pub const DEFAULT_NEGATIVE_TTL_HOURS: u64 = 24;
pub const DEFAULT_GRACE_HOURS: u64 = 24;
pub const DEFAULT_SPECIAL_MAX_TRACKS: usize = 100;
pub const DEFAULT_RESOLVE_CONCURRENCY: usize = 4;
pub const DEFAULT_SEARCH_RATE_PER_SECOND: u32 = 5;

/// Values supplied on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub cache_dir: Option<PathBuf>,
    pub playlist_id: Option<String>,
    pub special_playlist_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    pub dry_run: bool,
    /// Forget stored special-genre verdicts before the run
    pub clear_special_cache: bool,
}

/// Effective configuration of a run
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub cache_dir: PathBuf,
    pub credentials: SpotifyCredentials,
    pub playlist_id: String,
    pub special_playlist: Option<SpecialPlaylist>,
    pub feed_url: String,
    pub feed_station: String,
    pub feed_time_zone: Tz,
    pub window: Duration,
    pub match_threshold: f64,
    pub negative_ttl: Duration,
    pub grace: Duration,
    pub special_markers: Vec<String>,
    pub retry: RetryPolicy,
    pub resolve_concurrency: usize,
    pub search_rate_per_second: u32,
    pub dry_run: bool,
    pub clear_special_cache: bool,
}

impl SyncConfig {
    /// Merge overrides, TOML and defaults, then validate
    ///
    /// # Errors
    /// `SyncError::Config` for missing credentials/playlist or out-of-range values.
    pub fn resolve(overrides: &Overrides, toml: &TomlConfig) -> Result<Self> {
        let credentials = SpotifyCredentials {
            client_id: required(&overrides.client_id, "SPOTIPY_CLIENT_ID")?,
            client_secret: required(&overrides.client_secret, "SPOTIPY_CLIENT_SECRET")?,
            refresh_token: required(&overrides.refresh_token, "SPOTIPY_REFRESH_TOKEN")?,
        };

        let playlist_id = first_valid(&overrides.playlist_id, &toml.playlist_id)
            .ok_or_else(|| SyncError::Config("PLAYLIST_ID is not set".to_string()))?;

        let special_playlist = first_valid(&overrides.special_playlist_id, &toml.special_playlist_id)
            .map(|playlist_id| SpecialPlaylist {
                playlist_id,
                max_tracks: toml.special_max_tracks.unwrap_or(DEFAULT_SPECIAL_MAX_TRACKS),
            });

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: toml.retry.max_attempts.unwrap_or(defaults.max_attempts),
            base_delay: toml
                .retry
                .base_delay_ms
                .map(std::time::Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            max_delay: toml
                .retry
                .max_delay_ms
                .map(std::time::Duration::from_millis)
                .unwrap_or(defaults.max_delay),
            jitter: defaults.jitter,
        };

        let config = Self {
            cache_dir: resolve_cache_dir(overrides.cache_dir.as_deref(), CACHE_DIR_ENV, toml),
            credentials,
            playlist_id,
            special_playlist,
            feed_url: toml.feed_url.clone().unwrap_or_else(|| DEFAULT_FEED_URL.to_string()),
            feed_station: toml
                .feed_station
                .clone()
                .unwrap_or_else(|| DEFAULT_STATION.to_string()),
            feed_time_zone: parse_time_zone(toml.feed_time_zone.as_deref())?,
            window: hours(toml.window_hours.unwrap_or(DEFAULT_WINDOW_HOURS)),
            match_threshold: toml.match_threshold.unwrap_or(DEFAULT_MATCH_THRESHOLD),
            negative_ttl: hours(toml.negative_ttl_hours.unwrap_or(DEFAULT_NEGATIVE_TTL_HOURS)),
            grace: hours(toml.grace_hours.unwrap_or(DEFAULT_GRACE_HOURS)),
            special_markers: toml.special_markers.clone().unwrap_or_else(|| {
                DEFAULT_SPECIAL_MARKERS.iter().map(|m| m.to_string()).collect()
            }),
            retry,
            resolve_concurrency: toml.resolve_concurrency.unwrap_or(DEFAULT_RESOLVE_CONCURRENCY),
            search_rate_per_second: toml
                .search_rate_per_second
                .unwrap_or(DEFAULT_SEARCH_RATE_PER_SECOND),
            dry_run: overrides.dry_run,
            clear_special_cache: overrides.clear_special_cache,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.window <= Duration::zero() {
            return Err(SyncError::Config("window_hours must be positive".to_string()));
        }
        if !(self.match_threshold > 0.0 && self.match_threshold <= 1.0) {
            return Err(SyncError::Config(format!(
                "match_threshold must be in (0, 1], got {}",
                self.match_threshold
            )));
        }
        if self.negative_ttl <= Duration::zero() {
            return Err(SyncError::Config("negative_ttl_hours must be positive".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(SyncError::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if self.resolve_concurrency == 0 {
            return Err(SyncError::Config("resolve_concurrency must be at least 1".to_string()));
        }
        if self.search_rate_per_second == 0 {
            return Err(SyncError::Config("search_rate_per_second must be at least 1".to_string()));
        }
        if let Some(special) = &self.special_playlist {
            if special.max_tracks == 0 {
                return Err(SyncError::Config("special_max_tracks must be at least 1".to_string()));
            }
            if special.playlist_id == self.playlist_id {
                return Err(SyncError::Config(
                    "special playlist must differ from the main playlist".to_string(),
                ));
            }
        }
        if !is_valid_value(&self.feed_url) {
            return Err(SyncError::Config("feed_url must not be empty".to_string()));
        }
        Ok(())
    }

    /// Path of the state store database
    pub fn db_path(&self) -> PathBuf {
        self.cache_dir.join(DB_FILE_NAME)
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            match_threshold: self.match_threshold,
            window: self.window,
            grace: self.grace,
            negative_ttl: self.negative_ttl,
        }
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            playlist_id: self.playlist_id.clone(),
            special_playlist: self.special_playlist.clone(),
            window: self.window,
            resolve_concurrency: self.resolve_concurrency,
            retry: self.retry.clone(),
            dry_run: self.dry_run,
        }
    }
}

fn required(value: &Option<String>, name: &str) -> Result<String> {
    value
        .as_deref()
        .filter(|v| is_valid_value(v))
        .map(|v| v.trim().to_string())
        .ok_or_else(|| SyncError::Config(format!("{} is not set", name)))
}

fn parse_time_zone(name: Option<&str>) -> Result<Tz> {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => name
            .parse::<Tz>()
            .map_err(|e| SyncError::Config(format!("unknown feed_time_zone {:?}: {}", name, e))),
        None => Ok(DEFAULT_TIME_ZONE),
    }
}

fn first_valid(primary: &Option<String>, fallback: &Option<String>) -> Option<String> {
    [primary, fallback]
        .into_iter()
        .flatten()
        .find(|v| is_valid_value(v))
        .map(|v| v.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use opus_common::config::parse_toml_config;

    fn overrides() -> Overrides {
        Overrides {
            cache_dir: Some(PathBuf::from("/tmp/opus-test")),
            playlist_id: Some("main".into()),
            client_id: Some("id".into()),
            client_secret: Some("secret".into()),
            refresh_token: Some("refresh".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_applied() {
        let config = SyncConfig::resolve(&overrides(), &TomlConfig::default()).unwrap();

        assert_eq!(config.window, Duration::hours(72));
        assert_eq!(config.match_threshold, 0.80);
        assert_eq!(config.negative_ttl, Duration::hours(24));
        assert_eq!(config.grace, Duration::hours(24));
        assert_eq!(config.feed_station, "opus");
        assert_eq!(config.feed_time_zone, chrono_tz::Europe::Vilnius);
        assert!(config.special_playlist.is_none());
        assert_eq!(config.db_path(), PathBuf::from("/tmp/opus-test/track_cache.sqlite3"));
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn test_clear_special_cache_is_opt_in() {
        let config = SyncConfig::resolve(&overrides(), &TomlConfig::default()).unwrap();
        assert!(!config.clear_special_cache);

        let clearing = Overrides {
            clear_special_cache: true,
            ..overrides()
        };
        let config = SyncConfig::resolve(&clearing, &TomlConfig::default()).unwrap();
        assert!(config.clear_special_cache);
    }

    #[test]
    fn test_cli_playlist_wins_over_toml() {
        let toml = parse_toml_config("playlist_id = \"from-toml\"\nspecial_playlist_id = \"dnb\"").unwrap();

        let config = SyncConfig::resolve(&overrides(), &toml).unwrap();
        assert_eq!(config.playlist_id, "main");
        assert_eq!(
            config.special_playlist,
            Some(SpecialPlaylist {
                playlist_id: "dnb".into(),
                max_tracks: 100
            })
        );

        let without_cli = Overrides {
            playlist_id: None,
            ..overrides()
        };
        let config = SyncConfig::resolve(&without_cli, &toml).unwrap();
        assert_eq!(config.playlist_id, "from-toml");
    }

    #[test]
    fn test_toml_values_override_defaults() {
        let toml = parse_toml_config(
            r#"
            window_hours = 48
            match_threshold = 0.9
            resolve_concurrency = 2

            [retry]
            max_attempts = 6
            base_delay_ms = 100
            "#,
        )
        .unwrap();

        let config = SyncConfig::resolve(&overrides(), &toml).unwrap();
        assert_eq!(config.window, Duration::hours(48));
        assert_eq!(config.match_threshold, 0.9);
        assert_eq!(config.resolve_concurrency, 2);
        assert_eq!(config.retry.max_attempts, 6);
        assert_eq!(config.retry.base_delay, std::time::Duration::from_millis(100));
        assert_eq!(config.retry.max_delay, RetryPolicy::default().max_delay);
    }

    #[test]
    fn test_feed_time_zone_from_toml() {
        let toml = parse_toml_config("feed_time_zone = \"Europe/Riga\"").unwrap();
        let config = SyncConfig::resolve(&overrides(), &toml).unwrap();
        assert_eq!(config.feed_time_zone, chrono_tz::Europe::Riga);
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let missing = Overrides {
            refresh_token: Some("   ".into()),
            ..overrides()
        };
        let result = SyncConfig::resolve(&missing, &TomlConfig::default());
        assert!(matches!(result, Err(SyncError::Config(msg)) if msg.contains("SPOTIPY_REFRESH_TOKEN")));
    }

    #[test]
    fn test_missing_playlist_rejected() {
        let missing = Overrides {
            playlist_id: None,
            ..overrides()
        };
        assert!(matches!(
            SyncConfig::resolve(&missing, &TomlConfig::default()),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        for content in [
            "match_threshold = 1.5",
            "match_threshold = 0.0",
            "window_hours = 0",
            "resolve_concurrency = 0",
            "special_playlist_id = \"main\"",
            "feed_time_zone = \"Mars/Olympus\"",
        ] {
            let toml = parse_toml_config(content).unwrap();
            assert!(
                SyncConfig::resolve(&overrides(), &toml).is_err(),
                "expected rejection for {}",
                content
            );
        }
    }
}
