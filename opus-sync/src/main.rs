//! opus-sync - Main entry point
//!
//! Runs one sync pass and exits. Schedule it (cron, systemd timer) every few
//! minutes.
//!
//! Exit codes:
//! - 0: run completed (unresolved tracks and dropped edits included), or another
//!   run holds the lock
//! - 1: configuration error or unrecoverable store/feed/playlist failure
//! - 2: authentication failure

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use opus_common::config::load_toml_config;
use opus_sync::config::{Overrides, SyncConfig};
use opus_sync::db::{open_state_store, StateStore};
use opus_sync::models::RunSummary;
use opus_sync::services::track_resolver::search_rate_limiter;
use opus_sync::services::{
    GenreClassifier, LrtFeedClient, SpotifyClient, SyncOrchestrator, TrackResolver,
};
use opus_sync::utils::RunLock;
use opus_sync::SyncError;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for opus-sync
#[derive(Parser, Debug)]
#[command(name = "opus-sync")]
#[command(about = "Keep a Spotify playlist in sync with recent LRT Opus airplay")]
#[command(version)]
struct Args {
    /// Bootstrap TOML file (default: ~/.config/opus-sync/config.toml if present)
    #[arg(short, long, env = "OPUS_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Folder holding the track cache and run lock
    #[arg(long, env = "CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Target playlist
    #[arg(long, env = "PLAYLIST_ID")]
    playlist_id: Option<String>,

    /// Special-genre playlist kept at the newest N tracks
    #[arg(long, env = "PLAYLIST_DNB_ID")]
    special_playlist_id: Option<String>,

    #[arg(long, env = "SPOTIPY_CLIENT_ID", hide_env_values = true)]
    client_id: Option<String>,

    #[arg(long, env = "SPOTIPY_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    #[arg(long, env = "SPOTIPY_REFRESH_TOKEN", hide_env_values = true)]
    refresh_token: Option<String>,

    /// Compute and log the edits without changing anything
    #[arg(long)]
    dry_run: bool,

    /// Forget stored special-genre verdicts so tracks are classified again
    #[arg(
        long,
        env = "CLEAR_DNB_CACHE",
        action = clap::ArgAction::Set,
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true",
        value_parser = parse_flag
    )]
    clear_special_cache: bool,
}

/// Accept the usual truthy spellings of a flag variable
fn parse_flag(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "" | "0" | "false" | "no" => Ok(false),
        other => Err(format!("expected 1/true/yes or 0/false/no, got '{}'", other)),
    }
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            cache_dir: self.cache_dir.clone(),
            playlist_id: self.playlist_id.clone(),
            special_playlist_id: self.special_playlist_id.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            refresh_token: self.refresh_token.clone(),
            dry_run: self.dry_run,
            clear_special_cache: self.clear_special_cache,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let toml_config = load_toml_config(args.config.as_deref()).map_err(SyncError::from);
    let level = toml_config
        .as_ref()
        .map(|c| c.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("opus_sync={level},opus_common={level},warn").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let result = match toml_config {
        Ok(toml_config) => SyncConfig::resolve(&args.overrides(), &toml_config)
            .context("Invalid configuration"),
        Err(e) => Err(e).context("Failed to load configuration file"),
    };

    let outcome = match result {
        Ok(config) => run(config).await,
        Err(e) => Err(e),
    };

    match outcome {
        Ok(Some(summary)) => {
            if summary.has_failed_mutations() {
                warn!("Some playlist edits were dropped; the next run will retry them");
            }
            ExitCode::SUCCESS
        }
        Ok(None) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            exit_code_for(&e)
        }
    }
}

/// One locked run; `None` when another run holds the lock
async fn run(config: SyncConfig) -> Result<Option<RunSummary>> {
    info!(
        cache_dir = %config.cache_dir().display(),
        playlist_id = %config.playlist_id,
        dry_run = config.dry_run,
        "Starting opus-sync"
    );

    let _lock = match RunLock::acquire(config.cache_dir()) {
        Ok(lock) => lock,
        Err(SyncError::AlreadyRunning(path)) => {
            warn!(lock = %path, "Another sync run is in progress, exiting");
            return Ok(None);
        }
        Err(e) => return Err(e).context("Failed to acquire run lock"),
    };

    let store = Arc::new(
        open_state_store(&config.db_path(), config.grace)
            .await
            .context("Failed to open state store")?,
    );

    if config.clear_special_cache {
        let cleared = store
            .clear_special()
            .await
            .context("Failed to clear special-genre verdicts")?;
        info!(cleared, "Cleared stored special-genre verdicts");
    }

    let feed = Arc::new(
        LrtFeedClient::new(
            config.feed_url.clone(),
            config.feed_station.clone(),
            config.feed_time_zone,
        )
        .context("Failed to create feed client")?,
    );
    let catalog = Arc::new(
        SpotifyClient::new(config.credentials.clone()).context("Failed to create catalog client")?,
    );

    let resolver = TrackResolver::new(
        catalog.clone(),
        store.clone(),
        search_rate_limiter(config.search_rate_per_second),
        config.resolver_settings(),
    );

    let orchestrator = SyncOrchestrator::new(
        feed,
        catalog,
        store,
        resolver,
        GenreClassifier::new(&config.special_markers),
        config.sync_options(),
    );

    let summary = orchestrator
        .run(opus_common::time::now())
        .await
        .context("Sync run failed")?;

    Ok(Some(summary))
}

fn exit_code_for(error: &anyhow::Error) -> ExitCode {
    let auth_failure = error
        .chain()
        .filter_map(|cause| cause.downcast_ref::<SyncError>())
        .any(SyncError::is_fatal);

    if auth_failure {
        ExitCode::from(2)
    } else {
        ExitCode::from(1)
    }
}
