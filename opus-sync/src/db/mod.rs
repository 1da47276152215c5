//! Database access for opus-sync
//!
//! The state store lives in a single SQLite file inside the cache folder.
//! Opening it is self-healing: a file that cannot be opened, migrated or passes
//! `PRAGMA quick_check` with anything other than `ok` is moved aside and replaced
//! by an empty database.

pub mod state_store;

pub use state_store::{MemoryStateStore, SqliteStateStore, StateStore};

use crate::error::{Result, SyncError};
use chrono::{Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};

/// State store file name inside the cache folder
pub const DB_FILE_NAME: &str = "track_cache.sqlite3";

/// Result of opening the state store database
#[derive(Debug)]
pub struct OpenedPool {
    pub pool: SqlitePool,
    /// Set when a corrupt file was quarantined and replaced
    pub quarantined: Option<PathBuf>,
}

/// Open (creating if needed) the state store database
///
/// On corruption the damaged file is renamed to `<name>.corrupt-<timestamp>` and an
/// empty database is created in its place. A second failure is returned as
/// `SyncError::StateCorruption`.
pub async fn open_pool(db_path: &Path) -> Result<OpenedPool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    match try_open(db_path).await {
        Ok(pool) => Ok(OpenedPool {
            pool,
            quarantined: None,
        }),
        Err(first_error) => {
            if !db_path.exists() {
                return Err(first_error);
            }

            tracing::warn!(
                path = %db_path.display(),
                error = %first_error,
                "State store unreadable, starting from an empty cache"
            );

            let quarantined = quarantine(db_path)?;

            let pool = try_open(db_path).await.map_err(|e| {
                SyncError::StateCorruption(format!(
                    "fresh state store at {} could not be created: {}",
                    db_path.display(),
                    e
                ))
            })?;

            Ok(OpenedPool {
                pool,
                quarantined: Some(quarantined),
            })
        }
    }
}

/// Open the SQLite state store and wrap it in a `SqliteStateStore`
pub async fn open_state_store(db_path: &Path, grace: Duration) -> Result<SqliteStateStore> {
    let opened = open_pool(db_path).await?;
    if let Some(moved_to) = &opened.quarantined {
        tracing::warn!(moved_to = %moved_to.display(), "Corrupt state store quarantined");
    }
    Ok(SqliteStateStore::new(opened.pool, grace))
}

/// Single-connection in-memory database with tables created
pub async fn open_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

async fn try_open(db_path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    if let Err(e) = verify_and_init(&pool).await {
        pool.close().await;
        return Err(e);
    }

    tracing::debug!(path = %db_path.display(), "State store opened");
    Ok(pool)
}

async fn verify_and_init(pool: &SqlitePool) -> Result<()> {
    let (check,): (String,) = sqlx::query_as("PRAGMA quick_check")
        .fetch_one(pool)
        .await?;
    if check != "ok" {
        return Err(SyncError::StateCorruption(format!("quick_check: {}", check)));
    }
    init_tables(pool).await
}

/// Move the database file and its WAL/SHM siblings out of the way
fn quarantine(db_path: &Path) -> Result<PathBuf> {
    let suffix = format!("corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S"));
    let target = with_suffix(db_path, &suffix);
    std::fs::rename(db_path, &target)?;

    for sidecar in ["-wal", "-shm"] {
        let mut name = db_path.as_os_str().to_owned();
        name.push(sidecar);
        let path = PathBuf::from(name);
        if path.exists() {
            let moved = with_suffix(&path, &suffix);
            if let Err(e) = std::fs::rename(&path, &moved) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to move sidecar file");
            }
        }
    }

    Ok(target)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Create state store tables
///
/// Timestamps are stored as epoch milliseconds.
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS track_cache (
            fingerprint TEXT PRIMARY KEY,
            catalog_id TEXT,
            match_score REAL NOT NULL,
            resolved_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_track_cache_expires_at ON track_cache(expires_at)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS play_window (
            fingerprint TEXT PRIMARY KEY,
            catalog_id TEXT NOT NULL,
            artist TEXT NOT NULL,
            title TEXT NOT NULL,
            aired_at INTEGER NOT NULL,
            special INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS special_status (
            catalog_id TEXT PRIMARY KEY,
            special INTEGER NOT NULL,
            genres TEXT NOT NULL,
            classified_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::debug!("State store tables initialized (track_cache, play_window, special_status)");

    Ok(())
}
