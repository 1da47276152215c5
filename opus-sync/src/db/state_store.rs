//! State Store
//!
//! Durable key/value cache mapping a track fingerprint to its resolution result, plus
//! the last-seen play window and the special-genre verdict of each catalog track.
//! The only state carried from one run to the next.
//!
//! **Durability:** every `put` is a single-row upsert and `save_window` replaces the
//! window inside one transaction, so a crash never loses previously committed
//! entries.
//!
//! **Corruption:** an unreadable database file is moved aside and replaced with an
//! empty one (see `crate::db::open_pool`); individual rows that fail to decode are
//! treated as absent.

use crate::error::{Result, SyncError};
use crate::models::{CacheEntry, SpecialStatus, WindowEntry};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use opus_common::time::{from_epoch_millis, to_epoch_millis};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Persistent cross-run state used by the pipeline
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Cache entry for a fingerprint, fresh or not
    async fn get(&self, fingerprint: &str) -> Result<Option<CacheEntry>>;

    /// Insert or overwrite one cache entry
    async fn put(&self, fingerprint: &str, entry: &CacheEntry) -> Result<()>;

    /// Remove entries with `expires_at < now - grace`; returns the number removed
    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize>;

    /// Last saved play window, oldest airing first
    async fn load_window(&self) -> Result<Vec<WindowEntry>>;

    /// Replace the stored play window
    async fn save_window(&self, entries: &[WindowEntry]) -> Result<()>;

    /// Special-genre verdict for a catalog track
    async fn get_special(&self, catalog_id: &str) -> Result<Option<SpecialStatus>>;

    /// Insert or overwrite a special-genre verdict
    async fn put_special(&self, catalog_id: &str, status: &SpecialStatus) -> Result<()>;

    /// Forget every special-genre verdict; returns the number removed
    async fn clear_special(&self) -> Result<usize>;
}

// ============================================================================
// SQLite implementation
// ============================================================================

/// SQLite-backed state store
#[derive(Debug, Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
    grace: Duration,
}

impl SqliteStateStore {
    /// Wrap an initialized pool (tables must exist, see `crate::db::init_tables`)
    pub fn new(pool: SqlitePool, grace: Duration) -> Self {
        Self { pool, grace }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Number of cache rows, expired ones included
    pub async fn count_entries(&self) -> Result<usize> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM track_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as usize)
    }

    fn decode_entry(row: &SqliteRow) -> std::result::Result<CacheEntry, String> {
        let catalog_id: Option<String> = row.try_get("catalog_id").map_err(|e| e.to_string())?;
        let match_score: f64 = row.try_get("match_score").map_err(|e| e.to_string())?;
        let resolved_at: i64 = row.try_get("resolved_at").map_err(|e| e.to_string())?;
        let expires_at: i64 = row.try_get("expires_at").map_err(|e| e.to_string())?;

        Ok(CacheEntry {
            catalog_id: catalog_id.filter(|id| !id.is_empty()),
            match_score,
            resolved_at: from_epoch_millis(resolved_at)
                .ok_or_else(|| format!("resolved_at out of range: {}", resolved_at))?,
            expires_at: from_epoch_millis(expires_at)
                .ok_or_else(|| format!("expires_at out of range: {}", expires_at))?,
        })
    }

    fn decode_special(row: &SqliteRow) -> std::result::Result<SpecialStatus, String> {
        let genres: String = row.try_get("genres").map_err(|e| e.to_string())?;
        let classified_at: i64 = row.try_get("classified_at").map_err(|e| e.to_string())?;
        Ok(SpecialStatus {
            special: row.try_get("special").map_err(|e| e.to_string())?,
            genres: serde_json::from_str(&genres).map_err(|e| e.to_string())?,
            classified_at: from_epoch_millis(classified_at)
                .ok_or_else(|| format!("classified_at out of range: {}", classified_at))?,
        })
    }

    fn decode_window_entry(row: &SqliteRow) -> std::result::Result<WindowEntry, String> {
        let aired_at: i64 = row.try_get("aired_at").map_err(|e| e.to_string())?;
        Ok(WindowEntry {
            fingerprint: row.try_get("fingerprint").map_err(|e| e.to_string())?,
            catalog_id: row.try_get("catalog_id").map_err(|e| e.to_string())?,
            artist: row.try_get("artist").map_err(|e| e.to_string())?,
            title: row.try_get("title").map_err(|e| e.to_string())?,
            aired_at: from_epoch_millis(aired_at)
                .ok_or_else(|| format!("aired_at out of range: {}", aired_at))?,
            special: row.try_get("special").map_err(|e| e.to_string())?,
        })
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get(&self, fingerprint: &str) -> Result<Option<CacheEntry>> {
        let row = sqlx::query(
            "SELECT catalog_id, match_score, resolved_at, expires_at FROM track_cache WHERE fingerprint = ?",
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        match Self::decode_entry(&row) {
            Ok(entry) => Ok(Some(entry)),
            Err(reason) => {
                tracing::warn!(
                    fingerprint = %fingerprint,
                    reason = %reason,
                    "Discarding malformed cache entry"
                );
                sqlx::query("DELETE FROM track_cache WHERE fingerprint = ?")
                    .bind(fingerprint)
                    .execute(&self.pool)
                    .await?;
                Ok(None)
            }
        }
    }

    async fn put(&self, fingerprint: &str, entry: &CacheEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO track_cache (fingerprint, catalog_id, match_score, resolved_at, expires_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(fingerprint) DO UPDATE SET
                catalog_id = excluded.catalog_id,
                match_score = excluded.match_score,
                resolved_at = excluded.resolved_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(fingerprint)
        .bind(entry.catalog_id.as_deref())
        .bind(entry.match_score)
        .bind(to_epoch_millis(entry.resolved_at))
        .bind(to_epoch_millis(entry.expires_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = to_epoch_millis(now - self.grace);
        let result = sqlx::query("DELETE FROM track_cache WHERE expires_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected() as usize;
        if removed > 0 {
            tracing::info!(removed, "Swept expired cache entries");
        }
        Ok(removed)
    }

    async fn load_window(&self) -> Result<Vec<WindowEntry>> {
        let rows = sqlx::query(
            "SELECT fingerprint, catalog_id, artist, title, aired_at, special FROM play_window ORDER BY aired_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            match Self::decode_window_entry(row) {
                Ok(entry) => entries.push(entry),
                Err(reason) => {
                    tracing::warn!(reason = %reason, "Skipping malformed play window row");
                }
            }
        }
        Ok(entries)
    }

    async fn save_window(&self, entries: &[WindowEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM play_window").execute(&mut *tx).await?;

        for entry in entries {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO play_window (fingerprint, catalog_id, artist, title, aired_at, special)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&entry.fingerprint)
            .bind(&entry.catalog_id)
            .bind(&entry.artist)
            .bind(&entry.title)
            .bind(to_epoch_millis(entry.aired_at))
            .bind(entry.special)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(entries = entries.len(), "Play window saved");
        Ok(())
    }

    async fn get_special(&self, catalog_id: &str) -> Result<Option<SpecialStatus>> {
        let row = sqlx::query("SELECT special, genres, classified_at FROM special_status WHERE catalog_id = ?")
            .bind(catalog_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        match Self::decode_special(&row) {
            Ok(status) => Ok(Some(status)),
            Err(reason) => {
                tracing::warn!(catalog_id = %catalog_id, reason = %reason, "Discarding malformed special status");
                sqlx::query("DELETE FROM special_status WHERE catalog_id = ?")
                    .bind(catalog_id)
                    .execute(&self.pool)
                    .await?;
                Ok(None)
            }
        }
    }

    async fn put_special(&self, catalog_id: &str, status: &SpecialStatus) -> Result<()> {
        let genres = serde_json::to_string(&status.genres).map_err(|e| SyncError::Parse(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO special_status (catalog_id, special, genres, classified_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(catalog_id) DO UPDATE SET
                special = excluded.special,
                genres = excluded.genres,
                classified_at = excluded.classified_at
            "#,
        )
        .bind(catalog_id)
        .bind(status.special)
        .bind(genres)
        .bind(to_epoch_millis(status.classified_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear_special(&self) -> Result<usize> {
        let result = sqlx::query("DELETE FROM special_status").execute(&self.pool).await?;
        Ok(result.rows_affected() as usize)
    }
}

// ============================================================================
// In-memory implementation
// ============================================================================

/// Volatile state store for tests and throwaway runs
#[derive(Debug)]
pub struct MemoryStateStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
    window: Mutex<Vec<WindowEntry>>,
    special: Mutex<HashMap<String, SpecialStatus>>,
    grace: Duration,
}

impl MemoryStateStore {
    pub fn new(grace: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            window: Mutex::new(Vec::new()),
            special: Mutex::new(HashMap::new()),
            grace,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, fingerprint: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.lock().await.get(fingerprint).cloned())
    }

    async fn put(&self, fingerprint: &str, entry: &CacheEntry) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(fingerprint.to_string(), entry.clone());
        Ok(())
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - self.grace;
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at >= cutoff);
        Ok(before - entries.len())
    }

    async fn load_window(&self) -> Result<Vec<WindowEntry>> {
        let mut window = self.window.lock().await.clone();
        window.sort_by_key(|e| e.aired_at);
        Ok(window)
    }

    async fn save_window(&self, entries: &[WindowEntry]) -> Result<()> {
        *self.window.lock().await = entries.to_vec();
        Ok(())
    }

    async fn get_special(&self, catalog_id: &str) -> Result<Option<SpecialStatus>> {
        Ok(self.special.lock().await.get(catalog_id).cloned())
    }

    async fn put_special(&self, catalog_id: &str, status: &SpecialStatus) -> Result<()> {
        self.special
            .lock()
            .await
            .insert(catalog_id.to_string(), status.clone());
        Ok(())
    }

    async fn clear_special(&self) -> Result<usize> {
        let mut special = self.special.lock().await;
        let cleared = special.len();
        special.clear();
        Ok(cleared)
    }
}
