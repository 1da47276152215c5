//! In-memory collaborators for pipeline tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use opus_sync::db::{MemoryStateStore, StateStore};
use opus_sync::models::{Candidate, RawRecord};
use opus_sync::services::track_resolver::search_rate_limiter;
use opus_sync::services::{
    CatalogService, FeedSource, GenreClassifier, ResolverSettings, SpecialPlaylist, SyncOptions,
    SyncOrchestrator, TrackResolver,
};
use opus_sync::utils::RetryPolicy;
use opus_sync::{Result, SyncError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const MAIN_PLAYLIST: &str = "main";
pub const SPECIAL_PLAYLIST: &str = "dnb";

pub fn base_time() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_750_000_000, 0).unwrap()
}

pub fn record(artist: &str, title: &str, hours_ago: i64) -> RawRecord {
    RawRecord::new(artist, title, base_time() - Duration::hours(hours_ago))
}

pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

// ============================================================================
// Feed
// ============================================================================

#[derive(Default)]
pub struct FakeFeed {
    records: Mutex<Vec<RawRecord>>,
    failing: AtomicBool,
    pub calls: AtomicUsize,
}

impl FakeFeed {
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Default::default()
        }
    }

    pub fn set_records(&self, records: Vec<RawRecord>) {
        *self.records.lock().unwrap() = records;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl FeedSource for FakeFeed {
    async fn list_recent_plays(&self, since: DateTime<Utc>) -> Result<Vec<RawRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::TransientApi("feed returned 502".into()));
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.aired_at.is_none_or(|t| t >= since))
            .cloned()
            .collect())
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// Catalog with a fixed search table and mutable playlists
#[derive(Default)]
pub struct FakeCatalog {
    /// (lower-case artist, lower-case title) → candidates
    tracks: Mutex<HashMap<(String, String), Vec<Candidate>>>,
    playlists: Mutex<HashMap<String, Vec<String>>>,
    /// Title → remaining transient failures for its search
    search_failures: Mutex<HashMap<String, usize>>,
    search_auth_failure: AtomicBool,
    add_failures: AtomicUsize,
    /// Playlist whose adds are rejected with an auth error
    add_auth_failure: Mutex<Option<String>>,
    /// Catalog id → artist genres
    genres: Mutex<HashMap<String, Vec<String>>>,
    genre_failure: AtomicBool,
    search_delay: Mutex<Option<std::time::Duration>>,
    searches_in_flight: AtomicUsize,
    pub max_searches_in_flight: AtomicUsize,
    pub searches: AtomicUsize,
    pub genre_lookups: AtomicUsize,
    pub mutations: AtomicUsize,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a track that searches for (artist, title) return
    pub fn with_track(self, artist: &str, title: &str, catalog_id: &str) -> Self {
        self.add_track(artist, title, catalog_id);
        self
    }

    pub fn add_track(&self, artist: &str, title: &str, catalog_id: &str) {
        self.tracks.lock().unwrap().insert(
            (artist.to_lowercase(), title.to_lowercase()),
            vec![Candidate {
                catalog_id: catalog_id.to_string(),
                title: title.to_string(),
                artists: vec![artist.to_string()],
                popularity: 50,
            }],
        );
    }

    pub fn with_playlist(self, playlist_id: &str, items: &[&str]) -> Self {
        self.playlists
            .lock()
            .unwrap()
            .insert(playlist_id.to_string(), ids(items));
        self
    }

    pub fn with_genres(self, catalog_id: &str, genres: &[&str]) -> Self {
        self.genres
            .lock()
            .unwrap()
            .insert(catalog_id.to_string(), ids(genres));
        self
    }

    /// Hold every search for `delay` so overlapping calls can be observed
    pub fn with_search_delay(self, delay: std::time::Duration) -> Self {
        *self.search_delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn fail_genres(&self, failing: bool) {
        self.genre_failure.store(failing, Ordering::SeqCst);
    }

    pub fn fail_auth_on_add(&self, playlist_id: &str) {
        *self.add_auth_failure.lock().unwrap() = Some(playlist_id.to_string());
    }

    pub fn fail_search(&self, title: &str, times: usize) {
        self.search_failures
            .lock()
            .unwrap()
            .insert(title.to_lowercase(), times);
    }

    pub fn fail_auth(&self) {
        self.search_auth_failure.store(true, Ordering::SeqCst);
    }

    pub fn fail_adds(&self, times: usize) {
        self.add_failures.store(times, Ordering::SeqCst);
    }

    pub fn playlist(&self, playlist_id: &str) -> Vec<String> {
        self.playlists
            .lock()
            .unwrap()
            .get(playlist_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn genre_lookup_count(&self) -> usize {
        self.genre_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogService for FakeCatalog {
    async fn search_track(&self, artist: &str, title: &str) -> Result<Vec<Candidate>> {
        self.searches.fetch_add(1, Ordering::SeqCst);

        let delay = *self.search_delay.lock().unwrap();
        if let Some(delay) = delay {
            let in_flight = self.searches_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_searches_in_flight.fetch_max(in_flight, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            self.searches_in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        if self.search_auth_failure.load(Ordering::SeqCst) {
            return Err(SyncError::Auth("401 token revoked".into()));
        }

        if let Some(remaining) = self.search_failures.lock().unwrap().get_mut(&title.to_lowercase()) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SyncError::TransientApi("503 from search".into()));
            }
        }

        Ok(self
            .tracks
            .lock()
            .unwrap()
            .get(&(artist.to_lowercase(), title.to_lowercase()))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_playlist_items(&self, playlist_id: &str) -> Result<Vec<String>> {
        Ok(self.playlist(playlist_id))
    }

    async fn add_items(&self, playlist_id: &str, catalog_ids: &[String], position: Option<usize>) -> Result<()> {
        if self.add_auth_failure.lock().unwrap().as_deref() == Some(playlist_id) {
            return Err(SyncError::Auth("403 insufficient scope".into()));
        }

        if self
            .add_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SyncError::TransientApi("500 on add".into()));
        }

        self.mutations.fetch_add(1, Ordering::SeqCst);
        let mut playlists = self.playlists.lock().unwrap();
        let items = playlists.entry(playlist_id.to_string()).or_default();
        let at = position.unwrap_or(items.len()).min(items.len());
        items.splice(at..at, catalog_ids.iter().cloned());
        Ok(())
    }

    async fn remove_items(&self, playlist_id: &str, catalog_ids: &[String]) -> Result<()> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let mut playlists = self.playlists.lock().unwrap();
        if let Some(items) = playlists.get_mut(playlist_id) {
            items.retain(|id| !catalog_ids.contains(id));
        }
        Ok(())
    }

    async fn track_genres(&self, catalog_id: &str) -> Result<Vec<String>> {
        self.genre_lookups.fetch_add(1, Ordering::SeqCst);
        if self.genre_failure.load(Ordering::SeqCst) {
            return Err(SyncError::TransientApi("502 from artists".into()));
        }
        Ok(self
            .genres
            .lock()
            .unwrap()
            .get(catalog_id)
            .cloned()
            .unwrap_or_default())
    }
}

// ============================================================================
// Wiring
// ============================================================================

pub struct Harness {
    pub feed: Arc<FakeFeed>,
    pub catalog: Arc<FakeCatalog>,
    pub store: Arc<dyn StateStore>,
    pub orchestrator: SyncOrchestrator,
}

pub fn options() -> SyncOptions {
    SyncOptions {
        playlist_id: MAIN_PLAYLIST.to_string(),
        special_playlist: None,
        window: Duration::hours(72),
        resolve_concurrency: 4,
        retry: RetryPolicy::immediate(3),
        dry_run: false,
    }
}

pub fn special_options(max_tracks: usize) -> SyncOptions {
    SyncOptions {
        special_playlist: Some(SpecialPlaylist {
            playlist_id: SPECIAL_PLAYLIST.to_string(),
            max_tracks,
        }),
        ..options()
    }
}

pub fn harness(feed: Arc<FakeFeed>, catalog: Arc<FakeCatalog>, options: SyncOptions) -> Harness {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new(Duration::hours(24)));
    harness_with_store(feed, catalog, store, options)
}

pub fn harness_with_store(
    feed: Arc<FakeFeed>,
    catalog: Arc<FakeCatalog>,
    store: Arc<dyn StateStore>,
    options: SyncOptions,
) -> Harness {
    harness_with_rate(feed, catalog, store, options, 1000)
}

/// Harness whose catalog calls share a `per_second` rate limiter
pub fn harness_with_rate(
    feed: Arc<FakeFeed>,
    catalog: Arc<FakeCatalog>,
    store: Arc<dyn StateStore>,
    options: SyncOptions,
    per_second: u32,
) -> Harness {
    let resolver = TrackResolver::new(
        catalog.clone(),
        store.clone(),
        search_rate_limiter(per_second),
        ResolverSettings::default(),
    );
    let orchestrator = SyncOrchestrator::new(
        feed.clone(),
        catalog.clone(),
        store.clone(),
        resolver,
        GenreClassifier::default(),
        options,
    );

    Harness {
        feed,
        catalog,
        store,
        orchestrator,
    }
}
