//! Sync Orchestrator
//!
//! Drives one run of the pipeline:
//!
//! ```text
//! fetch → normalize → window filter → dedupe → classify → resolve
//!       → merge with stored window → persist window
//!       → fetch playlist → reconcile → apply
//!       → (catalog genre detection → special playlist) → sweep
//! ```
//!
//! **Failure handling:**
//! - Malformed records and unresolved tracks are collected in the `RunSummary`
//! - Transient errors are retried through the `RetryPolicy`
//! - `SyncError::Auth` aborts the run immediately
//! - A mutation batch that still fails after retries is dropped and reported;
//!   nothing is rolled back, the next run computes a fresh diff
//!
//! The caller holds the run lock for the duration of `run`.

use crate::db::StateStore;
use crate::error::{Result, SyncError};
use crate::models::{
    DesiredWindow, EditScript, NormalizedTrack, PlaylistOutcome, ResolutionSource, RunSummary,
    UnresolvedReason, UnresolvedTrack, WindowEntry,
};
use crate::services::catalog_client::{CatalogService, MAX_ITEMS_PER_REQUEST};
use crate::services::feed_client::FeedSource;
use crate::services::genre_classifier::GenreClassifier;
use crate::services::normalizer;
use crate::services::reconciler::{build_desired_window, reconcile, reconcile_capped};
use crate::services::special_detector::{DetectionSource, SpecialDetector};
use crate::services::track_resolver::TrackResolver;
use crate::utils::retry::RetryPolicy;
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;

/// Secondary playlist holding the newest special-genre tracks
#[derive(Debug, Clone, PartialEq)]
pub struct SpecialPlaylist {
    pub playlist_id: String,
    pub max_tracks: usize,
}

/// Per-run behavior
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub playlist_id: String,
    pub special_playlist: Option<SpecialPlaylist>,
    pub window: Duration,
    /// Upper bound on concurrent resolutions
    pub resolve_concurrency: usize,
    pub retry: RetryPolicy,
    /// Compute and log edits without mutating playlists or state
    pub dry_run: bool,
}

/// One-run pipeline driver
pub struct SyncOrchestrator {
    feed: Arc<dyn FeedSource>,
    catalog: Arc<dyn CatalogService>,
    store: Arc<dyn StateStore>,
    resolver: TrackResolver,
    classifier: GenreClassifier,
    detector: SpecialDetector,
    options: SyncOptions,
}

impl SyncOrchestrator {
    pub fn new(
        feed: Arc<dyn FeedSource>,
        catalog: Arc<dyn CatalogService>,
        store: Arc<dyn StateStore>,
        resolver: TrackResolver,
        classifier: GenreClassifier,
        options: SyncOptions,
    ) -> Self {
        let detector = SpecialDetector::new(
            catalog.clone(),
            store.clone(),
            classifier.clone(),
            resolver.rate_limiter(),
        );

        Self {
            feed,
            catalog,
            store,
            resolver,
            classifier,
            detector,
            options,
        }
    }

    /// Run the pipeline once with `now` as the reference time
    ///
    /// # Errors
    /// `SyncError::Auth` from any collaborator, `SyncError::FeedUnavailable` when
    /// the feed fails and no stored window exists, or the error that prevented the
    /// main playlist from being read.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<RunSummary> {
        let since = now - self.options.window;
        let mut summary = RunSummary {
            dry_run: self.options.dry_run,
            ..Default::default()
        };

        tracing::info!(
            since = %since.to_rfc3339(),
            dry_run = self.options.dry_run,
            "Starting sync run"
        );

        let stored_window = match self.store.load_window().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "Stored play window unreadable, starting empty");
                Vec::new()
            }
        };

        // Step 1: Fetch
        let records = match self
            .options
            .retry
            .run("feed fetch", || self.feed.list_recent_plays(since))
            .await
        {
            Ok(records) => records,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) if stored_window.is_empty() => {
                return Err(SyncError::FeedUnavailable(e.to_string()));
            }
            Err(e) => {
                tracing::warn!(error = %e, stored = stored_window.len(), "Feed unavailable, using stored window");
                summary.feed_error = Some(e.to_string());
                Vec::new()
            }
        };
        summary.fetched = records.len();

        // Step 2: Normalize, window filter, dedupe by fingerprint (latest airing)
        let mut latest: HashMap<String, NormalizedTrack> = HashMap::new();
        for record in &records {
            let track = match normalizer::normalize(record) {
                Ok(track) => track,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed record");
                    summary.malformed.push(record.describe());
                    continue;
                }
            };

            if track.aired_at < since || track.aired_at > now {
                summary.out_of_window += 1;
                continue;
            }

            match latest.get(&track.fingerprint) {
                Some(existing) if existing.aired_at >= track.aired_at => {}
                _ => {
                    latest.insert(track.fingerprint.clone(), track);
                }
            }
        }

        // Step 3: Classify
        let mut tracks: Vec<NormalizedTrack> = latest
            .into_values()
            .map(|t| self.classifier.classify(t))
            .collect();
        tracks.sort_by_key(|t| t.aired_at);

        // Step 4: Resolve
        let fresh = self.resolve_all(tracks, now, &mut summary).await?;

        // Step 5: Desired window
        let desired = build_desired_window(stored_window.into_iter().chain(fresh), now, self.options.window);
        summary.window_size = desired.len();

        if !self.options.dry_run {
            if let Err(e) = self.store.save_window(&desired.entries).await {
                tracing::warn!(error = %e, "Failed to persist play window");
            }
        }

        // Step 6: Main playlist
        let main_id = self.options.playlist_id.clone();
        summary.main = self
            .sync_playlist(&main_id, |current| reconcile(&desired, current))
            .await?;
        if let Some(error) = &summary.main.fetch_error {
            return Err(SyncError::TransientApi(format!(
                "playlist {} could not be read: {}",
                main_id, error
            )));
        }

        // Step 7: Special playlist
        if let Some(special) = &self.options.special_playlist {
            let special_ids = self.special_ids(&desired, now, &mut summary).await?;
            let outcome = self
                .sync_playlist(&special.playlist_id, |current| {
                    reconcile_capped(&special_ids, current, special.max_tracks)
                })
                .await?;
            summary.special = Some(outcome);
        }

        // Step 8: Sweep
        if !self.options.dry_run {
            match self.store.sweep(now).await {
                Ok(removed) => summary.swept = removed,
                Err(e) => tracing::warn!(error = %e, "Cache sweep failed"),
            }
        }

        log_summary(&summary);
        Ok(summary)
    }

    /// Resolve tracks with bounded concurrency; returns window entries for matches
    async fn resolve_all(
        &self,
        tracks: Vec<NormalizedTrack>,
        now: DateTime<Utc>,
        summary: &mut RunSummary,
    ) -> Result<Vec<WindowEntry>> {
        let concurrency = self.options.resolve_concurrency.max(1);
        let retry = &self.options.retry;
        let resolver = &self.resolver;

        let mut results = stream::iter(tracks)
            .map(|track| async move {
                let result = retry
                    .run("catalog search", || resolver.resolve(&track, now))
                    .await;
                (track, result)
            })
            .buffer_unordered(concurrency);

        let mut entries = Vec::new();
        while let Some((track, result)) = results.next().await {
            match result {
                Ok(resolution) => {
                    match resolution.source {
                        ResolutionSource::Cache => summary.resolved_from_cache += 1,
                        ResolutionSource::Search => summary.resolved_from_search += 1,
                    }
                    match resolution.resolved.catalog_id {
                        Some(catalog_id) => entries.push(WindowEntry {
                            fingerprint: track.fingerprint,
                            catalog_id,
                            artist: track.artist,
                            title: track.title,
                            aired_at: track.aired_at,
                            special: track.special,
                        }),
                        None => summary.unresolved.push(UnresolvedTrack {
                            artist: track.artist,
                            title: track.title,
                            reason: UnresolvedReason::NoMatch,
                        }),
                    }
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, "Authentication failed, aborting run");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        artist = %track.artist,
                        title = %track.title,
                        error = %e,
                        "Resolution failed, will retry next run"
                    );
                    summary.unresolved.push(UnresolvedTrack {
                        artist: track.artist,
                        title: track.title,
                        reason: UnresolvedReason::SearchFailed(e.to_string()),
                    });
                }
            }
        }

        Ok(entries)
    }

    /// Special-genre catalog ids of the window, oldest airing first
    ///
    /// A failed genre lookup falls back to the feed-side flag for this run.
    async fn special_ids(
        &self,
        desired: &DesiredWindow,
        now: DateTime<Utc>,
        summary: &mut RunSummary,
    ) -> Result<Vec<String>> {
        let concurrency = self.options.resolve_concurrency.max(1);
        let retry = &self.options.retry;
        let detector = &self.detector;

        let mut results = stream::iter(&desired.entries)
            .map(|entry| async move {
                let result = retry
                    .run("genre lookup", || detector.detect(entry, now))
                    .await;
                (entry, result)
            })
            .buffered(concurrency);

        let mut ids = Vec::new();
        while let Some((entry, result)) = results.next().await {
            let special = match result {
                Ok(detection) => {
                    if detection.source == DetectionSource::Catalog {
                        summary.genre_lookups += 1;
                    }
                    detection.special
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, "Authentication failed, aborting run");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        artist = %entry.artist,
                        title = %entry.title,
                        error = %e,
                        "Genre lookup failed, using feed data"
                    );
                    summary.genre_lookups += 1;
                    summary.genre_lookup_failures += 1;
                    entry.special
                }
            };
            if special {
                ids.push(entry.catalog_id.clone());
            }
        }

        Ok(ids)
    }

    /// Fetch, diff and apply one playlist
    async fn sync_playlist<F>(&self, playlist_id: &str, plan: F) -> Result<PlaylistOutcome>
    where
        F: FnOnce(&[String]) -> EditScript,
    {
        let mut outcome = PlaylistOutcome {
            playlist_id: playlist_id.to_string(),
            ..Default::default()
        };

        let current = match self
            .options
            .retry
            .run("playlist fetch", || self.catalog.get_playlist_items(playlist_id))
            .await
        {
            Ok(items) => items,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::error!(playlist_id = %playlist_id, error = %e, "Playlist unreadable, skipping");
                outcome.fetch_error = Some(e.to_string());
                return Ok(outcome);
            }
        };

        outcome.planned = plan(&current);

        tracing::info!(
            playlist_id = %playlist_id,
            current = current.len(),
            removals = outcome.planned.removals.len(),
            additions = outcome.planned.additions.len(),
            "Edit script computed"
        );

        if self.options.dry_run {
            for id in &outcome.planned.removals {
                tracing::info!(playlist_id = %playlist_id, catalog_id = %id, "[dry run] would remove");
            }
            for id in &outcome.planned.additions {
                tracing::info!(playlist_id = %playlist_id, catalog_id = %id, "[dry run] would add");
            }
            return Ok(outcome);
        }

        self.apply(playlist_id, &mut outcome).await?;
        Ok(outcome)
    }

    /// Removals first, then additions in chronological order, in batches
    async fn apply(&self, playlist_id: &str, outcome: &mut PlaylistOutcome) -> Result<()> {
        let script = outcome.planned.clone();

        for batch in script.removals.chunks(MAX_ITEMS_PER_REQUEST) {
            let result = self
                .options
                .retry
                .run("playlist remove", || self.catalog.remove_items(playlist_id, batch))
                .await;
            match result {
                Ok(()) => outcome.removed += batch.len(),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => record_mutation_failure(outcome, "remove", batch, e),
            }
        }

        for batch in script.additions.chunks(MAX_ITEMS_PER_REQUEST) {
            let result = self
                .options
                .retry
                .run("playlist add", || self.catalog.add_items(playlist_id, batch, None))
                .await;
            match result {
                Ok(()) => outcome.added += batch.len(),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => record_mutation_failure(outcome, "add", batch, e),
            }
        }

        Ok(())
    }
}

fn record_mutation_failure(outcome: &mut PlaylistOutcome, action: &str, batch: &[String], error: SyncError) {
    let error = SyncError::PlaylistMutation(format!(
        "{} of {} item(s) on {} failed: {}",
        action,
        batch.len(),
        outcome.playlist_id,
        error
    ));
    tracing::error!(error = %error, "Dropping mutation batch");
    outcome.failed_mutations.push(error.to_string());
}

fn log_summary(summary: &RunSummary) {
    tracing::info!(
        fetched = summary.fetched,
        malformed = summary.malformed.len(),
        out_of_window = summary.out_of_window,
        from_cache = summary.resolved_from_cache,
        from_search = summary.resolved_from_search,
        unresolved = summary.unresolved.len(),
        window = summary.window_size,
        removed = summary.main.removed,
        added = summary.main.added,
        failed_mutations = summary.main.failed_mutations.len(),
        swept = summary.swept,
        dry_run = summary.dry_run,
        "Sync run complete"
    );

    if let Some(special) = &summary.special {
        tracing::info!(
            playlist_id = %special.playlist_id,
            genre_lookups = summary.genre_lookups,
            genre_lookup_failures = summary.genre_lookup_failures,
            removed = special.removed,
            added = special.added,
            failed_mutations = special.failed_mutations.len(),
            "Special playlist synced"
        );
    }

    for track in &summary.unresolved {
        tracing::info!(artist = %track.artist, title = %track.title, reason = ?track.reason, "Unresolved");
    }
}
