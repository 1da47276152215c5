//! Track Resolver
//!
//! Maps a normalized track to a catalog id, consulting the state store first.
//!
//! **Algorithm:**
//! 1. Fresh cache entry (positive or negative) → reuse it, no search
//! 2. Search `clean_artist(artist) + title`, score every candidate
//! 3. Nothing acceptable and the artist names several people → search again
//!    with the first artist only
//! 4. Write the outcome back (positive: `window + grace`, negative: `negative_ttl`)
//!
//! **Scoring:**
//! - Exact case-insensitive (artist, title) match → 1.0
//! - Otherwise `0.5 * artist_similarity + 0.5 * title_similarity` (Jaro-Winkler)
//! - Highest score ≥ threshold wins; ties go to popularity, then result order
//!
//! Search errors are returned unchanged; the caller's retry policy decides
//! whether to try again. A failed search never writes to the cache.

use crate::db::StateStore;
use crate::error::Result;
use crate::models::{CacheEntry, Candidate, NormalizedTrack, ResolutionSource, ResolvedTrack};
use crate::services::catalog_client::CatalogService;
use crate::services::normalizer::{clean_title, normalize_key};
use chrono::{DateTime, Duration, Utc};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use regex::Regex;
use std::num::NonZeroU32;
use std::sync::{Arc, LazyLock};

/// Standalone word "and" in artist names
static AND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\band\b").expect("valid and regex"));

/// Separators between credited artists
static ARTIST_SEPARATOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*,\s*|\s+and\s+|\s*&\s*|\s+vs\.?\s+|\s*/\s*|\s+x\s+")
        .expect("valid separator regex")
});

/// Shared limiter for catalog searches
pub type SearchRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Build a search limiter allowing `per_second` requests per second
pub fn search_rate_limiter(per_second: u32) -> Arc<SearchRateLimiter> {
    let rate = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::direct(Quota::per_second(rate)))
}

/// Resolver tuning
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverSettings {
    /// Minimum score for a candidate to be accepted
    pub match_threshold: f64,
    /// Sliding window length
    pub window: Duration,
    /// Extra lifetime of positive entries beyond the window
    pub grace: Duration,
    /// Lifetime of "no match" entries
    pub negative_ttl: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            match_threshold: 0.80,
            window: Duration::hours(72),
            grace: Duration::hours(24),
            negative_ttl: Duration::hours(24),
        }
    }
}

/// Outcome of `TrackResolver::resolve`
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub resolved: ResolvedTrack,
    pub source: ResolutionSource,
}

/// Cache-backed catalog resolver
pub struct TrackResolver {
    catalog: Arc<dyn CatalogService>,
    store: Arc<dyn StateStore>,
    rate_limiter: Arc<SearchRateLimiter>,
    settings: ResolverSettings,
}

impl TrackResolver {
    pub fn new(
        catalog: Arc<dyn CatalogService>,
        store: Arc<dyn StateStore>,
        rate_limiter: Arc<SearchRateLimiter>,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            catalog,
            store,
            rate_limiter,
            settings,
        }
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Limiter shared by every catalog lookup of a run
    pub fn rate_limiter(&self) -> Arc<SearchRateLimiter> {
        self.rate_limiter.clone()
    }

    /// Resolve one track
    ///
    /// # Errors
    /// Whatever the catalog search returned; cache failures are logged and ignored.
    pub async fn resolve(&self, track: &NormalizedTrack, now: DateTime<Utc>) -> Result<Resolution> {
        if let Some(entry) = self.cached(&track.fingerprint, now).await {
            tracing::debug!(
                artist = %track.artist,
                title = %track.title,
                catalog_id = ?entry.catalog_id,
                "Resolved from cache"
            );
            return Ok(Resolution {
                resolved: ResolvedTrack {
                    fingerprint: track.fingerprint.clone(),
                    catalog_id: entry.catalog_id,
                    match_score: entry.match_score,
                    resolved_at: entry.resolved_at,
                },
                source: ResolutionSource::Cache,
            });
        }

        let best = self.search_best(track).await?;

        let resolved = ResolvedTrack {
            fingerprint: track.fingerprint.clone(),
            catalog_id: best.as_ref().map(|(c, _)| c.catalog_id.clone()),
            match_score: best.as_ref().map(|(_, score)| *score).unwrap_or(0.0),
            resolved_at: now,
        };

        match &resolved.catalog_id {
            Some(catalog_id) => tracing::info!(
                artist = %track.artist,
                title = %track.title,
                catalog_id = %catalog_id,
                score = resolved.match_score,
                "Resolved via catalog search"
            ),
            None => tracing::info!(
                artist = %track.artist,
                title = %track.title,
                "No acceptable catalog match"
            ),
        }

        self.write_back(&resolved).await;

        Ok(Resolution {
            resolved,
            source: ResolutionSource::Search,
        })
    }

    /// Fresh cache entry for a fingerprint, if any
    async fn cached(&self, fingerprint: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
        match self.store.get(fingerprint).await {
            Ok(Some(entry)) if entry.is_fresh(now) => Some(entry),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(fingerprint = %fingerprint, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    async fn write_back(&self, resolved: &ResolvedTrack) {
        let ttl = if resolved.catalog_id.is_some() {
            self.settings.window + self.settings.grace
        } else {
            self.settings.negative_ttl
        };
        let entry = CacheEntry::from_resolution(resolved, ttl);

        if let Err(e) = self.store.put(&resolved.fingerprint, &entry).await {
            tracing::warn!(fingerprint = %resolved.fingerprint, error = %e, "Cache write failed");
        }
    }

    /// Primary search, then first-artist fallback
    async fn search_best(&self, track: &NormalizedTrack) -> Result<Option<(Candidate, f64)>> {
        let search_artist = clean_artist(&track.artist);
        let candidates = self.search(&search_artist, &track.title).await?;
        if let Some(best) = pick_best(&track.artist, &track.title, &candidates, self.settings.match_threshold) {
            return Ok(Some(best));
        }

        let Some(first) = first_artist(&track.artist) else {
            return Ok(None);
        };

        tracing::debug!(artist = %track.artist, first_artist = %first, "Retrying search with first artist");
        let candidates = self.search(&clean_artist(&first), &track.title).await?;
        Ok(pick_best(&track.artist, &track.title, &candidates, self.settings.match_threshold))
    }

    async fn search(&self, artist: &str, title: &str) -> Result<Vec<Candidate>> {
        self.rate_limiter.until_ready().await;
        self.catalog.search_track(artist, title).await
    }
}

// ============================================================================
// Matching helpers
// ============================================================================

/// Search-friendly artist: "GandG" → "G&G", standalone "and" removed
pub fn clean_artist(artist: &str) -> String {
    let artist = artist.replace("GandG", "G&G");
    AND_RE
        .replace_all(&artist, "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// First credited artist when the string names several
pub fn first_artist(artist: &str) -> Option<String> {
    let mut parts = ARTIST_SEPARATOR_RE
        .split(artist)
        .map(str::trim)
        .filter(|p| !p.is_empty());
    let first = parts.next()?;
    parts.next().map(|_| first.to_string())
}

/// Title reduced for comparison: version suffixes and featuring credits removed
fn comparable_title(title: &str) -> String {
    let base = title.split(" - ").next().unwrap_or(title);
    normalize_key(&clean_title(base))
}

/// Score a candidate against a feed track, in `[0.0, 1.0]`
pub fn score_candidate(artist: &str, title: &str, candidate: &Candidate) -> f64 {
    let track_title = comparable_title(title);
    let candidate_title = comparable_title(&candidate.title);

    let track_artists: Vec<String> = std::iter::once(normalize_key(artist))
        .chain(first_artist(artist).map(|a| normalize_key(&a)))
        .collect();
    let candidate_artists: Vec<String> = std::iter::once(normalize_key(&candidate.artists.join(", ")))
        .chain(candidate.artists.iter().map(|a| normalize_key(a)))
        .filter(|a| !a.is_empty())
        .collect();

    if candidate_artists.contains(&track_artists[0]) && track_title == candidate_title {
        return 1.0;
    }

    let artist_similarity = track_artists
        .iter()
        .flat_map(|a| candidate_artists.iter().map(move |c| strsim::jaro_winkler(a, c)))
        .fold(0.0, f64::max);
    let title_similarity = strsim::jaro_winkler(&track_title, &candidate_title);

    0.5 * artist_similarity + 0.5 * title_similarity
}

/// Best candidate scoring at least `threshold`
///
/// Ties are broken by popularity, then by position in `candidates`.
pub fn pick_best(artist: &str, title: &str, candidates: &[Candidate], threshold: f64) -> Option<(Candidate, f64)> {
    let mut best: Option<(&Candidate, f64)> = None;

    for candidate in candidates {
        let score = score_candidate(artist, title, candidate);
        if score < threshold {
            continue;
        }
        let better = match best {
            None => true,
            Some((current, current_score)) => {
                score > current_score
                    || (score == current_score && candidate.popularity > current.popularity)
            }
        };
        if better {
            best = Some((candidate, score));
        }
    }

    best.map(|(c, score)| (c.clone(), score))
}
