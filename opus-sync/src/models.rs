//! Data model of a sync run
//!
//! `RawRecord` is produced by the feed, `NormalizedTrack` and `ResolvedTrack` live
//! for one run, `CacheEntry`, `WindowEntry` and `SpecialStatus` are persisted by
//! the state store.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Feed side
// ============================================================================

/// Feed-native play record
///
/// Fields are optional at this stage; the normalizer rejects incomplete records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub aired_at: Option<DateTime<Utc>>,
    pub genre: Option<String>,
}

impl RawRecord {
    /// Record with all mandatory fields present
    pub fn new(artist: impl Into<String>, title: impl Into<String>, aired_at: DateTime<Utc>) -> Self {
        Self {
            artist: Some(artist.into()),
            title: Some(title.into()),
            aired_at: Some(aired_at),
            genre: None,
        }
    }

    /// Attach a genre label
    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = Some(genre.into());
        self
    }

    /// Short human-readable description for run summaries
    pub fn describe(&self) -> String {
        format!(
            "{} - {}",
            self.artist.as_deref().unwrap_or("?"),
            self.title.as_deref().unwrap_or("?")
        )
    }
}

/// Canonical track descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTrack {
    /// Stable hash of the normalized (artist, title) pair
    pub fingerprint: String,
    /// Display artist (original casing)
    pub artist: String,
    /// Display title (original casing, release year / featuring credits removed)
    pub title: String,
    /// Broadcast timestamp
    pub aired_at: DateTime<Utc>,
    /// Genre tags from the feed (may be empty)
    pub genre_tags: Vec<String>,
    /// Special-genre membership, set by the classifier
    pub special: bool,
}

// ============================================================================
// Catalog side
// ============================================================================

/// Catalog search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub catalog_id: String,
    pub title: String,
    /// Credited artists in catalog order
    pub artists: Vec<String>,
    /// Catalog-reported popularity (0-100 on Spotify)
    pub popularity: u32,
}

/// Outcome of resolving one track
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTrack {
    pub fingerprint: String,
    /// `None` when no acceptable match was found
    pub catalog_id: Option<String>,
    pub match_score: f64,
    pub resolved_at: DateTime<Utc>,
}

/// Where a resolution came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Cache,
    Search,
}

// ============================================================================
// Persisted state
// ============================================================================

/// Persisted resolution result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// `None` records a negative ("no match found") entry
    pub catalog_id: Option<String>,
    pub match_score: f64,
    pub resolved_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Build the entry for a resolution with the given lifetime
    pub fn from_resolution(resolved: &ResolvedTrack, ttl: Duration) -> Self {
        Self {
            catalog_id: resolved.catalog_id.clone(),
            match_score: resolved.match_score,
            resolved_at: resolved.resolved_at,
            expires_at: resolved.resolved_at + ttl,
        }
    }

    /// Entries at or past their expiry are never reused
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    pub fn is_negative(&self) -> bool {
        self.catalog_id.is_none()
    }
}

/// One airing of a resolved track inside the play window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowEntry {
    pub fingerprint: String,
    pub catalog_id: String,
    pub artist: String,
    pub title: String,
    pub aired_at: DateTime<Utc>,
    pub special: bool,
}

/// Persisted special-genre verdict for a catalog track, from its artists' genres
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialStatus {
    pub special: bool,
    /// Catalog genres the verdict was derived from
    pub genres: Vec<String>,
    pub classified_at: DateTime<Utc>,
}

// ============================================================================
// Reconciliation
// ============================================================================

/// Catalog ids that should be on the playlist, oldest airing first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesiredWindow {
    pub entries: Vec<WindowEntry>,
}

impl DesiredWindow {
    pub fn catalog_ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.catalog_id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Ordered playlist edits: removals first, then additions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditScript {
    pub removals: Vec<String>,
    pub additions: Vec<String>,
}

impl EditScript {
    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.additions.is_empty()
    }

    /// Number of edit operations
    pub fn len(&self) -> usize {
        self.removals.len() + self.additions.len()
    }
}

// ============================================================================
// Run summary
// ============================================================================

/// Why a track did not make it into the window
#[derive(Debug, Clone, PartialEq)]
pub enum UnresolvedReason {
    /// Search ran and nothing scored above the threshold
    NoMatch,
    /// Search kept failing; not cached, retried next run
    SearchFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnresolvedTrack {
    pub artist: String,
    pub title: String,
    pub reason: UnresolvedReason,
}

/// Per-playlist result of a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaylistOutcome {
    pub playlist_id: String,
    /// Edit script computed for this run
    pub planned: EditScript,
    pub removed: usize,
    pub added: usize,
    /// Batches dropped after exhausting retries
    pub failed_mutations: Vec<String>,
    /// Set when the playlist could not be read, so nothing was changed
    pub fetch_error: Option<String>,
}

/// Aggregated result of one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub fetched: usize,
    pub malformed: Vec<String>,
    pub out_of_window: usize,
    pub resolved_from_cache: usize,
    pub resolved_from_search: usize,
    pub unresolved: Vec<UnresolvedTrack>,
    /// Feed failure that was survived using the stored window
    pub feed_error: Option<String>,
    pub window_size: usize,
    /// Artist-genre lookups made against the catalog
    pub genre_lookups: usize,
    /// Lookups that failed; those tracks fell back to feed data
    pub genre_lookup_failures: usize,
    pub main: PlaylistOutcome,
    pub special: Option<PlaylistOutcome>,
    pub swept: usize,
    pub dry_run: bool,
}

impl RunSummary {
    /// Whether any edit was dropped this run
    pub fn has_failed_mutations(&self) -> bool {
        !self.main.failed_mutations.is_empty()
            || self
                .special
                .as_ref()
                .is_some_and(|s| !s.failed_mutations.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(catalog_id: Option<&str>) -> ResolvedTrack {
        ResolvedTrack {
            fingerprint: "fp".to_string(),
            catalog_id: catalog_id.map(str::to_string),
            match_score: 0.9,
            resolved_at: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn test_cache_entry_expiry_boundary() {
        let entry = CacheEntry::from_resolution(&resolved(Some("T1")), Duration::hours(1));
        let at_expiry = entry.expires_at;

        assert!(entry.is_fresh(at_expiry - Duration::seconds(1)));
        assert!(!entry.is_fresh(at_expiry));
        assert!(!entry.is_fresh(at_expiry + Duration::seconds(1)));
    }

    #[test]
    fn test_negative_entry() {
        let entry = CacheEntry::from_resolution(&resolved(None), Duration::hours(24));
        assert!(entry.is_negative());
        assert_eq!(entry.expires_at - entry.resolved_at, Duration::hours(24));
    }

    #[test]
    fn test_edit_script_len() {
        let script = EditScript {
            removals: vec!["A".into()],
            additions: vec!["D".into(), "E".into()],
        };
        assert_eq!(script.len(), 3);
        assert!(!script.is_empty());
        assert!(EditScript::default().is_empty());
    }
}
