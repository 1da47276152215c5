//! Record Normalizer
//!
//! Turns a feed record into a `NormalizedTrack`. Pure functions only.
//!
//! **Fingerprint:** SHA-256 (lowercase hex) of the lower-cased, whitespace-collapsed
//! artist and title joined by a unit separator. Air time does not participate, so
//! every airing of the same song maps to the same fingerprint.

use crate::error::{Result, SyncError};
use crate::models::{NormalizedTrack, RawRecord};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

/// Trailing release year, e.g. "Song (2024)"
static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\d{4}\)\s*$").expect("valid year regex"));

/// Featuring credit, e.g. "Song (feat. Someone)" / "(ft Someone)"
static FEAT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\((?:feat|ft)\.?\s+.*?\)\s*").expect("valid feat regex"));

const FINGERPRINT_SEPARATOR: char = '\u{1f}';

/// Lower-case, trim and collapse internal whitespace
pub fn normalize_key(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Deterministic identity of a logical track
pub fn fingerprint(artist: &str, title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_key(artist).as_bytes());
    hasher.update(FINGERPRINT_SEPARATOR.to_string().as_bytes());
    hasher.update(normalize_key(title).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Remove a trailing release year and featuring credits from a title
pub fn clean_title(title: &str) -> String {
    let without_year = YEAR_RE.replace(title, "");
    let without_feat = FEAT_RE.replace_all(without_year.trim(), "");
    without_feat.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split a feed genre label into individual tags
///
/// "Drum & Bass; Jungle" → ["Drum & Bass", "Jungle"]
pub fn split_genre_tags(genre: Option<&str>) -> Vec<String> {
    genre
        .map(|g| {
            g.split([',', ';', '/'])
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Normalize one feed record
///
/// # Errors
/// `SyncError::MalformedRecord` when artist, title or timestamp is missing or blank.
pub fn normalize(record: &RawRecord) -> Result<NormalizedTrack> {
    let artist = record
        .artist
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| SyncError::MalformedRecord(format!("missing artist: {}", record.describe())))?;

    let title = record
        .title
        .as_deref()
        .map(clean_title)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| SyncError::MalformedRecord(format!("missing title: {}", record.describe())))?;

    let aired_at = record
        .aired_at
        .ok_or_else(|| SyncError::MalformedRecord(format!("missing timestamp: {}", record.describe())))?;

    Ok(NormalizedTrack {
        fingerprint: fingerprint(artist, &title),
        artist: artist.to_string(),
        title,
        aired_at,
        genre_tags: split_genre_tags(record.genre.as_deref()),
        special: false,
    })
}
