//! Playlist Reconciler
//!
//! Pure diffing between the desired window and the live playlist.
//!
//! **Edit script:**
//! - Removals: distinct playlist ids missing from the window, in playlist order
//! - Additions: window ids missing from the playlist, oldest airing first
//!
//! Retained entries are never touched, so their relative order and any
//! pre-existing duplicates survive a run unchanged.

use crate::models::{DesiredWindow, EditScript, WindowEntry};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};

/// Build the desired window from stored and freshly resolved airings
///
/// Keeps airings inside `[now - window, now]`, deduplicates by fingerprint and
/// then by catalog id (latest airing wins, later input wins on equal times) and
/// orders the result by ascending airing time.
pub fn build_desired_window<I>(entries: I, now: DateTime<Utc>, window: Duration) -> DesiredWindow
where
    I: IntoIterator<Item = WindowEntry>,
{
    let window_start = now - window;

    let mut by_fingerprint: HashMap<String, WindowEntry> = HashMap::new();
    for entry in entries {
        if entry.aired_at < window_start || entry.aired_at > now {
            continue;
        }
        keep_latest(&mut by_fingerprint, entry.fingerprint.clone(), entry);
    }

    let mut by_catalog_id: HashMap<String, WindowEntry> = HashMap::new();
    for entry in sorted_by_airing(by_fingerprint.into_values().collect()) {
        keep_latest(&mut by_catalog_id, entry.catalog_id.clone(), entry);
    }

    DesiredWindow {
        entries: sorted_by_airing(by_catalog_id.into_values().collect()),
    }
}

fn keep_latest(map: &mut HashMap<String, WindowEntry>, key: String, entry: WindowEntry) {
    match map.get(&key) {
        Some(existing) if existing.aired_at > entry.aired_at => {}
        _ => {
            map.insert(key, entry);
        }
    }
}

fn sorted_by_airing(mut entries: Vec<WindowEntry>) -> Vec<WindowEntry> {
    entries.sort_by(|a, b| {
        a.aired_at
            .cmp(&b.aired_at)
            .then_with(|| a.fingerprint.cmp(&b.fingerprint))
    });
    entries
}

/// Minimal edit script turning `current` into a playlist holding the window
pub fn reconcile(desired: &DesiredWindow, current: &[String]) -> EditScript {
    let desired_ids: HashSet<&str> = desired.entries.iter().map(|e| e.catalog_id.as_str()).collect();
    let current_ids: HashSet<&str> = current.iter().map(String::as_str).collect();

    let mut removals = Vec::new();
    let mut seen = HashSet::new();
    for id in current {
        if !desired_ids.contains(id.as_str()) && seen.insert(id.as_str()) {
            removals.push(id.clone());
        }
    }

    let additions = desired
        .entries
        .iter()
        .map(|e| &e.catalog_id)
        .filter(|id| !current_ids.contains(id.as_str()))
        .cloned()
        .collect();

    EditScript { removals, additions }
}

/// Edit script for a playlist capped at `cap` entries
///
/// `desired` is chronological; only its newest `cap` distinct ids are targeted.
/// Targeted ids missing from the playlist are added, then untargeted playlist
/// entries are removed front first (oldest) until the playlist fits the cap.
/// Untargeted entries stay while there is room, so a playlist that already holds
/// the target produces an empty script.
pub fn reconcile_capped(desired: &[String], current: &[String], cap: usize) -> EditScript {
    let mut seen = HashSet::new();
    let mut target: Vec<&String> = desired
        .iter()
        .rev()
        .filter(|id| seen.insert(id.as_str()))
        .take(cap)
        .collect();
    target.reverse();

    let target_ids: HashSet<&str> = target.iter().map(|id| id.as_str()).collect();
    let current_ids: HashSet<&str> = current.iter().map(String::as_str).collect();

    let additions: Vec<String> = target
        .into_iter()
        .filter(|id| !current_ids.contains(id.as_str()))
        .cloned()
        .collect();

    let overflow = (current.len() + additions.len()).saturating_sub(cap);

    // Removing an id drops every occurrence of it
    let mut occurrences: HashMap<&str, usize> = HashMap::new();
    for id in current {
        *occurrences.entry(id.as_str()).or_default() += 1;
    }

    let mut removals = Vec::new();
    let mut removed = 0;
    let mut queued = HashSet::new();
    for id in current {
        if removed >= overflow {
            break;
        }
        if !target_ids.contains(id.as_str()) && queued.insert(id.as_str()) {
            removed += occurrences[id.as_str()];
            removals.push(id.clone());
        }
    }

    EditScript { removals, additions }
}
