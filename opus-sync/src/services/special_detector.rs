//! Special Detector
//!
//! Decides special-genre membership of resolved catalog tracks. The feed rarely
//! carries a genre, so the artists' catalog genres are the primary signal.
//!
//! **Algorithm:**
//! 1. Stored verdict for the catalog id → reuse it, no lookup
//! 2. Otherwise fetch the credited artists' genres, match them against the
//!    classifier markers and store the verdict
//!
//! The feed-side flag on the window entry (tags, title keywords) always counts:
//! a track is special when either source says so. Lookup errors are returned
//! unchanged and nothing is stored; the caller decides how to fall back.

use crate::db::StateStore;
use crate::error::Result;
use crate::models::{SpecialStatus, WindowEntry};
use crate::services::catalog_client::CatalogService;
use crate::services::genre_classifier::GenreClassifier;
use crate::services::track_resolver::SearchRateLimiter;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Where a verdict came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionSource {
    Stored,
    Catalog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub special: bool,
    pub source: DetectionSource,
}

/// Catalog-genre based special-genre detector
pub struct SpecialDetector {
    catalog: Arc<dyn CatalogService>,
    store: Arc<dyn StateStore>,
    classifier: GenreClassifier,
    rate_limiter: Arc<SearchRateLimiter>,
}

impl SpecialDetector {
    pub fn new(
        catalog: Arc<dyn CatalogService>,
        store: Arc<dyn StateStore>,
        classifier: GenreClassifier,
        rate_limiter: Arc<SearchRateLimiter>,
    ) -> Self {
        Self {
            catalog,
            store,
            classifier,
            rate_limiter,
        }
    }

    /// Verdict for one window entry
    ///
    /// # Errors
    /// Whatever the genre lookup returned; store failures are logged and ignored.
    pub async fn detect(&self, entry: &WindowEntry, now: DateTime<Utc>) -> Result<Detection> {
        match self.store.get_special(&entry.catalog_id).await {
            Ok(Some(status)) => {
                return Ok(Detection {
                    special: status.special || entry.special,
                    source: DetectionSource::Stored,
                });
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(catalog_id = %entry.catalog_id, error = %e, "Special status read failed, looking up");
            }
        }

        self.rate_limiter.until_ready().await;
        let genres = self.catalog.track_genres(&entry.catalog_id).await?;

        let status = SpecialStatus {
            special: self.classifier.genres_match(&genres),
            genres,
            classified_at: now,
        };

        if status.special {
            tracing::info!(
                artist = %entry.artist,
                title = %entry.title,
                genres = ?status.genres,
                "Catalog genres mark track as special"
            );
        }

        if let Err(e) = self.store.put_special(&entry.catalog_id, &status).await {
            tracing::warn!(catalog_id = %entry.catalog_id, error = %e, "Special status write failed");
        }

        Ok(Detection {
            special: status.special || entry.special,
            source: DetectionSource::Catalog,
        })
    }
}
