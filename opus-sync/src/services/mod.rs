//! Pipeline services and their external collaborators

pub mod catalog_client;
pub mod feed_client;
pub mod genre_classifier;
pub mod normalizer;
pub mod reconciler;
pub mod special_detector;
pub mod sync_orchestrator;
pub mod track_resolver;

pub use catalog_client::{CatalogService, SpotifyClient, SpotifyCredentials};
pub use feed_client::{FeedSource, LrtFeedClient};
pub use genre_classifier::GenreClassifier;
pub use special_detector::SpecialDetector;
pub use sync_orchestrator::{SpecialPlaylist, SyncOptions, SyncOrchestrator};
pub use track_resolver::{ResolverSettings, TrackResolver};
