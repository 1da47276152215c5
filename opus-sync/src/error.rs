//! Error types for opus-sync
//!
//! Failure taxonomy of a sync run. Only `Auth` and a total inability to fetch or
//! reconcile are meant to reach the process boundary; everything per-item is
//! collected into the `RunSummary` instead.

use thiserror::Error;

/// Main error type for the sync pipeline
#[derive(Debug, Error)]
pub enum SyncError {
    /// Feed record missing artist, title or timestamp (skipped, never fatal)
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// Network failure, rate limiting or 5xx from an external service
    #[error("Transient API error: {0}")]
    TransientApi(String),

    /// Rejected credentials or missing permission (aborts the run)
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Persisted cache unreadable or malformed
    #[error("State corruption: {0}")]
    StateCorruption(String),

    /// Playlist add/remove failed after retries
    #[error("Playlist mutation failed: {0}")]
    PlaylistMutation(String),

    /// Non-retryable API response (4xx other than auth/rate limit)
    #[error("API error {0}: {1}")]
    Api(u16, String),

    /// Response body could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),

    /// Feed unreachable and no stored window to fall back on
    #[error("Feed unavailable: {0}")]
    FeedUnavailable(String),

    /// Another run holds the lock
    #[error("Another sync run is in progress (lock: {0})")]
    AlreadyRunning(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// State store database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// File I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Bootstrap configuration file error from opus-common
    #[error("{0}")]
    Common(#[from] opus_common::Error),
}

impl SyncError {
    /// Whether the retry policy may attempt the operation again
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::TransientApi(_))
    }

    /// Whether the error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Auth(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return SyncError::Parse(err.to_string());
        }
        match err.status() {
            Some(status) if status.as_u16() == 401 || status.as_u16() == 403 => {
                SyncError::Auth(err.to_string())
            }
            Some(status) if status.as_u16() == 429 || status.is_server_error() => {
                SyncError::TransientApi(err.to_string())
            }
            Some(status) => SyncError::Api(status.as_u16(), err.to_string()),
            // Connect/timeout/body errors carry no status
            None => SyncError::TransientApi(err.to_string()),
        }
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, SyncError>;
