//! Catalog Client (Spotify Web API)
//!
//! Implements `CatalogService` over the Spotify Web API using a refresh-token
//! grant. Catalog ids are track URIs (`spotify:track:<id>`), which is the form the
//! playlist endpoints accept.
//!
//! **Status mapping:**
//! - 401 → token refreshed and the request retried once, then `SyncError::Auth`
//! - 403 (and a rejected refresh token) → `SyncError::Auth`
//! - 429/5xx/network → `SyncError::TransientApi`
//! - other non-success → `SyncError::Api`

use crate::error::{Result, SyncError};
use crate::models::Candidate;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const ACCOUNTS_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_BASE_URL: &str = "https://api.spotify.com/v1";
const USER_AGENT: &str = concat!("opus-sync/", env!("CARGO_PKG_VERSION"));
const SEARCH_LIMIT: u32 = 10;
/// The several-artists endpoint accepts at most this many ids
const MAX_ARTISTS_PER_REQUEST: usize = 50;
/// Playlist endpoints accept at most this many items per request
pub const MAX_ITEMS_PER_REQUEST: usize = 100;
/// Refresh the access token this long before it expires
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Catalog operations used by the pipeline
#[async_trait]
pub trait CatalogService: Send + Sync {
    /// Search tracks by artist and title, best catalog matches first
    async fn search_track(&self, artist: &str, title: &str) -> Result<Vec<Candidate>>;

    /// Catalog ids currently on the playlist, in playlist order
    async fn get_playlist_items(&self, playlist_id: &str) -> Result<Vec<String>>;

    /// Insert items at `position` (append when `None`)
    async fn add_items(&self, playlist_id: &str, catalog_ids: &[String], position: Option<usize>) -> Result<()>;

    /// Remove every occurrence of the given items
    async fn remove_items(&self, playlist_id: &str, catalog_ids: &[String]) -> Result<()>;

    /// Genres of every artist credited on a track, first credit first, without repeats
    async fn track_genres(&self, catalog_id: &str) -> Result<Vec<String>>;
}

/// OAuth application credentials
#[derive(Clone)]
pub struct SpotifyCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for SpotifyCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpotifyCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: Option<Paging<SpotifyTrack>>,
}

#[derive(Debug, Deserialize)]
struct Paging<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrack {
    uri: String,
    name: String,
    #[serde(default)]
    artists: Vec<SpotifyArtist>,
    #[serde(default)]
    popularity: u32,
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TrackCredits {
    #[serde(default)]
    artists: Vec<ArtistRef>,
}

#[derive(Debug, Deserialize)]
struct ArtistRef {
    /// Missing for local files
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArtistsResponse {
    /// Null entries for unknown ids
    #[serde(default)]
    artists: Vec<Option<ArtistGenres>>,
}

#[derive(Debug, Deserialize)]
struct ArtistGenres {
    #[serde(default)]
    genres: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    /// Null for unavailable or deleted tracks
    track: Option<PlaylistTrack>,
}

#[derive(Debug, Deserialize)]
struct PlaylistTrack {
    uri: Option<String>,
}

impl From<SpotifyTrack> for Candidate {
    fn from(track: SpotifyTrack) -> Self {
        Candidate {
            catalog_id: track.uri,
            title: track.name,
            artists: track.artists.into_iter().map(|a| a.name).collect(),
            popularity: track.popularity,
        }
    }
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

// ============================================================================
// Client
// ============================================================================

/// Spotify Web API client
pub struct SpotifyClient {
    http_client: reqwest::Client,
    credentials: SpotifyCredentials,
    token: Mutex<Option<AccessToken>>,
    api_base_url: String,
    token_url: String,
}

impl SpotifyClient {
    pub fn new(credentials: SpotifyCredentials) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SyncError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            credentials,
            token: Mutex::new(None),
            api_base_url: API_BASE_URL.to_string(),
            token_url: ACCOUNTS_TOKEN_URL.to_string(),
        })
    }

    /// Point the client at other endpoints (local stubs)
    pub fn with_endpoints(mut self, api_base_url: impl Into<String>, token_url: impl Into<String>) -> Self {
        self.api_base_url = api_base_url.into().trim_end_matches('/').to_string();
        self.token_url = token_url.into();
        self
    }

    /// Current access token, refreshing it when missing or about to expire
    async fn access_token(&self) -> Result<String> {
        let mut guard = self.token.lock().await;

        if let Some(token) = guard.as_ref() {
            if Instant::now() + TOKEN_EXPIRY_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        tracing::debug!("Refreshing Spotify access token");

        let response = self
            .http_client
            .post(&self.token_url)
            .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", self.credentials.refresh_token.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 400 || status.as_u16() == 401 {
            // invalid_grant / invalid_client
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Auth(format!("token refresh rejected ({}): {}", status, body)));
        }

        let token: TokenResponse = response.error_for_status()?.json().await?;
        let value = token.access_token.clone();
        *guard = Some(AccessToken {
            value: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });

        tracing::info!(expires_in_secs = token.expires_in, "Spotify access token refreshed");
        Ok(value)
    }

    /// Drop the cached token if it is still the one the API rejected
    async fn invalidate_token(&self, rejected: &str) {
        let mut guard = self.token.lock().await;
        if guard.as_ref().is_some_and(|t| t.value == rejected) {
            *guard = None;
        }
    }

    /// Send an authorized request; a 401 forces one token refresh and a retry
    async fn send_authorized<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn(&str) -> reqwest::RequestBuilder,
    {
        let token = self.access_token().await?;
        let response = build(&token).send().await?;
        if response.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Ok(response.error_for_status()?);
        }

        tracing::warn!("Access token rejected, refreshing and retrying once");
        self.invalidate_token(&token).await;
        let token = self.access_token().await?;
        Ok(build(&token).send().await?.error_for_status()?)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        let response = self
            .send_authorized(|token| self.http_client.get(url).bearer_auth(token).query(query))
            .await?;
        Ok(response.json().await?)
    }

    async fn send_json(&self, method: reqwest::Method, url: &str, body: serde_json::Value) -> Result<()> {
        self.send_authorized(|token| {
            self.http_client
                .request(method.clone(), url)
                .bearer_auth(token)
                .json(&body)
        })
        .await?;
        Ok(())
    }

    fn playlist_tracks_url(&self, playlist_id: &str) -> String {
        format!("{}/playlists/{}/tracks", self.api_base_url, playlist_id)
    }
}

/// Bare track id of a `spotify:track:<id>` URI (other forms pass through)
fn track_id(catalog_id: &str) -> &str {
    catalog_id.rsplit(':').next().unwrap_or(catalog_id)
}

/// Append genres not seen yet, keeping first-seen order
fn merge_genres(genres: &mut Vec<String>, response: ArtistsResponse) {
    for artist in response.artists.into_iter().flatten() {
        for genre in artist.genres {
            if !genres.contains(&genre) {
                genres.push(genre);
            }
        }
    }
}

/// Field-qualified search query, e.g. `track:"Song" artist:"Band"`
pub fn search_query(artist: &str, title: &str) -> String {
    let strip = |s: &str| s.replace('"', "");
    format!("track:\"{}\" artist:\"{}\"", strip(title), strip(artist))
}

#[async_trait]
impl CatalogService for SpotifyClient {
    async fn search_track(&self, artist: &str, title: &str) -> Result<Vec<Candidate>> {
        let url = format!("{}/search", self.api_base_url);
        let query = search_query(artist, title);

        tracing::debug!(query = %query, "Searching Spotify catalog");

        let response: SearchResponse = self
            .get_json(
                &url,
                &[
                    ("q", query),
                    ("type", "track".to_string()),
                    ("limit", SEARCH_LIMIT.to_string()),
                ],
            )
            .await?;

        Ok(response
            .tracks
            .map(|page| page.items.into_iter().map(Candidate::from).collect())
            .unwrap_or_default())
    }

    async fn get_playlist_items(&self, playlist_id: &str) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut page: Paging<PlaylistItem> = self
            .get_json(
                &self.playlist_tracks_url(playlist_id),
                &[
                    ("fields", "items(track(uri)),next".to_string()),
                    ("limit", MAX_ITEMS_PER_REQUEST.to_string()),
                ],
            )
            .await?;

        loop {
            ids.extend(
                page.items
                    .into_iter()
                    .filter_map(|item| item.track.and_then(|t| t.uri)),
            );

            match page.next.take() {
                Some(next_url) => page = self.get_json(&next_url, &[]).await?,
                None => break,
            }
        }

        tracing::debug!(playlist_id = %playlist_id, items = ids.len(), "Fetched playlist items");
        Ok(ids)
    }

    async fn add_items(&self, playlist_id: &str, catalog_ids: &[String], position: Option<usize>) -> Result<()> {
        if catalog_ids.is_empty() {
            return Ok(());
        }
        let mut body = json!({ "uris": catalog_ids });
        if let Some(position) = position {
            body["position"] = json!(position);
        }
        self.send_json(reqwest::Method::POST, &self.playlist_tracks_url(playlist_id), body)
            .await
    }

    async fn remove_items(&self, playlist_id: &str, catalog_ids: &[String]) -> Result<()> {
        if catalog_ids.is_empty() {
            return Ok(());
        }
        let tracks: Vec<_> = catalog_ids.iter().map(|id| json!({ "uri": id })).collect();
        self.send_json(
            reqwest::Method::DELETE,
            &self.playlist_tracks_url(playlist_id),
            json!({ "tracks": tracks }),
        )
        .await
    }

    async fn track_genres(&self, catalog_id: &str) -> Result<Vec<String>> {
        let url = format!("{}/tracks/{}", self.api_base_url, track_id(catalog_id));
        let credits: TrackCredits = self.get_json(&url, &[]).await?;

        let artist_ids: Vec<String> = credits.artists.into_iter().filter_map(|a| a.id).collect();
        let mut genres = Vec::new();
        for chunk in artist_ids.chunks(MAX_ARTISTS_PER_REQUEST) {
            let response: ArtistsResponse = self
                .get_json(
                    &format!("{}/artists", self.api_base_url),
                    &[("ids", chunk.join(","))],
                )
                .await?;
            merge_genres(&mut genres, response);
        }

        tracing::debug!(catalog_id = %catalog_id, artists = artist_ids.len(), ?genres, "Fetched artist genres");
        Ok(genres)
    }
}
