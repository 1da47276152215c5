//! Spotify client against a local stub of the accounts and Web API endpoints

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use opus_sync::services::{CatalogService, SpotifyClient, SpotifyCredentials};
use opus_sync::SyncError;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

/// Stub state: issues `t1`, `t2`, ... and accepts only the listed tokens
#[derive(Clone, Default)]
struct Stub {
    token_requests: Arc<AtomicUsize>,
    accepted: Arc<Mutex<Vec<String>>>,
}

impl Stub {
    fn accepting(tokens: &[&str]) -> Self {
        let stub = Self::default();
        *stub.accepted.lock().unwrap() = tokens.iter().map(|t| t.to_string()).collect();
        stub
    }

    fn token_requests(&self) -> usize {
        self.token_requests.load(Ordering::SeqCst)
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(token) = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
        else {
            return false;
        };
        self.accepted.lock().unwrap().iter().any(|t| t == token)
    }
}

async fn issue_token(State(stub): State<Stub>) -> Json<serde_json::Value> {
    let n = stub.token_requests.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({ "access_token": format!("t{n}"), "expires_in": 3600 }))
}

async fn playlist_tracks(State(stub): State<Stub>, headers: HeaderMap) -> Response {
    if !stub.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({
        "items": [
            { "track": { "uri": "spotify:track:one" } },
            { "track": null }
        ],
        "next": null
    }))
    .into_response()
}

async fn track(State(stub): State<Stub>, headers: HeaderMap) -> Response {
    if !stub.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({ "artists": [{ "id": "a1" }, { "id": "a2" }, { "id": null }] })).into_response()
}

async fn artists(
    State(stub): State<Stub>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !stub.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let artists: Vec<_> = query
        .get("ids")
        .map(|ids| ids.split(',').collect::<Vec<_>>())
        .unwrap_or_default()
        .into_iter()
        .map(|id| match id {
            "a1" => json!({ "genres": ["liquid funk", "drum and bass"] }),
            "a2" => json!({ "genres": ["drum and bass", "jungle"] }),
            _ => serde_json::Value::Null,
        })
        .collect();
    Json(json!({ "artists": artists })).into_response()
}

/// Serve the stub on a random local port; returns its base URL
async fn spawn_stub(stub: Stub) -> String {
    let app = Router::new()
        .route("/api/token", post(issue_token))
        .route("/v1/playlists/:id/tracks", get(playlist_tracks))
        .route("/v1/tracks/:id", get(track))
        .route("/v1/artists", get(artists))
        .with_state(stub);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn client(base_url: &str) -> SpotifyClient {
    SpotifyClient::new(SpotifyCredentials {
        client_id: "id".into(),
        client_secret: "secret".into(),
        refresh_token: "refresh".into(),
    })
    .unwrap()
    .with_endpoints(format!("{base_url}/v1"), format!("{base_url}/api/token"))
}

#[tokio::test]
async fn test_rejected_token_is_refreshed_and_request_retried() {
    let stub = Stub::accepting(&["t2"]);
    let base_url = spawn_stub(stub.clone()).await;

    let items = client(&base_url).get_playlist_items("p").await.unwrap();

    assert_eq!(items, vec!["spotify:track:one".to_string()]);
    assert_eq!(stub.token_requests(), 2);
}

#[tokio::test]
async fn test_token_rejected_after_refresh_is_an_auth_error() {
    let stub = Stub::accepting(&[]);
    let base_url = spawn_stub(stub.clone()).await;

    let result = client(&base_url).get_playlist_items("p").await;

    assert!(matches!(result, Err(SyncError::Auth(_))), "{result:?}");
    assert_eq!(stub.token_requests(), 2);
}

#[tokio::test]
async fn test_track_genres_merge_credited_artists() {
    let stub = Stub::accepting(&["t1"]);
    let base_url = spawn_stub(stub.clone()).await;
    let client = client(&base_url);

    let genres = client.track_genres("spotify:track:abc").await.unwrap();

    assert_eq!(genres, vec!["liquid funk", "drum and bass", "jungle"]);
    // The cached token serves every call
    client.track_genres("spotify:track:abc").await.unwrap();
    assert_eq!(stub.token_requests(), 1);
}
