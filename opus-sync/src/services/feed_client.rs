//! Feed Client (LRT Opus RDS endpoint)
//!
//! Implements `FeedSource` over the LRT JSON endpoint. The endpoint has changed
//! field names over time, so parsing tries several known shapes:
//!
//! - song list under `rdsList`, `rds`, `data` or `items`, or the top-level array
//! - air time in `dt`, `time` or `timestamp`: epoch milliseconds, or local
//!   wall-clock `YYYY.MM.DD HH:MM` in the station's time zone
//! - song in `song` or `name` as `"Artist - Title"`, split on the first dash
//!
//! Items whose fields cannot be read are still returned (with the missing parts
//! left empty) so the normalizer can report them as malformed.

use crate::error::Result;
use crate::models::RawRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use opus_common::time::{from_epoch_millis, parse_local, to_epoch_millis};
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_FEED_URL: &str = "https://www.lrt.lt/api/json/rds";
pub const DEFAULT_STATION: &str = "opus";
pub const DEFAULT_TIME_ZONE: Tz = chrono_tz::Europe::Vilnius;

const LOCAL_TIME_FORMAT: &str = "%Y.%m.%d %H:%M";
const LIST_KEYS: [&str; 4] = ["rdsList", "rds", "data", "items"];
const TIME_KEYS: [&str; 3] = ["dt", "time", "timestamp"];
const SONG_KEYS: [&str; 2] = ["song", "name"];

/// Source of recent airings
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Records aired at or after `since` (records without a readable time included)
    async fn list_recent_plays(&self, since: DateTime<Utc>) -> Result<Vec<RawRecord>>;
}

/// LRT RDS feed client
pub struct LrtFeedClient {
    http_client: reqwest::Client,
    feed_url: String,
    station: String,
    time_zone: Tz,
}

impl LrtFeedClient {
    pub fn new(feed_url: impl Into<String>, station: impl Into<String>, time_zone: Tz) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http_client,
            feed_url: feed_url.into(),
            station: station.into(),
            time_zone,
        })
    }
}

#[async_trait]
impl FeedSource for LrtFeedClient {
    async fn list_recent_plays(&self, since: DateTime<Utc>) -> Result<Vec<RawRecord>> {
        // Cache buster, as the endpoint is served through a CDN
        let cache_buster = to_epoch_millis(Utc::now()).to_string();

        tracing::info!(url = %self.feed_url, station = %self.station, "Fetching radio feed");

        let body = self
            .http_client
            .get(&self.feed_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&[("station", self.station.as_str()), ("v", cache_buster.as_str())])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let records = parse_feed(&body, self.time_zone);
        let total = records.len();
        let recent: Vec<RawRecord> = records
            .into_iter()
            .filter(|r| r.aired_at.is_none_or(|t| t >= since))
            .collect();

        tracing::info!(total, recent = recent.len(), "Radio feed parsed");
        Ok(recent)
    }
}

/// Parse a feed payload into raw records
///
/// Non-JSON payloads and unknown shapes yield an empty list.
pub fn parse_feed(body: &str, time_zone: Tz) -> Vec<RawRecord> {
    let data: Value = match serde_json::from_str(body) {
        Ok(data) => data,
        Err(_) => {
            let preview: String = body.chars().take(200).collect();
            tracing::error!(payload = %preview, "Feed returned non-JSON payload");
            return Vec::new();
        }
    };

    let Some(items) = locate_list(&data) else {
        let keys: Vec<&String> = data
            .as_object()
            .map(|o| o.keys().take(10).collect())
            .unwrap_or_default();
        tracing::error!(?keys, "Unable to locate song list in feed payload");
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| parse_item(item, time_zone))
        .collect()
}

fn locate_list(data: &Value) -> Option<&Vec<Value>> {
    if let Some(object) = data.as_object() {
        return LIST_KEYS
            .iter()
            .find_map(|key| object.get(*key).and_then(Value::as_array));
    }
    data.as_array()
}

/// One feed item; `None` only for items that are not objects at all
fn parse_item(item: &Value, time_zone: Tz) -> Option<RawRecord> {
    let object = item.as_object()?;

    let aired_at = TIME_KEYS
        .iter()
        .filter_map(|key| object.get(*key))
        .find(|v| !v.is_null() && v.as_str() != Some(""))
        .and_then(|v| parse_air_time(v, time_zone));

    let song = SONG_KEYS
        .iter()
        .filter_map(|key| object.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or_default();

    let (artist, title) = split_song(song);

    let genre = object
        .get("genre")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string);

    Some(RawRecord {
        artist,
        title,
        aired_at,
        genre,
    })
}

fn parse_air_time(value: &Value, time_zone: Tz) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(from_epoch_millis),
        Value::String(s) => parse_local(s, LOCAL_TIME_FORMAT, time_zone),
        _ => None,
    }
}

/// Split `"Artist - Title"` on the first dash
///
/// A song without a dash yields no artist.
pub fn split_song(song: &str) -> (Option<String>, Option<String>) {
    let non_empty = |s: &str| {
        let s = s.trim();
        (!s.is_empty()).then(|| s.to_string())
    };

    match song.split_once(" - ").or_else(|| song.split_once('-')) {
        Some((artist, title)) => (non_empty(artist), non_empty(title)),
        None => (None, non_empty(song)),
    }
}
