use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::error::EngineError;
use crate::http;
use crate::lyrics::model::{LyricsResponse, SyncType};
use crate::lyrics::parse_synced_lyrics;

const BASE_URL: &str = "https://lrclib.net/api";
const DURATION_TOLERANCE_SEC: f64 = 10.0;

pub struct LrclibClient {
    http: Client,
    base_url: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct LrclibRecord {
    #[serde(default)]
    instrumental: bool,
    #[serde(rename = "plainLyrics", default)]
    plain_lyrics: Option<String>,
    #[serde(rename = "syncedLyrics", default)]
    synced_lyrics: Option<String>,
    /// seconds, per the LRCLIB API
    #[serde(default)]
    duration: f64,
}

impl LrclibClient {
    pub fn new() -> Self {
        Self::with_base(http::shared_client().clone(), BASE_URL)
    }

    pub fn with_base(http: Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get_record(&self, artist: &str, track: &str) -> Result<LrclibRecord, EngineError> {
        let resp = self
            .http
            .get(format!("{}/get", self.base_url))
            .query(&[("artist_name", artist), ("track_name", track)])
            .header(reqwest::header::USER_AGENT, http::random_desktop_user_agent())
            .timeout(Duration::from_secs(15))
            .send()
            .await?;
        match resp.status().as_u16() {
            200 => Ok(resp.json().await?),
            404 => Err(EngineError::NotFound("lyrics not found".to_string())),
            status => Err(EngineError::Transport(format!(
                "lrclib returned status {status}"
            ))),
        }
    }

    async fn search_records(&self, query: &str) -> Result<Vec<LrclibRecord>, EngineError> {
        let resp = self
            .http
            .get(format!("{}/search", self.base_url))
            .query(&[("q", query)])
            .header(reqwest::header::USER_AGENT, http::random_desktop_user_agent())
            .timeout(Duration::from_secs(15))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(EngineError::Transport(format!(
                "lrclib search returned status {}",
                resp.status().as_u16()
            )));
        }
        Ok(resp.json().await?)
    }

    fn to_response(record: &LrclibRecord, source: &str) -> Option<LyricsResponse> {
        if record.instrumental {
            return Some(LyricsResponse {
                lines: Vec::new(),
                sync_type: SyncType::Instrumental,
                instrumental: true,
                plain_lyrics: String::new(),
                provider: "LRCLIB".to_string(),
                source: source.to_string(),
            });
        }
        if let Some(synced) = record.synced_lyrics.as_deref().filter(|s| !s.trim().is_empty()) {
            let lines = parse_synced_lyrics(synced);
            if !lines.is_empty() {
                return Some(LyricsResponse {
                    lines,
                    sync_type: SyncType::LineSynced,
                    instrumental: false,
                    plain_lyrics: record.plain_lyrics.clone().unwrap_or_default(),
                    provider: "LRCLIB".to_string(),
                    source: source.to_string(),
                });
            }
        }
        let plain = record.plain_lyrics.as_deref().unwrap_or("").trim();
        if !plain.is_empty() {
            return Some(LyricsResponse::unsynced_from_plain(plain, "LRCLIB", source));
        }
        None
    }

    fn best_search_match(records: &[LrclibRecord], target_duration: f64) -> Option<&LrclibRecord> {
        let duration_ok = |r: &LrclibRecord| {
            target_duration == 0.0 || (r.duration - target_duration).abs() <= DURATION_TOLERANCE_SEC
        };
        records
            .iter()
            .find(|r| duration_ok(r) && r.synced_lyrics.as_deref().unwrap_or("").trim() != "")
            .or_else(|| {
                records
                    .iter()
                    .find(|r| duration_ok(r) && r.plain_lyrics.as_deref().unwrap_or("").trim() != "")
            })
            .or_else(|| {
                records
                    .iter()
                    .find(|r| r.synced_lyrics.as_deref().unwrap_or("").trim() != "")
            })
            .or_else(|| records.first())
    }

    /// Strategy chain: direct lookup (primary artist, then full credit, then
    /// simplified title), then full-text search (raw, then simplified).
    pub async fn fetch(
        &self,
        primary_artist: &str,
        full_artist: &str,
        track_name: &str,
        simplified_track: &str,
        duration_sec: f64,
    ) -> Result<LyricsResponse, EngineError> {
        if let Ok(record) = self.get_record(primary_artist, track_name).await {
            if let Some(resp) = Self::to_response(&record, "LRCLIB") {
                return Ok(resp);
            }
        }
        if primary_artist != full_artist {
            if let Ok(record) = self.get_record(full_artist, track_name).await {
                if let Some(resp) = Self::to_response(&record, "LRCLIB") {
                    return Ok(resp);
                }
            }
        }
        if simplified_track != track_name {
            if let Ok(record) = self.get_record(primary_artist, simplified_track).await {
                if let Some(resp) = Self::to_response(&record, "LRCLIB (simplified)") {
                    return Ok(resp);
                }
            }
        }

        for (query, source) in [
            (format!("{primary_artist} {track_name}"), "LRCLIB Search"),
            (
                format!("{primary_artist} {simplified_track}"),
                "LRCLIB Search (simplified)",
            ),
        ] {
            if source.ends_with("(simplified)") && simplified_track == track_name {
                continue;
            }
            if let Ok(records) = self.search_records(&query).await {
                if let Some(best) = Self::best_search_match(&records, duration_sec) {
                    if let Some(resp) = Self::to_response(best, source) {
                        return Ok(resp);
                    }
                }
            }
        }

        Err(EngineError::NotFound("LRCLIB: no lyrics found".to_string()))
    }
}

impl Default for LrclibClient {
    fn default() -> Self {
        Self::new()
    }
}
