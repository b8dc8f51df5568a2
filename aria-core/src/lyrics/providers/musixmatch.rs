use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::error::EngineError;
use crate::http;
use crate::logbuf;
use crate::lyrics::model::{LyricsResponse, SyncType};
use crate::lyrics::parse_synced_lyrics;

// Fixed proxy host; it handles Musixmatch authentication internally.
const BASE_URL: &str = "http://158.180.60.95";

pub struct MusixmatchClient {
    http: Client,
    base_url: String,
}

#[derive(Debug, Deserialize, Default)]
struct LyricsBody {
    #[serde(default)]
    lyrics: String,
}

#[derive(Debug, Deserialize, Default)]
struct FullResponse {
    #[serde(default)]
    id: i64,
    #[serde(rename = "syncedLyrics", default)]
    synced_lyrics: Option<LyricsBody>,
    #[serde(rename = "unsyncedLyrics", default)]
    unsynced_lyrics: Option<LyricsBody>,
}

impl MusixmatchClient {
    pub fn new() -> Self {
        Self::with_base(http::shared_client().clone(), BASE_URL)
    }

    pub fn with_base(http: Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn fetch_full(&self, query: &str) -> Result<FullResponse, EngineError> {
        let resp = self
            .http
            .get(format!("{}/v2/full?{query}", self.base_url))
            .header(reqwest::header::USER_AGENT, http::random_desktop_user_agent())
            .timeout(Duration::from_secs(15))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(EngineError::Transport(format!(
                "musixmatch proxy returned HTTP {}",
                resp.status().as_u16()
            )));
        }
        Ok(resp.json().await?)
    }

    fn to_response(result: &FullResponse, source: &str) -> Option<LyricsResponse> {
        if let Some(synced) = &result.synced_lyrics {
            if !synced.lyrics.trim().is_empty() {
                let lines = parse_synced_lyrics(&synced.lyrics);
                if !lines.is_empty() {
                    return Some(LyricsResponse {
                        lines,
                        sync_type: SyncType::LineSynced,
                        instrumental: false,
                        plain_lyrics: String::new(),
                        provider: "Musixmatch".to_string(),
                        source: source.to_string(),
                    });
                }
            }
        }
        if let Some(unsynced) = &result.unsynced_lyrics {
            if !unsynced.lyrics.trim().is_empty() {
                let resp =
                    LyricsResponse::unsynced_from_plain(&unsynced.lyrics, "Musixmatch", source);
                if !resp.lines.is_empty() {
                    return Some(resp);
                }
            }
        }
        None
    }

    pub async fn fetch_lyrics_in_language(
        &self,
        song_id: i64,
        language: &str,
    ) -> Result<LyricsResponse, EngineError> {
        let lang = language.trim().to_ascii_lowercase();
        if song_id <= 0 || lang.is_empty() {
            return Err(EngineError::InvalidRequest("invalid song id or language".to_string()));
        }
        let result = self
            .fetch_full(&format!("id={song_id}&lang={}", urlencode(&lang)))
            .await?;
        Self::to_response(&result, &format!("Musixmatch ({lang})")).ok_or_else(|| {
            EngineError::NotFound(format!("no lyrics found on musixmatch for language {lang}"))
        })
    }

    /// One proxy call returns search + both lyric payloads; an optional
    /// language override triggers a follow-up id+lang request.
    pub async fn fetch_lyrics(
        &self,
        track_name: &str,
        artist_name: &str,
        preferred_language: &str,
    ) -> Result<LyricsResponse, EngineError> {
        if track_name.trim().is_empty() || artist_name.trim().is_empty() {
            return Err(EngineError::InvalidRequest("empty track or artist name".to_string()));
        }

        let result = self
            .fetch_full(&format!(
                "artist={}&track={}",
                urlencode(artist_name),
                urlencode(track_name)
            ))
            .await?;

        let preferred = preferred_language.trim().to_ascii_lowercase();
        if !preferred.is_empty() && result.id > 0 {
            match self.fetch_lyrics_in_language(result.id, &preferred).await {
                Ok(localized) => return Ok(localized),
                Err(err) => logbuf::debug(
                    "Musixmatch",
                    format!("language override '{preferred}' failed: {err}"),
                ),
            }
        }

        Self::to_response(&result, "Musixmatch")
            .ok_or_else(|| EngineError::NotFound("no lyrics found on musixmatch".to_string()))
    }
}

impl Default for MusixmatchClient {
    fn default() -> Self {
        Self::new()
    }
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}
