use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::http;
use crate::lyrics::format_pax_lyrics_to_lrc;
use crate::lyrics::model::{LyricsResponse, SyncType};
use crate::lyrics::parse_synced_lyrics;

use super::detect_error_payload;

const SEARCH_URL: &str = "https://c.y.qq.com/soso/fcgi-bin/client_search_cp";
const LYRICS_PROXY_URL: &str = "https://paxsenix.alwaysdata.net/getQQLyrics.php";

/// QQ Music: public search plus the paxsenix lyrics proxy; syllable
/// payloads lower to LRC like Apple's.
pub struct QqMusicClient {
    http: Client,
    search_url: String,
    lyrics_proxy_url: String,
}

#[derive(Debug, Deserialize, Default)]
struct Singer {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize, Default)]
struct AlbumRef {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize, Default)]
struct SongItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    singer: Vec<Singer>,
    #[serde(default)]
    album: AlbumRef,
    #[serde(default)]
    id: i64,
}

#[derive(Debug, Deserialize, Default)]
struct SongList {
    #[serde(default)]
    list: Vec<SongItem>,
}

#[derive(Debug, Deserialize, Default)]
struct SearchData {
    #[serde(default)]
    song: SongList,
}

#[derive(Debug, Deserialize, Default)]
struct SearchResponse {
    #[serde(default)]
    data: SearchData,
}

#[derive(Debug, Serialize)]
struct LyricsPayload {
    artist: Vec<String>,
    album: String,
    id: i64,
    title: String,
}

impl QqMusicClient {
    pub fn new() -> Self {
        Self::with_endpoints(http::shared_client().clone(), SEARCH_URL, LYRICS_PROXY_URL)
    }

    pub fn with_endpoints(http: Client, search_url: &str, lyrics_proxy_url: &str) -> Self {
        Self {
            http,
            search_url: search_url.to_string(),
            lyrics_proxy_url: lyrics_proxy_url.to_string(),
        }
    }

    async fn search_song(&self, track_name: &str, artist_name: &str) -> Result<LyricsPayload, EngineError> {
        let query = format!("{track_name} {artist_name}");
        if query.trim().is_empty() {
            return Err(EngineError::InvalidRequest("empty search query".to_string()));
        }

        let resp = self
            .http
            .get(&self.search_url)
            .query(&[
                ("format", "json"),
                ("inCharset", "utf8"),
                ("outCharset", "utf8"),
                ("platform", "yqq.json"),
                ("new_json", "1"),
                ("w", query.as_str()),
            ])
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::USER_AGENT, http::random_desktop_user_agent())
            .timeout(Duration::from_secs(15))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(EngineError::Transport(format!(
                "qqmusic search returned HTTP {}",
                resp.status().as_u16()
            )));
        }

        let search: SearchResponse = resp.json().await?;
        let Some(song) = search.data.song.list.into_iter().next() else {
            return Err(EngineError::NotFound("no songs found on qqmusic".to_string()));
        };

        Ok(LyricsPayload {
            artist: song.singer.into_iter().map(|s| s.name).collect(),
            album: song.album.name,
            id: song.id,
            title: song.title,
        })
    }

    async fn fetch_lyrics_by_payload(&self, payload: &LyricsPayload) -> Result<String, EngineError> {
        let resp = self
            .http
            .post(&self.lyrics_proxy_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::USER_AGENT, http::random_desktop_user_agent())
            .json(payload)
            .timeout(Duration::from_secs(15))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(EngineError::Transport(format!(
                "qqmusic lyrics proxy returned HTTP {}",
                resp.status().as_u16()
            )));
        }
        let body = resp.text().await?.trim().to_string();
        if body.is_empty() {
            return Err(EngineError::NotFound("empty lyrics response from qqmusic".to_string()));
        }
        Ok(body)
    }

    pub async fn fetch_lyrics(
        &self,
        track_name: &str,
        artist_name: &str,
        multi_person_word_by_word: bool,
    ) -> Result<LyricsResponse, EngineError> {
        let payload = self.search_song(track_name, artist_name).await?;
        let raw = self.fetch_lyrics_by_payload(&payload).await?;

        if let Some(message) = detect_error_payload(&raw) {
            return Err(EngineError::NotFound(format!(
                "qqmusic proxy returned non-lyric payload: {message}"
            )));
        }

        let lrc_text = format_pax_lyrics_to_lrc(&raw, multi_person_word_by_word)
            .unwrap_or(raw);

        let lines = parse_synced_lyrics(&lrc_text);
        if !lines.is_empty() {
            return Ok(LyricsResponse {
                lines,
                sync_type: SyncType::LineSynced,
                instrumental: false,
                plain_lyrics: String::new(),
                provider: "QQ Music".to_string(),
                source: "QQ Music".to_string(),
            });
        }

        let resp = LyricsResponse::unsynced_from_plain(&lrc_text, "QQ Music", "QQ Music");
        if resp.lines.is_empty() {
            return Err(EngineError::NotFound("no lyrics found on qqmusic".to_string()));
        }
        Ok(resp)
    }
}

impl Default for QqMusicClient {
    fn default() -> Self {
        Self::new()
    }
}
