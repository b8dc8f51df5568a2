use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::error::EngineError;
use crate::http;
use crate::lyrics::model::{LyricsFetchOptions, LyricsResponse, SyncType};
use crate::lyrics::parse_synced_lyrics;

const BASE_URL: &str = "http://music.163.com/api";

/// NetEase Cloud Music. Direct public API, no proxy dependency; strongest
/// coverage for Asian catalogues.
pub struct NeteaseClient {
    http: Client,
    base_url: String,
}

#[derive(Debug, Deserialize, Default)]
struct SearchSong {
    #[serde(default)]
    id: i64,
}

#[derive(Debug, Deserialize, Default)]
struct SearchResult {
    #[serde(default)]
    songs: Vec<SearchSong>,
    #[serde(rename = "songCount", default)]
    song_count: u32,
}

#[derive(Debug, Deserialize, Default)]
struct SearchResponse {
    #[serde(default)]
    result: SearchResult,
}

#[derive(Debug, Deserialize, Default)]
struct LyricField {
    #[serde(default)]
    lyric: String,
}

#[derive(Debug, Deserialize, Default)]
struct LyricsApiResponse {
    #[serde(default)]
    lrc: Option<LyricField>,
    #[serde(default)]
    tlyric: Option<LyricField>,
    #[serde(default)]
    romalrc: Option<LyricField>,
}

impl NeteaseClient {
    pub fn new() -> Self {
        Self::with_base(http::shared_client().clone(), BASE_URL)
    }

    pub fn with_base(http: Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        self.http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .header(reqwest::header::CACHE_CONTROL, "max-age=0")
            .header(reqwest::header::USER_AGENT, http::random_desktop_user_agent())
            .timeout(Duration::from_secs(15))
    }

    pub async fn search_song(&self, track_name: &str, artist_name: &str) -> Result<i64, EngineError> {
        let query = format!("{track_name} {artist_name}");
        if query.trim().is_empty() {
            return Err(EngineError::InvalidRequest("empty search query".to_string()));
        }

        let resp = self
            .request(&format!("{}/search/pc", self.base_url))
            .query(&[("s", query.as_str()), ("type", "1"), ("limit", "1"), ("offset", "0")])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(EngineError::Transport(format!(
                "netease search returned HTTP {}",
                resp.status().as_u16()
            )));
        }

        let search: SearchResponse = resp.json().await?;
        if search.result.song_count == 0 || search.result.songs.is_empty() {
            return Err(EngineError::NotFound("no songs found on netease".to_string()));
        }
        Ok(search.result.songs[0].id)
    }

    pub async fn fetch_lyrics_by_id(
        &self,
        song_id: i64,
        include_translation: bool,
        include_romanization: bool,
    ) -> Result<String, EngineError> {
        let id = song_id.to_string();
        let resp = self
            .request(&format!("{}/song/lyric", self.base_url))
            .query(&[("id", id.as_str()), ("lv", "1"), ("tv", "1"), ("rv", "1")])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(EngineError::Transport(format!(
                "netease lyrics returned HTTP {}",
                resp.status().as_u16()
            )));
        }

        let data: LyricsApiResponse = resp.json().await?;
        let Some(main) = data.lrc.filter(|l| !l.lyric.trim().is_empty()) else {
            return Err(EngineError::NotFound("no lyrics available on netease".to_string()));
        };

        let mut lyric = main.lyric;
        if include_translation {
            if let Some(t) = data.tlyric.filter(|l| !l.lyric.trim().is_empty()) {
                lyric.push_str("\n\n");
                lyric.push_str(&t.lyric);
            }
        }
        if include_romanization {
            if let Some(r) = data.romalrc.filter(|l| !l.lyric.trim().is_empty()) {
                lyric.push_str("\n\n");
                lyric.push_str(&r.lyric);
            }
        }
        Ok(lyric)
    }

    pub async fn fetch_lyrics(
        &self,
        track_name: &str,
        artist_name: &str,
        options: &LyricsFetchOptions,
    ) -> Result<LyricsResponse, EngineError> {
        let song_id = self.search_song(track_name, artist_name).await?;
        let lrc_text = self
            .fetch_lyrics_by_id(
                song_id,
                options.include_translation_netease,
                options.include_romanization_netease,
            )
            .await?;

        let lines = parse_synced_lyrics(&lrc_text);
        if lines.is_empty() {
            let resp = LyricsResponse::unsynced_from_plain(&lrc_text, "Netease", "Netease");
            if resp.lines.is_empty() {
                return Err(EngineError::NotFound("netease returned empty lyrics".to_string()));
            }
            return Ok(resp);
        }

        Ok(LyricsResponse {
            lines,
            sync_type: SyncType::LineSynced,
            instrumental: false,
            plain_lyrics: String::new(),
            provider: "Netease".to_string(),
            source: "Netease".to_string(),
        })
    }
}

impl Default for NeteaseClient {
    fn default() -> Self {
        Self::new()
    }
}
