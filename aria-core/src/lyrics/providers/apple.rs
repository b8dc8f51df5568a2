use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::EngineError;
use crate::http;
use crate::logbuf;
use crate::lyrics::format_pax_lyrics_to_lrc;
use crate::lyrics::model::{LyricsResponse, SyncType};
use crate::lyrics::parse_synced_lyrics;

const WEB_PLAYER_URL: &str = "https://beta.music.apple.com";
const SEARCH_URL: &str = "https://amp-api.music.apple.com/v1/catalog/us/search";
const LYRICS_PROXY_URL: &str = "https://lyrics.paxsenix.org/apple-music/lyrics";

/// The web player embeds a rotating JWT in its asset bundle; scrape it once
/// and invalidate on 401.
fn token_slot() -> &'static Mutex<String> {
    static TOKEN: OnceLock<Mutex<String>> = OnceLock::new();
    TOKEN.get_or_init(|| Mutex::new(String::new()))
}

pub struct AppleMusicClient {
    http: Client,
    web_player_url: String,
    search_url: String,
    lyrics_proxy_url: String,
}

#[derive(Debug, Deserialize, Default)]
struct SongRef {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Deserialize, Default)]
struct SongsBlock {
    #[serde(default)]
    data: Vec<SongRef>,
}

#[derive(Debug, Deserialize, Default)]
struct SearchResults {
    #[serde(default)]
    songs: Option<SongsBlock>,
}

#[derive(Debug, Deserialize, Default)]
struct SearchResponse {
    #[serde(default)]
    results: SearchResults,
}

impl AppleMusicClient {
    pub fn new() -> Self {
        Self {
            http: http::shared_client().clone(),
            web_player_url: WEB_PLAYER_URL.to_string(),
            search_url: SEARCH_URL.to_string(),
            lyrics_proxy_url: LYRICS_PROXY_URL.to_string(),
        }
    }

    pub fn with_endpoints(
        http: Client,
        web_player_url: &str,
        search_url: &str,
        lyrics_proxy_url: &str,
    ) -> Self {
        Self {
            http,
            web_player_url: web_player_url.trim_end_matches('/').to_string(),
            search_url: search_url.to_string(),
            lyrics_proxy_url: lyrics_proxy_url.to_string(),
        }
    }

    async fn scrape_token(&self) -> Result<String, EngineError> {
        let mut cached = token_slot().lock().await;
        if !cached.is_empty() {
            return Ok(cached.clone());
        }

        let page = self
            .http
            .get(&self.web_player_url)
            .header(reqwest::header::USER_AGENT, http::random_desktop_user_agent())
            .timeout(Duration::from_secs(20))
            .send()
            .await?
            .text()
            .await?;

        static INDEX_JS: OnceLock<Regex> = OnceLock::new();
        let index_js = INDEX_JS
            .get_or_init(|| Regex::new(r"/assets/index~[^/\x22]+\.js").expect("index js pattern"));
        let Some(asset_path) = index_js.find(&page) else {
            return Err(EngineError::Parse(
                "could not find index JS script URL on Apple Music page".to_string(),
            ));
        };

        let js = self
            .http
            .get(format!("{}{}", self.web_player_url, asset_path.as_str()))
            .header(reqwest::header::USER_AGENT, http::random_desktop_user_agent())
            .timeout(Duration::from_secs(20))
            .send()
            .await?
            .text()
            .await?;

        static JWT: OnceLock<Regex> = OnceLock::new();
        let jwt = JWT.get_or_init(|| Regex::new(r#"eyJh[^"]*"#).expect("jwt pattern"));
        let Some(token) = jwt.find(&js) else {
            return Err(EngineError::Parse(
                "could not find JWT token in Apple Music JS".to_string(),
            ));
        };

        logbuf::debug(
            "AppleMusic",
            format!("token obtained successfully (length: {})", token.as_str().len()),
        );
        *cached = token.as_str().to_string();
        Ok(cached.clone())
    }

    async fn clear_token() {
        token_slot().lock().await.clear();
    }

    pub async fn search_song(&self, track_name: &str, artist_name: &str) -> Result<String, EngineError> {
        let query = format!("{track_name} {artist_name}");
        if query.trim().is_empty() {
            return Err(EngineError::InvalidRequest("empty search query".to_string()));
        }

        let token = self.scrape_token().await?;
        let resp = self
            .http
            .get(&self.search_url)
            .query(&[
                ("term", query.as_str()),
                ("types", "songs"),
                ("limit", "5"),
                ("l", "en-US"),
                ("platform", "web"),
                ("format[resources]", "map"),
            ])
            .bearer_auth(&token)
            .header(reqwest::header::ORIGIN, "https://music.apple.com")
            .header(reqwest::header::REFERER, "https://music.apple.com/")
            .header(reqwest::header::USER_AGENT, http::random_desktop_user_agent())
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(Duration::from_secs(20))
            .send()
            .await?;

        if resp.status().as_u16() == 401 {
            Self::clear_token().await;
            return Err(EngineError::Transport("apple music token expired".to_string()));
        }
        if !resp.status().is_success() {
            return Err(EngineError::Transport(format!(
                "apple music search returned HTTP {}",
                resp.status().as_u16()
            )));
        }

        let search: SearchResponse = resp.json().await?;
        search
            .results
            .songs
            .and_then(|s| s.data.into_iter().next())
            .map(|s| s.id)
            .ok_or_else(|| EngineError::NotFound("no songs found on apple music".to_string()))
    }

    pub async fn fetch_lyrics_by_id(&self, song_id: &str) -> Result<String, EngineError> {
        let resp = self
            .http
            .get(&self.lyrics_proxy_url)
            .query(&[("id", song_id)])
            .header(reqwest::header::USER_AGENT, http::random_desktop_user_agent())
            .timeout(Duration::from_secs(20))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(EngineError::Transport(format!(
                "apple music lyrics proxy returned HTTP {}",
                resp.status().as_u16()
            )));
        }
        let body = resp.text().await?;
        let body = body.trim().to_string();
        if body.is_empty() {
            return Err(EngineError::NotFound(
                "empty lyrics response from apple music".to_string(),
            ));
        }
        Ok(body)
    }

    pub async fn fetch_lyrics(
        &self,
        track_name: &str,
        artist_name: &str,
        multi_person_word_by_word: bool,
    ) -> Result<LyricsResponse, EngineError> {
        let song_id = self.search_song(track_name, artist_name).await?;
        let raw = self.fetch_lyrics_by_id(&song_id).await?;

        // Pax payload (syllable or line) lowers to LRC; anything else is
        // treated as LRC text directly.
        let lrc_text = format_pax_lyrics_to_lrc(&raw, multi_person_word_by_word)
            .unwrap_or(raw);

        let lines = parse_synced_lyrics(&lrc_text);
        if !lines.is_empty() {
            return Ok(LyricsResponse {
                lines,
                sync_type: SyncType::LineSynced,
                instrumental: false,
                plain_lyrics: String::new(),
                provider: "Apple Music".to_string(),
                source: "Apple Music".to_string(),
            });
        }

        let resp = LyricsResponse::unsynced_from_plain(&lrc_text, "Apple Music", "Apple Music");
        if resp.lines.is_empty() {
            return Err(EngineError::NotFound("no lyrics found on apple music".to_string()));
        }
        Ok(resp)
    }
}

impl Default for AppleMusicClient {
    fn default() -> Self {
        Self::new()
    }
}
