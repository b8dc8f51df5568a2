use std::sync::OnceLock;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::error::EngineError;
use crate::http;
use crate::logbuf;
use crate::matching;

use super::StreamDescriptor;

const APP_ID: &str = "798273057";
const SEARCH_BASE_B64: &str = "aHR0cHM6Ly93d3cucW9idXouY29tL2FwaS5qc29uLzAuMg==";
const MIRRORS_B64: [&str; 2] = [
    "ZGFiLnllZXQuc3UvYXBpL3N0cmVhbT90cmFja0lkPQ==",
    "ZGFibXVzaWMueHl6L2FwaS9zdHJlYW0/dHJhY2tJZD0=",
];

const ISRC_DURATION_TOLERANCE_SEC: i64 = 10;

fn decode(b64: &str) -> String {
    B64.decode(b64)
        .ok()
        .and_then(|b| String::from_utf8(b).ok())
        .unwrap_or_default()
}

pub fn gateway_mirrors() -> Vec<String> {
    MIRRORS_B64
        .iter()
        .map(|m| format!("https://{}", decode(m)))
        .collect()
}

/// Map the request quality tag onto Qobuz format IDs.
pub fn map_quality(quality: &str) -> &'static str {
    match quality.trim() {
        "LOSSLESS" => "6",
        "HI_RES" => "7",
        _ => "27",
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct QobuzPerformer {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct QobuzAlbumImage {
    #[serde(default)]
    pub large: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct QobuzAlbum {
    #[serde(default)]
    pub title: String,
    #[serde(rename = "release_date_original", default)]
    pub release_date: String,
    #[serde(default)]
    pub image: QobuzAlbumImage,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct QobuzTrack {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub isrc: String,
    /// seconds
    #[serde(default)]
    pub duration: i64,
    #[serde(rename = "track_number", default)]
    pub track_number: u32,
    #[serde(rename = "maximum_bit_depth", default)]
    pub maximum_bit_depth: u32,
    #[serde(rename = "maximum_sampling_rate", default)]
    pub maximum_sampling_rate: f64,
    #[serde(default)]
    pub album: QobuzAlbum,
    #[serde(default)]
    pub performer: QobuzPerformer,
}

pub struct QobuzAdapter {
    http: Client,
    search_base: String,
    mirrors: Vec<String>,
}

pub fn adapter() -> &'static QobuzAdapter {
    static ADAPTER: OnceLock<QobuzAdapter> = OnceLock::new();
    ADAPTER.get_or_init(QobuzAdapter::new)
}

/// Gateway bodies come back as `{url}` / `{data:{url}}` / `{link}`, or an
/// `error`/`message` envelope.
fn extract_download_url(body: &[u8]) -> Result<String, EngineError> {
    let raw: Value =
        serde_json::from_slice(body).map_err(|e| EngineError::Parse(format!("invalid JSON: {e}")))?;

    if let Some(message) = raw.get("error").and_then(Value::as_str) {
        if !message.trim().is_empty() {
            return Err(EngineError::Transport(message.trim().to_string()));
        }
    }
    if raw.get("success").and_then(Value::as_bool) == Some(false) {
        let message = raw
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("api returned success=false");
        return Err(EngineError::Transport(message.to_string()));
    }

    for candidate in [
        raw.get("url"),
        raw.get("link"),
        raw.get("data").and_then(|d| d.get("url")),
        raw.get("data").and_then(|d| d.get("link")),
    ] {
        if let Some(url) = candidate.and_then(Value::as_str) {
            if !url.trim().is_empty() {
                return Ok(url.trim().to_string());
            }
        }
    }
    Err(EngineError::NotFound("no download URL in response".to_string()))
}

impl QobuzAdapter {
    pub fn new() -> Self {
        Self {
            http: http::shared_client().clone(),
            search_base: decode(SEARCH_BASE_B64),
            mirrors: gateway_mirrors(),
        }
    }

    pub fn with_endpoints(http: Client, search_base: &str, mirrors: Vec<String>) -> Self {
        Self {
            http,
            search_base: search_base.trim_end_matches('/').to_string(),
            mirrors,
        }
    }

    async fn search_page(&self, query: &str) -> Result<Vec<QobuzTrack>, EngineError> {
        #[derive(Deserialize, Default)]
        struct Tracks {
            #[serde(default)]
            items: Vec<QobuzTrack>,
        }
        #[derive(Deserialize, Default)]
        struct SearchResponse {
            #[serde(default)]
            tracks: Tracks,
        }

        let endpoint = format!(
            "{}/track/search?query={}&limit=50&app_id={APP_ID}",
            self.search_base,
            urlencode(query)
        );
        let resp = self
            .http
            .get(&endpoint)
            .header(reqwest::header::USER_AGENT, http::random_desktop_user_agent())
            .timeout(Duration::from_secs(15))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(EngineError::Transport(format!(
                "search failed: HTTP {}",
                resp.status().as_u16()
            )));
        }
        let result: SearchResponse = resp.json().await?;
        Ok(result.tracks.items)
    }

    pub async fn search_by_isrc(
        &self,
        isrc: &str,
        expected_duration_sec: i64,
    ) -> Result<QobuzTrack, EngineError> {
        let items = self.search_page(isrc).await?;
        logbuf::debug("Qobuz", format!("ISRC search returned {} results", items.len()));

        let matches: Vec<&QobuzTrack> = items.iter().filter(|t| t.isrc == isrc).collect();
        if matches.is_empty() {
            if items.is_empty() {
                return Err(EngineError::NotFound(format!("no tracks found for ISRC: {isrc}")));
            }
            return Err(EngineError::NotFound(format!(
                "no exact ISRC match found for: {isrc}"
            )));
        }

        if expected_duration_sec > 0 {
            if let Some(verified) = matches
                .iter()
                .find(|t| (t.duration - expected_duration_sec).abs() <= ISRC_DURATION_TOLERANCE_SEC)
            {
                return Ok((*verified).clone());
            }
            return Err(EngineError::NotFound(format!(
                "ISRC found but duration mismatch: expected {expected_duration_sec}s, found {}s (likely different version)",
                matches[0].duration
            )));
        }
        Ok(matches[0].clone())
    }

    /// Artist+track search, preferring matched titles at >=24-bit.
    pub async fn search_by_metadata(
        &self,
        track_name: &str,
        artist_name: &str,
        expected_duration_sec: i64,
    ) -> Result<QobuzTrack, EngineError> {
        let mut queries = Vec::new();
        if !artist_name.is_empty() && !track_name.is_empty() {
            queries.push(format!("{artist_name} {track_name}"));
        }
        if !track_name.is_empty() {
            queries.push(track_name.to_string());
        }
        if matching::contains_japanese(track_name) || matching::contains_japanese(artist_name) {
            if let (Some(romaji_artist), Some(romaji_track)) = (
                matching::to_romaji(artist_name),
                matching::to_romaji(track_name),
            ) {
                let artist = matching::clean_to_ascii(&romaji_artist);
                let track = matching::clean_to_ascii(&romaji_track);
                if !artist.is_empty() && !track.is_empty() {
                    let query = format!("{artist} {track}");
                    if !queries.contains(&query) {
                        queries.push(query);
                    }
                }
            }
        }

        let mut all_tracks: Vec<QobuzTrack> = Vec::new();
        for query in &queries {
            logbuf::debug("Qobuz", format!("searching for: {query}"));
            match self.search_page(query).await {
                Ok(items) => all_tracks.extend(items),
                Err(err) => logbuf::debug("Qobuz", format!("search error for '{query}': {err}")),
            }
        }
        if all_tracks.is_empty() {
            return Err(EngineError::NotFound(format!(
                "failed to find Qobuz track: {artist_name} - {track_name}"
            )));
        }

        let matched: Vec<&QobuzTrack> = all_tracks
            .iter()
            .filter(|t| {
                matching::titles_match(track_name, &t.title)
                    && (artist_name.is_empty()
                        || matching::artists_match(artist_name, &t.performer.name))
            })
            .filter(|t| {
                expected_duration_sec == 0
                    || (t.duration - expected_duration_sec).abs() <= ISRC_DURATION_TOLERANCE_SEC
            })
            .collect();

        let pool: Vec<&QobuzTrack> = if matched.is_empty() {
            all_tracks.iter().collect()
        } else {
            matched
        };
        let best = pool
            .iter()
            .find(|t| t.maximum_bit_depth >= 24)
            .unwrap_or(&pool[0]);
        Ok((*best).clone())
    }

    /// Sequential gateway probing; accumulated errors surface when both
    /// mirrors fail.
    pub async fn resolve_url(&self, track_id: i64, quality: &str) -> Result<StreamDescriptor, EngineError> {
        let format_id = map_quality(quality);
        let mut errors: Vec<String> = Vec::new();

        for mirror in &self.mirrors {
            let endpoint = format!("{mirror}{track_id}&quality={format_id}");
            let result = self
                .http
                .get(&endpoint)
                .header(reqwest::header::USER_AGENT, http::random_desktop_user_agent())
                .timeout(Duration::from_secs(30))
                .send()
                .await;

            let body = match result {
                Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                    Ok(b) => b,
                    Err(err) => {
                        errors.push(format!("{mirror}: {err}"));
                        continue;
                    }
                },
                Ok(resp) => {
                    errors.push(format!("{mirror}: HTTP {}", resp.status().as_u16()));
                    continue;
                }
                Err(err) => {
                    errors.push(format!("{mirror}: {err}"));
                    continue;
                }
            };

            match extract_download_url(&body) {
                Ok(url) => {
                    logbuf::debug("Qobuz", format!("mirror {mirror} answered"));
                    return Ok(StreamDescriptor {
                        url,
                        format: "flac".to_string(),
                        ..Default::default()
                    });
                }
                Err(err) => errors.push(format!("{mirror}: {err}")),
            }
        }

        Err(EngineError::AllProvidersFailed(format!(
            "all {} Qobuz mirrors failed: {}",
            self.mirrors.len(),
            errors.join("; ")
        )))
    }
}

impl Default for QobuzAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_mapping() {
        assert_eq!(map_quality("LOSSLESS"), "6");
        assert_eq!(map_quality("HI_RES"), "7");
        assert_eq!(map_quality("HI_RES_LOSSLESS"), "27");
        assert_eq!(map_quality(""), "27");
    }

    #[test]
    fn gateway_body_shapes() {
        assert_eq!(
            extract_download_url(br#"{"url":"https://cdn/t.flac"}"#).unwrap(),
            "https://cdn/t.flac"
        );
        assert_eq!(
            extract_download_url(br#"{"data":{"url":"https://cdn/n.flac"}}"#).unwrap(),
            "https://cdn/n.flac"
        );
        assert_eq!(
            extract_download_url(br#"{"link":"https://cdn/l.flac"}"#).unwrap(),
            "https://cdn/l.flac"
        );

        let err = extract_download_url(br#"{"error":"region locked"}"#).unwrap_err();
        assert!(err.to_string().contains("region locked"));
        let err = extract_download_url(br#"{"success":false,"message":"quota"}"#).unwrap_err();
        assert!(err.to_string().contains("quota"));
        assert!(extract_download_url(br#"{"nothing":1}"#).is_err());
        assert!(extract_download_url(b"not json").is_err());
    }

    #[test]
    fn two_mirrors_configured() {
        let mirrors = gateway_mirrors();
        assert_eq!(mirrors.len(), 2);
        for mirror in &mirrors {
            assert!(mirror.starts_with("https://"));
            assert!(mirror.contains("trackId=") || mirror.contains("track_id="));
        }
    }
}
