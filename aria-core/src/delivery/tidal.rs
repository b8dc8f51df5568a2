use std::sync::OnceLock;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::EngineError;
use crate::http;
use crate::logbuf;
use crate::matching;

use super::StreamDescriptor;

// Obfuscation is a speed bump against trivial scraping, not security; the
// hostnames are data, not code.
const MIRRORS_B64: [&str; 8] = [
    "dGlkYWwtYXBpLmJpbmltdW0ub3Jn",     // priority mirror
    "dGlkYWwua2lub3BsdXMub25saW5l",
    "dHJpdG9uLnNxdWlkLnd0Zg==",
    "dm9nZWwucXFkbC5zaXRl",
    "bWF1cy5xcWRsLnNpdGU=",
    "aHVuZC5xcWRsLnNpdGU=",
    "a2F0emUucXFkbC5zaXRl",
    "d29sZi5xcWRsLnNpdGU=",
];

const AUTH_URL_B64: &str = "aHR0cHM6Ly9hdXRoLnRpZGFsLmNvbS92MS9vYXV0aDIvdG9rZW4=";
const API_BASE_B64: &str = "aHR0cHM6Ly9hcGkudGlkYWwuY29tL3Yx";
const CLIENT_ID_B64: &str = "NkJEU1JkcEs5aHFFQlRnVQ==";
const CLIENT_SECRET_B64: &str = "eGV1UG1ZN25icFo5SUliTEFjUTkzc2hrYTFWTmhlVUFxTjZJY3N6alRHOD0=";

const DURATION_TOLERANCE_SEC: i64 = 3;

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

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TidalArtist {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TidalAlbum {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub cover: String,
    #[serde(rename = "releaseDate", default)]
    pub release_date: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TidalMediaMetadata {
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TidalTrack {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub isrc: String,
    #[serde(rename = "audioQuality", default)]
    pub audio_quality: String,
    #[serde(rename = "trackNumber", default)]
    pub track_number: u32,
    #[serde(rename = "volumeNumber", default)]
    pub volume_number: u32,
    /// seconds
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub album: TidalAlbum,
    #[serde(default)]
    pub artist: TidalArtist,
    #[serde(default)]
    pub artists: Vec<TidalArtist>,
    #[serde(rename = "mediaMetadata", default)]
    pub media_metadata: TidalMediaMetadata,
}

impl TidalTrack {
    fn is_hires(&self) -> bool {
        self.media_metadata.tags.iter().any(|t| t == "HIRES_LOSSLESS")
    }

    fn duration_within(&self, expected_sec: i64) -> bool {
        (self.duration - expected_sec).abs() <= DURATION_TOLERANCE_SEC
    }
}

struct TokenState {
    token: String,
    expires_at: Instant,
}

pub struct TidalAdapter {
    http: Client,
    api_base: String,
    auth_url: String,
    mirrors: Vec<String>,
    token: Mutex<Option<TokenState>>,
}

pub fn adapter() -> &'static TidalAdapter {
    static ADAPTER: OnceLock<TidalAdapter> = OnceLock::new();
    ADAPTER.get_or_init(TidalAdapter::new)
}

impl TidalAdapter {
    pub fn new() -> Self {
        Self {
            http: http::shared_client().clone(),
            api_base: decode(API_BASE_B64),
            auth_url: decode(AUTH_URL_B64),
            mirrors: gateway_mirrors(),
            token: Mutex::new(None),
        }
    }

    pub fn with_endpoints(http: Client, api_base: &str, auth_url: &str, mirrors: Vec<String>) -> Self {
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            auth_url: auth_url.to_string(),
            mirrors,
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String, EngineError> {
        let mut state = self.token.lock().await;
        if let Some(cached) = state.as_ref() {
            if Instant::now() + Duration::from_secs(60) < cached.expires_at {
                return Ok(cached.token.clone());
            }
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            #[serde(default)]
            expires_in: u64,
        }

        let client_id = decode(CLIENT_ID_B64);
        let resp = self
            .http
            .post(&self.auth_url)
            .basic_auth(&client_id, Some(decode(CLIENT_SECRET_B64)))
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(reqwest::header::USER_AGENT, http::random_desktop_user_agent())
            .body(format!("client_id={client_id}&grant_type=client_credentials"))
            .timeout(Duration::from_secs(15))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(EngineError::Transport(format!(
                "failed to get access token: HTTP {}",
                resp.status().as_u16()
            )));
        }
        let token: TokenResponse = resp.json().await?;
        let ttl = if token.expires_in > 0 {
            Duration::from_secs(token.expires_in)
        } else {
            Duration::from_secs(55 * 60)
        };
        *state = Some(TokenState {
            token: token.access_token.clone(),
            expires_at: Instant::now() + ttl,
        });
        Ok(token.access_token)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        token: &str,
    ) -> Result<T, EngineError> {
        let resp = self
            .http
            .get(endpoint)
            .bearer_auth(token)
            .header(reqwest::header::USER_AGENT, http::random_desktop_user_agent())
            .timeout(Duration::from_secs(15))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(EngineError::Transport(format!(
                "tidal API returned HTTP {}",
                resp.status().as_u16()
            )));
        }
        Ok(resp.json().await?)
    }

    pub fn track_id_from_url(tidal_url: &str) -> Result<i64, EngineError> {
        let Some((_, tail)) = tidal_url.split_once("/track/") else {
            return Err(EngineError::InvalidRequest("invalid tidal URL format".to_string()));
        };
        tail.split('?')
            .next()
            .unwrap_or_default()
            .trim()
            .parse()
            .map_err(|_| EngineError::Parse("failed to parse track ID".to_string()))
    }

    pub async fn track_by_id(&self, track_id: i64) -> Result<TidalTrack, EngineError> {
        let token = self.access_token().await?;
        self.get_json(
            &format!("{}/tracks/{track_id}?countryCode=US", self.api_base),
            &token,
        )
        .await
    }

    async fn search_page(&self, token: &str, query: &str, limit: u32) -> Result<Vec<TidalTrack>, EngineError> {
        #[derive(Deserialize, Default)]
        struct SearchResult {
            #[serde(default)]
            items: Vec<TidalTrack>,
        }
        let result: SearchResult = self
            .get_json(
                &format!(
                    "{}/search/tracks?query={}&limit={limit}&countryCode=US",
                    self.api_base,
                    urlencode(query)
                ),
                token,
            )
            .await?;
        Ok(result.items)
    }

    pub async fn search_by_isrc(&self, isrc: &str) -> Result<TidalTrack, EngineError> {
        let token = self.access_token().await?;
        let items = self.search_page(&token, isrc, 50).await?;
        if items.is_empty() {
            return Err(EngineError::NotFound(format!("no tracks found for ISRC: {isrc}")));
        }
        items
            .into_iter()
            .find(|t| t.isrc == isrc)
            .ok_or_else(|| EngineError::NotFound(format!("no exact ISRC match found for: {isrc}")))
    }

    fn build_queries(track_name: &str, artist_name: &str) -> Vec<String> {
        let mut queries = Vec::new();
        let mut push = |q: String| {
            let q = q.trim().to_string();
            if !q.is_empty() && !queries.contains(&q) {
                queries.push(q);
            }
        };

        if !artist_name.is_empty() && !track_name.is_empty() {
            push(format!("{artist_name} {track_name}"));
        }
        if !track_name.is_empty() {
            push(track_name.to_string());
        }

        // Kana/kanji titles often index under their romaji spelling.
        if matching::contains_japanese(track_name) || matching::contains_japanese(artist_name) {
            let romaji_track = matching::to_romaji(track_name)
                .map(|r| matching::clean_to_ascii(&r))
                .unwrap_or_default();
            let romaji_artist = matching::to_romaji(artist_name)
                .map(|r| matching::clean_to_ascii(&r))
                .unwrap_or_default();

            if !romaji_artist.is_empty() && !romaji_track.is_empty() {
                push(format!("{romaji_artist} {romaji_track}"));
            }
            if !romaji_track.is_empty() && romaji_track != track_name {
                push(romaji_track.clone());
            }
            if !artist_name.is_empty() && !romaji_track.is_empty() {
                push(format!("{artist_name} {romaji_track}"));
            }
        }

        if !artist_name.is_empty() {
            let artist_only = matching::to_romaji(artist_name)
                .map(|r| matching::clean_to_ascii(&r))
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| artist_name.to_string());
            push(artist_only);
        }

        queries
    }

    fn pick_best<'a>(
        all_tracks: &'a [TidalTrack],
        isrc: &str,
        expected_duration_sec: i64,
    ) -> Result<&'a TidalTrack, EngineError> {
        if !isrc.is_empty() {
            let isrc_matches: Vec<&TidalTrack> =
                all_tracks.iter().filter(|t| t.isrc == isrc).collect();
            if !isrc_matches.is_empty() {
                if expected_duration_sec > 0 {
                    if let Some(verified) = isrc_matches
                        .iter()
                        .find(|t| t.duration_within(expected_duration_sec))
                    {
                        return Ok(*verified);
                    }
                    return Err(EngineError::NotFound(format!(
                        "ISRC found but duration mismatch: expected {expected_duration_sec}s, found {}s (likely different version/edit)",
                        isrc_matches[0].duration
                    )));
                }
                return Ok(isrc_matches[0]);
            }
            return Err(EngineError::NotFound(format!(
                "ISRC mismatch: no track found with ISRC {isrc} on Tidal"
            )));
        }

        if expected_duration_sec > 0 {
            let duration_matches: Vec<&TidalTrack> = all_tracks
                .iter()
                .filter(|t| t.duration_within(expected_duration_sec))
                .collect();
            if !duration_matches.is_empty() {
                let best = duration_matches
                    .iter()
                    .find(|t| t.is_hires())
                    .copied()
                    .unwrap_or(duration_matches[0]);
                return Ok(best);
            }
        }

        let best = all_tracks
            .iter()
            .find(|t| t.is_hires())
            .or_else(|| all_tracks.first())
            .ok_or_else(|| EngineError::NotFound("no tracks found for any search query".to_string()))?;
        Ok(best)
    }

    /// Multi-strategy metadata search: artist+track, track only, romaji
    /// variants for kana, artist only. Exact ISRC hits (duration-verified
    /// when known) short-circuit; otherwise rank by duration window with a
    /// HIRES_LOSSLESS preference.
    pub async fn search_by_metadata(
        &self,
        track_name: &str,
        artist_name: &str,
        isrc: &str,
        expected_duration_sec: i64,
    ) -> Result<TidalTrack, EngineError> {
        let token = self.access_token().await?;
        let queries = Self::build_queries(track_name, artist_name);

        let mut all_tracks: Vec<TidalTrack> = Vec::new();
        for query in &queries {
            logbuf::debug("Tidal", format!("searching for: {query}"));
            let items = match self.search_page(&token, query, 100).await {
                Ok(items) => items,
                Err(err) => {
                    logbuf::debug("Tidal", format!("search error for '{query}': {err}"));
                    continue;
                }
            };
            if items.is_empty() {
                continue;
            }

            if !isrc.is_empty() {
                if let Some(hit) = items.iter().find(|t| {
                    t.isrc == isrc
                        && (expected_duration_sec == 0 || t.duration_within(expected_duration_sec))
                }) {
                    logbuf::debug("Tidal", format!("ISRC match: '{}'", hit.title));
                    return Ok(hit.clone());
                }
            }
            all_tracks.extend(items);
        }

        if all_tracks.is_empty() {
            return Err(EngineError::NotFound(
                "no tracks found for any search query".to_string(),
            ));
        }
        Self::pick_best(&all_tracks, isrc, expected_duration_sec).cloned()
    }

    /// Resolve a stream descriptor through the gateway mirrors. Probing is
    /// sequential: the first mirror with a valid response wins, and every
    /// failure is carried into the aggregate error.
    pub async fn resolve_url(&self, track_id: i64, quality: &str) -> Result<StreamDescriptor, EngineError> {
        #[derive(Deserialize, Default)]
        struct V2Data {
            #[serde(rename = "assetPresentation", default)]
            asset_presentation: String,
            #[serde(default)]
            manifest: String,
            #[serde(rename = "bitDepth", default)]
            bit_depth: u32,
            #[serde(rename = "sampleRate", default)]
            sample_rate: u32,
        }
        #[derive(Deserialize, Default)]
        struct V2Response {
            #[serde(default)]
            data: V2Data,
        }
        #[derive(Deserialize, Default)]
        struct V1Item {
            #[serde(rename = "OriginalTrackUrl", default)]
            original_track_url: String,
        }

        let quality = if quality.trim().is_empty() { "LOSSLESS" } else { quality };
        let mut errors: Vec<String> = Vec::new();

        for mirror in &self.mirrors {
            let endpoint = format!("{mirror}/track/?id={track_id}&quality={quality}");
            let body = match self
                .http
                .get(&endpoint)
                .header(reqwest::header::USER_AGENT, http::random_desktop_user_agent())
                .timeout(Duration::from_secs(15))
                .send()
                .await
            {
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

            if let Ok(v2) = serde_json::from_slice::<V2Response>(&body) {
                if !v2.data.manifest.is_empty() {
                    if v2.data.asset_presentation == "PREVIEW" {
                        errors.push(format!("{mirror}: returned PREVIEW instead of FULL"));
                        continue;
                    }
                    logbuf::debug("Tidal", format!("mirror {mirror} answered (v2 manifest)"));
                    return Ok(StreamDescriptor {
                        manifest_b64: v2.data.manifest,
                        bit_depth: v2.data.bit_depth,
                        sample_rate: v2.data.sample_rate,
                        format: "flac".to_string(),
                        ..Default::default()
                    });
                }
            }

            if let Ok(v1) = serde_json::from_slice::<Vec<V1Item>>(&body) {
                if let Some(item) = v1.iter().find(|i| !i.original_track_url.is_empty()) {
                    logbuf::debug("Tidal", format!("mirror {mirror} answered (v1 url)"));
                    return Ok(StreamDescriptor {
                        url: item.original_track_url.clone(),
                        bit_depth: 16,
                        sample_rate: 44_100,
                        format: "flac".to_string(),
                        ..Default::default()
                    });
                }
            }

            errors.push(format!("{mirror}: no download URL or manifest in response"));
        }

        Err(EngineError::AllProvidersFailed(format!(
            "all {} Tidal mirrors failed: {}",
            self.mirrors.len(),
            errors.join("; ")
        )))
    }
}

impl Default for TidalAdapter {
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
    fn track_id_from_url_forms() {
        assert_eq!(
            TidalAdapter::track_id_from_url("https://tidal.com/browse/track/77646170").unwrap(),
            77646170
        );
        assert_eq!(
            TidalAdapter::track_id_from_url("https://listen.tidal.com/track/1?play=1").unwrap(),
            1
        );
        assert!(TidalAdapter::track_id_from_url("https://tidal.com/album/5").is_err());
    }

    #[test]
    fn mirrors_decode_to_https_hosts() {
        let mirrors = gateway_mirrors();
        assert_eq!(mirrors.len(), 8);
        for mirror in &mirrors {
            assert!(mirror.starts_with("https://"), "{mirror}");
            assert!(!mirror.contains('='), "{mirror}");
        }
    }

    #[test]
    fn best_pick_prefers_exact_isrc_with_duration() {
        let mk = |isrc: &str, duration: i64, hires: bool| TidalTrack {
            isrc: isrc.to_string(),
            duration,
            media_metadata: TidalMediaMetadata {
                tags: if hires { vec!["HIRES_LOSSLESS".to_string()] } else { vec![] },
            },
            ..Default::default()
        };

        let tracks = vec![mk("AAAA00000001", 300, false), mk("AAAA00000001", 200, true)];
        let best = TidalAdapter::pick_best(&tracks, "AAAA00000001", 201).unwrap();
        assert_eq!(best.duration, 200);

        // ISRC present but all durations off: rejected.
        assert!(TidalAdapter::pick_best(&tracks, "AAAA00000001", 250).is_err());

        // No ISRC: duration window with hi-res preference.
        let tracks = vec![mk("", 200, false), mk("", 201, true), mk("", 500, true)];
        let best = TidalAdapter::pick_best(&tracks, "", 200).unwrap();
        assert!(best.is_hires());
        assert_eq!(best.duration, 201);
    }

    #[test]
    fn query_strategies_dedupe() {
        let queries = TidalAdapter::build_queries("Song", "Artist");
        assert_eq!(queries, vec!["Artist Song", "Song", "Artist"]);

        let queries = TidalAdapter::build_queries("Song", "");
        assert_eq!(queries, vec!["Song"]);
    }
}
