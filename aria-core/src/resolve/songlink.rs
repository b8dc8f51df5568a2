use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use reqwest::{Client, Method};
use serde::Deserialize;

use crate::error::EngineError;
use crate::http::{self, request_with_retry, RetryConfig};
use crate::logbuf;

use super::{
    extract_spotify_track_id, extract_trailing_id, AlbumAvailability, Availability, IdhsClient,
};

// Endpoints kept as data, lightly obfuscated like the gateway lists.
const API_BASE_B64: &str = "aHR0cHM6Ly9hcGkuc29uZy5saW5rL3YxLWFscGhhLjEvbGlua3M=";
const SPOTIFY_TRACK_B64: &str = "aHR0cHM6Ly9vcGVuLnNwb3RpZnkuY29tL3RyYWNrLw==";
const SPOTIFY_ALBUM_B64: &str = "aHR0cHM6Ly9vcGVuLnNwb3RpZnkuY29tL2FsYnVtLw==";

fn decode(b64: &str) -> String {
    B64.decode(b64)
        .ok()
        .and_then(|b| String::from_utf8(b).ok())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Deserialize, Default)]
struct PlatformLink {
    #[serde(default)]
    url: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct LinksResponse {
    #[serde(rename = "linksByPlatform", default)]
    links_by_platform: HashMap<String, PlatformLink>,
}

pub struct SongLinkClient {
    http: Client,
    api_base: String,
}

impl SongLinkClient {
    pub fn new() -> Self {
        Self::with_base(http::shared_client().clone(), &decode(API_BASE_B64))
    }

    pub fn with_base(http: Client, api_base: &str) -> Self {
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    async fn fetch_links(&self, query: &str) -> Result<LinksResponse, EngineError> {
        http::songlink_limiter().acquire().await;

        let url = format!("{}?{query}", self.api_base);
        let resp = request_with_retry(
            &self.http,
            Method::GET,
            &url,
            RetryConfig::default(),
            |req| req.timeout(http::SONGLINK_TIMEOUT),
        )
        .await?;

        match resp.status().as_u16() {
            200 => {}
            400 => {
                return Err(EngineError::NotFound(
                    "track not found on SongLink (invalid ID or unavailable)".to_string(),
                ))
            }
            404 => {
                return Err(EngineError::NotFound(
                    "track not found on any streaming platform".to_string(),
                ))
            }
            429 => return Err(EngineError::RateLimited { retry_after: None }),
            status => {
                return Err(EngineError::Transport(format!(
                    "SongLink API returned status {status}"
                )))
            }
        }

        let body = http::read_body_bytes(resp).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn fill_availability(links: &LinksResponse, availability: &mut Availability) {
        if let Some(link) = links.links_by_platform.get("spotify") {
            if !link.url.is_empty() && availability.spotify_id.is_empty() {
                availability.spotify_id = extract_spotify_track_id(&link.url);
            }
        }
        if let Some(link) = links.links_by_platform.get("tidal") {
            if !link.url.is_empty() {
                availability.tidal = true;
                availability.tidal_url = link.url.clone();
                availability.tidal_id = extract_trailing_id(&link.url);
            }
        }
        if let Some(link) = links.links_by_platform.get("amazonMusic") {
            if !link.url.is_empty() {
                availability.amazon = true;
                availability.amazon_url = link.url.clone();
            }
        }
        if let Some(link) = links.links_by_platform.get("qobuz") {
            if !link.url.is_empty() {
                availability.qobuz = true;
                availability.qobuz_url = link.url.clone();
                availability.qobuz_id = extract_trailing_id(&link.url);
            }
        }
        if let Some(link) = links.links_by_platform.get("deezer") {
            if !link.url.is_empty() {
                availability.deezer = true;
                availability.deezer_url = link.url.clone();
                availability.deezer_id = extract_trailing_id(&link.url);
            }
        }
        if let Some(link) = links.links_by_platform.get("youtube") {
            if !link.url.is_empty() {
                availability.youtube = true;
                availability.youtube_url = link.url.clone();
            }
        }
    }

    async fn check_spotify_songlink(
        &self,
        spotify_track_id: &str,
    ) -> Result<Availability, EngineError> {
        let spotify_url = format!("{}{spotify_track_id}", decode(SPOTIFY_TRACK_B64));
        let links = self
            .fetch_links(&format!("url={}", urlencode(&spotify_url)))
            .await?;
        let mut availability = Availability {
            spotify_id: spotify_track_id.to_string(),
            ..Default::default()
        };
        Self::fill_availability(&links, &mut availability);
        Ok(availability)
    }

    /// Primary availability check. Falls back to IDHS when SongLink fails
    /// outright; an ISRC, if known, lets Qobuz presence be probed separately.
    pub async fn check_by_spotify_id(
        &self,
        spotify_track_id: &str,
        _isrc: &str,
    ) -> Result<Availability, EngineError> {
        if spotify_track_id.is_empty() {
            return Err(EngineError::InvalidRequest(
                "spotify track ID is empty".to_string(),
            ));
        }

        match self.check_spotify_songlink(spotify_track_id).await {
            Ok(availability) => Ok(availability),
            Err(err) => {
                logbuf::warn(
                    "SongLink",
                    format!("SongLink failed, trying IDHS fallback: {err}"),
                );
                let fallback = IdhsClient::new()
                    .availability_from_spotify(spotify_track_id)
                    .await
                    .map_err(|idhs_err| {
                        EngineError::Transport(format!(
                            "both SongLink and IDHS failed: {idhs_err}"
                        ))
                    })?;
                logbuf::info("SongLink", format!("IDHS fallback successful for {spotify_track_id}"));
                Ok(fallback)
            }
        }
    }

    pub async fn check_by_deezer_id(&self, deezer_track_id: &str) -> Result<Availability, EngineError> {
        if deezer_track_id.is_empty() {
            return Err(EngineError::InvalidRequest("deezer track ID is empty".to_string()));
        }

        let deezer_url = format!("https://www.deezer.com/track/{deezer_track_id}");
        let result = self
            .fetch_links(&format!("url={}&userCountry=US", urlencode(&deezer_url)))
            .await;

        match result {
            Ok(links) => {
                let mut availability = Availability {
                    deezer: true,
                    deezer_id: deezer_track_id.to_string(),
                    ..Default::default()
                };
                Self::fill_availability(&links, &mut availability);
                Ok(availability)
            }
            Err(err) => {
                logbuf::warn(
                    "SongLink",
                    format!("SongLink failed for Deezer, trying IDHS fallback: {err}"),
                );
                let fallback = IdhsClient::new()
                    .availability_from_deezer(deezer_track_id)
                    .await
                    .map_err(|idhs_err| {
                        EngineError::Transport(format!(
                            "both SongLink and IDHS failed: {idhs_err}"
                        ))
                    })?;
                logbuf::info(
                    "SongLink",
                    format!("IDHS fallback successful for Deezer {deezer_track_id}"),
                );
                Ok(fallback)
            }
        }
    }

    pub async fn check_by_url(&self, entity_url: &str) -> Result<Availability, EngineError> {
        if entity_url.trim().is_empty() {
            return Err(EngineError::InvalidRequest("url is empty".to_string()));
        }
        let links = self
            .fetch_links(&format!("url={}&userCountry=US", urlencode(entity_url)))
            .await?;
        let mut availability = Availability::default();
        Self::fill_availability(&links, &mut availability);
        Ok(availability)
    }

    /// Platform/type/id form of the links API, e.g. ("deezer", "song", id).
    pub async fn check_by_platform(
        &self,
        platform: &str,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Availability, EngineError> {
        if entity_id.is_empty() {
            return Err(EngineError::InvalidRequest(format!("{platform} ID is empty")));
        }
        let links = self
            .fetch_links(&format!(
                "platform={}&type={}&id={}&userCountry=US",
                urlencode(platform),
                urlencode(entity_type),
                urlencode(entity_id)
            ))
            .await?;
        let mut availability = Availability::default();
        Self::fill_availability(&links, &mut availability);
        Ok(availability)
    }

    pub async fn check_album_by_spotify_id(
        &self,
        spotify_album_id: &str,
    ) -> Result<AlbumAvailability, EngineError> {
        if spotify_album_id.is_empty() {
            return Err(EngineError::InvalidRequest("spotify album ID is empty".to_string()));
        }
        let spotify_url = format!("{}{spotify_album_id}", decode(SPOTIFY_ALBUM_B64));
        let links = self
            .fetch_links(&format!("url={}", urlencode(&spotify_url)))
            .await?;

        let mut availability = AlbumAvailability {
            spotify_id: spotify_album_id.to_string(),
            ..Default::default()
        };
        if let Some(link) = links.links_by_platform.get("deezer") {
            if !link.url.is_empty() {
                availability.deezer = true;
                availability.deezer_url = link.url.clone();
                availability.deezer_id = extract_trailing_id(&link.url);
            }
        }
        Ok(availability)
    }

    pub async fn deezer_id_from_spotify(&self, spotify_track_id: &str) -> Result<String, EngineError> {
        let availability = self.check_by_spotify_id(spotify_track_id, "").await?;
        if !availability.deezer || availability.deezer_id.is_empty() {
            return Err(EngineError::NotFound("track not found on Deezer".to_string()));
        }
        Ok(availability.deezer_id)
    }

    pub async fn youtube_url_from_spotify(&self, spotify_track_id: &str) -> Result<String, EngineError> {
        let availability = self.check_by_spotify_id(spotify_track_id, "").await?;
        if !availability.youtube || availability.youtube_url.is_empty() {
            return Err(EngineError::NotFound("track not found on YouTube".to_string()));
        }
        Ok(availability.youtube_url)
    }

    pub async fn youtube_url_from_deezer(&self, deezer_track_id: &str) -> Result<String, EngineError> {
        let availability = self.check_by_deezer_id(deezer_track_id).await?;
        if !availability.youtube || availability.youtube_url.is_empty() {
            return Err(EngineError::NotFound("track not found on YouTube".to_string()));
        }
        Ok(availability.youtube_url)
    }

    pub async fn tidal_url_from_deezer(&self, deezer_track_id: &str) -> Result<String, EngineError> {
        let availability = self.check_by_deezer_id(deezer_track_id).await?;
        if !availability.tidal || availability.tidal_url.is_empty() {
            return Err(EngineError::NotFound("track not found on Tidal".to_string()));
        }
        Ok(availability.tidal_url)
    }
}

impl Default for SongLinkClient {
    fn default() -> Self {
        Self::new()
    }
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}
