use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::http;
use crate::logbuf;

use super::{extract_spotify_track_id, extract_trailing_id, Availability};

const API_URL: &str = "https://idonthavespotify.sjdonado.com/api/search?v=1";

/// Fallback link resolver ("I Don't Have Spotify"), used when SongLink fails
/// or is rate limited. Separate admission gate from SongLink.
pub struct IdhsClient {
    http: Client,
    api_url: String,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    link: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    adapters: Vec<&'a str>,
}

#[derive(Debug, Deserialize, Default)]
struct SearchResponse {
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Debug, Deserialize, Default)]
struct Link {
    #[serde(rename = "type", default)]
    platform: String,
    #[serde(default)]
    url: String,
    #[serde(rename = "notAvailable", default)]
    not_available: bool,
}

impl IdhsClient {
    pub fn new() -> Self {
        Self::with_url(http::shared_client().clone(), API_URL)
    }

    pub fn with_url(http: Client, api_url: &str) -> Self {
        Self {
            http,
            api_url: api_url.to_string(),
        }
    }

    async fn search(&self, link: &str, adapters: Vec<&str>) -> Result<SearchResponse, EngineError> {
        http::idhs_limiter().acquire().await;

        let resp = self
            .http
            .post(&self.api_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::USER_AGENT, http::random_desktop_user_agent())
            .json(&SearchRequest { link, adapters })
            .timeout(std::time::Duration::from_secs(15))
            .send()
            .await?;

        match resp.status().as_u16() {
            200 => {}
            400 => {
                return Err(EngineError::InvalidRequest(
                    "invalid link or missing parameters".to_string(),
                ))
            }
            429 => return Err(EngineError::RateLimited { retry_after: None }),
            500 => return Err(EngineError::Transport("IDHS processing failed".to_string())),
            status => {
                return Err(EngineError::Transport(format!(
                    "IDHS API returned status {status}"
                )))
            }
        }

        let body = http::read_body_bytes(resp).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    pub async fn availability_from_spotify(
        &self,
        spotify_track_id: &str,
    ) -> Result<Availability, EngineError> {
        let spotify_url = format!("https://open.spotify.com/track/{spotify_track_id}");
        let result = self.search(&spotify_url, vec!["tidal", "deezer"]).await?;

        let mut availability = Availability {
            spotify_id: spotify_track_id.to_string(),
            ..Default::default()
        };
        for link in result.links.iter().filter(|l| !l.not_available) {
            match link.platform.to_ascii_lowercase().as_str() {
                "tidal" => {
                    availability.tidal = true;
                    availability.tidal_url = link.url.clone();
                    availability.tidal_id = extract_trailing_id(&link.url);
                }
                "deezer" => {
                    availability.deezer = true;
                    availability.deezer_url = link.url.clone();
                    availability.deezer_id = extract_trailing_id(&link.url);
                }
                _ => {}
            }
        }

        logbuf::debug(
            "IDHS",
            format!(
                "availability from Spotify {spotify_track_id}: tidal={}, deezer={}",
                availability.tidal, availability.deezer
            ),
        );
        Ok(availability)
    }

    pub async fn availability_from_deezer(
        &self,
        deezer_track_id: &str,
    ) -> Result<Availability, EngineError> {
        let deezer_url = format!("https://www.deezer.com/track/{deezer_track_id}");
        let result = self.search(&deezer_url, vec!["spotify", "tidal"]).await?;

        let mut availability = Availability {
            deezer: true,
            deezer_id: deezer_track_id.to_string(),
            ..Default::default()
        };
        for link in result.links.iter().filter(|l| !l.not_available) {
            match link.platform.to_ascii_lowercase().as_str() {
                "spotify" => {
                    availability.spotify_id = extract_spotify_track_id(&link.url);
                }
                "tidal" => {
                    availability.tidal = true;
                    availability.tidal_url = link.url.clone();
                    availability.tidal_id = extract_trailing_id(&link.url);
                }
                _ => {}
            }
        }
        Ok(availability)
    }
}

impl Default for IdhsClient {
    fn default() -> Self {
        Self::new()
    }
}
