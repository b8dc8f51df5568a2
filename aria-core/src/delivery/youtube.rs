use std::sync::OnceLock;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::EngineError;
use crate::http;
use crate::logbuf;

use super::StreamDescriptor;

const SPOTUBE_BASE: &str = "https://spotubedl.com";
const COBALT_API: &str = "https://api.qwkuns.me";

const OPUS_BITRATES: [u32; 2] = [128, 256];
const MP3_BITRATES: [u32; 3] = [128, 256, 320];

pub fn build_watch_url(video_id: &str) -> String {
    format!("https://music.youtube.com/watch?v={video_id}")
}

pub fn is_video_id(s: &str) -> bool {
    s.len() == 11
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub fn is_youtube_url(raw: &str) -> bool {
    let Ok(parsed) = Url::parse(raw.trim()) else {
        return false;
    };
    let host = parsed.host_str().unwrap_or_default();
    host.ends_with("youtube.com") || host == "youtu.be"
}

/// Video ID out of watch/shorts/embed/short-link URL shapes.
pub fn extract_video_id(raw: &str) -> Result<String, EngineError> {
    let trimmed = raw.trim();
    if is_video_id(trimmed) {
        return Ok(trimmed.to_string());
    }
    let parsed = Url::parse(trimmed)
        .map_err(|_| EngineError::InvalidRequest("invalid YouTube URL".to_string()))?;
    let host = parsed.host_str().unwrap_or_default();

    if host == "youtu.be" {
        if let Some(id) = parsed.path_segments().and_then(|mut s| s.next()) {
            if is_video_id(id) {
                return Ok(id.to_string());
            }
        }
    }
    if host.ends_with("youtube.com") {
        if let Some(id) = parsed
            .query_pairs()
            .find(|(k, _)| k == "v")
            .map(|(_, v)| v.into_owned())
        {
            if is_video_id(&id) {
                return Ok(id);
            }
        }
        let segments: Vec<&str> = parsed
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();
        for window in segments.windows(2) {
            if matches!(window[0], "embed" | "shorts" | "live") && is_video_id(window[1]) {
                return Ok(window[1].to_string());
            }
        }
    }
    Err(EngineError::InvalidRequest(format!(
        "could not extract video ID from: {trimmed}"
    )))
}

fn nearest_supported(value: u32, supported: &[u32]) -> u32 {
    let mut best = supported[0];
    let mut best_diff = best.abs_diff(value);
    for &candidate in &supported[1..] {
        let diff = candidate.abs_diff(value);
        // Ties break toward the higher rate.
        if diff < best_diff || (diff == best_diff && candidate > best) {
            best = candidate;
            best_diff = diff;
        }
    }
    best
}

/// Parse quality strings like `opus_192` / `mp3_160`, snapping the bitrate
/// to the nearest supported rate for the format.
pub fn parse_quality(raw: &str) -> (String, u32) {
    let lower = raw.trim().to_ascii_lowercase();
    let (format, rate_text) = match lower.split_once('_') {
        Some((f, r)) => (f.to_string(), r.to_string()),
        None if !lower.is_empty() => (lower.clone(), String::new()),
        None => ("opus".to_string(), String::new()),
    };

    let format = if format == "mp3" { "mp3" } else { "opus" };
    let supported: &[u32] = if format == "mp3" { &MP3_BITRATES } else { &OPUS_BITRATES };
    let default = if format == "mp3" { 320 } else { 256 };

    let requested = rate_text.parse::<u32>().unwrap_or(default);
    (format.to_string(), nearest_supported(requested, supported))
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResolvedDownload {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub filename: String,
}

#[derive(Debug, Serialize)]
struct CobaltRequest<'a> {
    url: &'a str,
    #[serde(rename = "audioFormat")]
    audio_format: &'a str,
    #[serde(rename = "audioBitrate")]
    audio_bitrate: String,
    #[serde(rename = "downloadMode")]
    download_mode: &'a str,
    #[serde(rename = "filenameStyle")]
    filename_style: &'a str,
    #[serde(rename = "disableMetadata")]
    disable_metadata: bool,
}

pub struct YoutubeAdapter {
    http: Client,
    spotube_base: String,
    cobalt_api: String,
}

pub fn adapter() -> &'static YoutubeAdapter {
    static ADAPTER: OnceLock<YoutubeAdapter> = OnceLock::new();
    ADAPTER.get_or_init(YoutubeAdapter::new)
}

impl YoutubeAdapter {
    pub fn new() -> Self {
        Self {
            http: http::shared_client().clone(),
            spotube_base: SPOTUBE_BASE.to_string(),
            cobalt_api: COBALT_API.to_string(),
        }
    }

    pub fn with_endpoints(http: Client, spotube_base: &str, cobalt_api: &str) -> Self {
        Self {
            http,
            spotube_base: spotube_base.trim_end_matches('/').to_string(),
            cobalt_api: cobalt_api.trim_end_matches('/').to_string(),
        }
    }

    async fn request_spotube_engine(
        &self,
        video_id: &str,
        format: &str,
        bitrate: u32,
        engine: &str,
    ) -> Result<ResolvedDownload, EngineError> {
        let endpoint = format!(
            "{}/api/download/{video_id}?engine={engine}&format={format}&quality={bitrate}",
            self.spotube_base
        );
        logbuf::debug("YouTube", format!("requesting SpotubeDL ({engine})"));

        let resp = self
            .http
            .get(&endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::USER_AGENT, http::random_desktop_user_agent())
            .timeout(Duration::from_secs(60))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(EngineError::Transport(format!(
                "spotubedl({engine}) returned status {}",
                resp.status().as_u16()
            )));
        }

        #[derive(Deserialize, Default)]
        struct SpotubeResponse {
            #[serde(default)]
            url: String,
            #[serde(default)]
            error: String,
            #[serde(default)]
            message: String,
            #[serde(default)]
            filename: String,
        }
        let result: SpotubeResponse = resp.json().await?;

        let mut download_url = result.url.trim().to_string();
        if download_url.is_empty() {
            let reason = if !result.error.is_empty() {
                result.error
            } else if !result.message.is_empty() {
                result.message
            } else {
                format!("no download URL from spotubedl({engine})")
            };
            return Err(EngineError::NotFound(reason));
        }
        if download_url.starts_with('/') {
            download_url = format!("{}{download_url}", self.spotube_base);
        }
        if !download_url.starts_with("http://") && !download_url.starts_with("https://") {
            return Err(EngineError::Parse(format!(
                "invalid download URL from spotubedl({engine}): {download_url}"
            )));
        }

        let mut filename = result.filename.trim().to_string();
        if filename.is_empty() {
            if let Ok(parsed) = Url::parse(&download_url) {
                if let Some(name) = parsed
                    .query_pairs()
                    .find(|(k, _)| k == "filename")
                    .map(|(_, v)| v.into_owned())
                {
                    filename = name;
                }
            }
        }

        Ok(ResolvedDownload {
            status: "tunnel".to_string(),
            url: download_url,
            filename,
        })
    }

    /// Engine chain: v1 always, v2 only for MP3 requests.
    async fn request_spotube(
        &self,
        video_id: &str,
        format: &str,
        bitrate: u32,
    ) -> Result<ResolvedDownload, EngineError> {
        let engines: &[&str] = if format.eq_ignore_ascii_case("mp3") {
            &["v1", "v2"]
        } else {
            &["v1"]
        };

        let mut last_err = None;
        for engine in engines {
            match self.request_spotube_engine(video_id, format, bitrate, engine).await {
                Ok(resolved) => return Ok(resolved),
                Err(err) => {
                    logbuf::debug("YouTube", format!("SpotubeDL ({engine}) failed: {err}"));
                    last_err = Some(err);
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| EngineError::Transport("no SpotubeDL engine available".to_string())))
    }

    async fn request_cobalt(
        &self,
        video_url: &str,
        format: &str,
        bitrate: u32,
    ) -> Result<ResolvedDownload, EngineError> {
        #[derive(Deserialize, Default)]
        struct CobaltError {
            #[serde(default)]
            code: String,
        }
        #[derive(Deserialize, Default)]
        struct CobaltResponse {
            #[serde(default)]
            status: String,
            #[serde(default)]
            url: String,
            #[serde(default)]
            filename: String,
            #[serde(default)]
            error: Option<CobaltError>,
        }

        let resp = self
            .http
            .post(&self.cobalt_api)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::USER_AGENT, http::random_desktop_user_agent())
            .json(&CobaltRequest {
                url: video_url,
                audio_format: format,
                audio_bitrate: bitrate.to_string(),
                download_mode: "audio",
                filename_style: "basic",
                disable_metadata: true,
            })
            .timeout(Duration::from_secs(60))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(EngineError::Transport(format!(
                "cobalt API returned status {}",
                resp.status().as_u16()
            )));
        }

        let result: CobaltResponse = resp.json().await?;
        if result.status == "error" {
            let code = result.error.map(|e| e.code).unwrap_or_default();
            return Err(EngineError::Transport(format!("cobalt error: {code}")));
        }
        if result.status != "tunnel" && result.status != "redirect" {
            return Err(EngineError::Transport(format!(
                "unexpected cobalt status: {}",
                result.status
            )));
        }
        if result.url.is_empty() {
            return Err(EngineError::NotFound("no download URL in response".to_string()));
        }

        Ok(ResolvedDownload {
            status: result.status,
            url: result.url,
            filename: result.filename,
        })
    }

    /// SpotubeDL is primary, Cobalt-direct the fallback. The gateway-reported
    /// filename can override the declared output format.
    pub async fn resolve_url(
        &self,
        youtube_url: &str,
        quality: &str,
    ) -> Result<StreamDescriptor, EngineError> {
        let (format, bitrate) = parse_quality(quality);

        let mut spotube_err: Option<EngineError> = None;
        match extract_video_id(youtube_url) {
            Ok(video_id) => {
                match self.request_spotube(&video_id, &format, bitrate).await {
                    Ok(resolved) => return Ok(to_descriptor(resolved, &format, bitrate)),
                    Err(err) => {
                        logbuf::debug("YouTube", format!("SpotubeDL failed: {err}, trying Cobalt"));
                        spotube_err = Some(err);
                    }
                }
            }
            Err(err) => {
                logbuf::debug("YouTube", format!("could not extract video ID: {err}"));
            }
        }

        let cobalt_url = extract_video_id(youtube_url)
            .map(|id| build_watch_url(&id))
            .unwrap_or_else(|_| youtube_url.to_string());
        match self.request_cobalt(&cobalt_url, &format, bitrate).await {
            Ok(resolved) => Ok(to_descriptor(resolved, &format, bitrate)),
            Err(cobalt_err) => Err(EngineError::AllProvidersFailed(match spotube_err {
                Some(se) => format!("all download methods failed: spotubedl: {se}, cobalt: {cobalt_err}"),
                None => format!("all download methods failed: cobalt: {cobalt_err}"),
            })),
        }
    }
}

fn to_descriptor(resolved: ResolvedDownload, format: &str, bitrate: u32) -> StreamDescriptor {
    let mut format = format.to_string();
    let lower_name = resolved.filename.trim().to_ascii_lowercase();
    if lower_name.ends_with(".mp3") {
        format = "mp3".to_string();
    } else if lower_name.ends_with(".opus") || lower_name.ends_with(".ogg") {
        format = "opus".to_string();
    }

    StreamDescriptor {
        url: resolved.url,
        format,
        bitrate_kbps: bitrate,
        file_name: resolved.filename,
        ..Default::default()
    }
}

impl Default for YoutubeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_parsing_snaps_to_supported_rates() {
        assert_eq!(parse_quality("opus_192"), ("opus".to_string(), 256));
        assert_eq!(parse_quality("mp3_160"), ("mp3".to_string(), 128));
        assert_eq!(parse_quality("mp3_321"), ("mp3".to_string(), 320));
        assert_eq!(parse_quality("opus_128"), ("opus".to_string(), 128));
        // Unknown formats fall back to opus at its default.
        assert_eq!(parse_quality("weird"), ("opus".to_string(), 256));
        assert_eq!(parse_quality(""), ("opus".to_string(), 256));
    }

    #[test]
    fn tie_breaks_prefer_higher_rate() {
        // 192 is equidistant from 128 and 256.
        assert_eq!(nearest_supported(192, &OPUS_BITRATES), 256);
        assert_eq!(nearest_supported(224, &MP3_BITRATES), 256);
    }

    #[test]
    fn video_id_extraction_forms() {
        assert_eq!(extract_video_id("dQw4w9WgXcQ").unwrap(), "dQw4w9WgXcQ");
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=1").unwrap(),
            "dQw4w9WgXcQ"
        );
        assert_eq!(
            extract_video_id("https://youtu.be/dQw4w9WgXcQ").unwrap(),
            "dQw4w9WgXcQ"
        );
        assert_eq!(
            extract_video_id("https://music.youtube.com/watch?v=dQw4w9WgXcQ").unwrap(),
            "dQw4w9WgXcQ"
        );
        assert_eq!(
            extract_video_id("https://www.youtube.com/embed/dQw4w9WgXcQ").unwrap(),
            "dQw4w9WgXcQ"
        );
        assert!(extract_video_id("https://example.com/watch?v=nope").is_err());
    }

    #[test]
    fn filename_overrides_declared_format() {
        let descriptor = to_descriptor(
            ResolvedDownload {
                status: "tunnel".to_string(),
                url: "https://cdn/x".to_string(),
                filename: "Artist - Song.mp3".to_string(),
            },
            "opus",
            256,
        );
        assert_eq!(descriptor.format, "mp3");
    }
}
