use std::sync::OnceLock;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::error::EngineError;
use crate::http;
use crate::logbuf;

use super::StreamDescriptor;

// DoubleDouble regional gateways.
const GATEWAYS_B64: [&str; 2] = [
    "ZG91YmxlZG91YmxlLnRvcA==",
    "ZXUuZG91YmxlZG91YmxlLnRvcA==",
];

const POLL_INTERVAL: Duration = Duration::from_secs(3);
const POLL_LIMIT: Duration = Duration::from_secs(5 * 60);

fn decode(b64: &str) -> String {
    B64.decode(b64)
        .ok()
        .and_then(|b| String::from_utf8(b).ok())
        .unwrap_or_default()
}

pub fn gateways() -> Vec<String> {
    GATEWAYS_B64
        .iter()
        .map(|g| format!("https://{}", decode(g)))
        .collect()
}

fn asin_exact() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^B[0-9A-Z]{9}$").expect("asin pattern"))
}

fn asin_find() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)B[0-9A-Z]{9}").expect("asin find pattern"))
}

fn normalize_asin(candidate: &str) -> String {
    let mut trimmed = candidate.trim().to_string();
    if trimmed.is_empty() {
        return String::new();
    }
    if let Ok(decoded) = urlencoding_decode(&trimmed) {
        trimmed = decoded;
    }
    let mut upper = trimmed.to_uppercase();
    if let Some(idx) = upper.find(['?', '#', '&', '/']) {
        upper.truncate(idx);
    }
    if asin_exact().is_match(&upper) {
        upper
    } else {
        String::new()
    }
}

fn urlencoding_decode(s: &str) -> Result<String, ()> {
    url::form_urlencoded::parse(format!("v={s}").as_bytes())
        .find(|(k, _)| k == "v")
        .map(|(_, v)| v.into_owned())
        .ok_or(())
}

/// Track ASIN out of an Amazon Music URL: query params first (preferring the
/// track-level key when an albumAsin rides along), then path segments after
/// `track(s)`, then the last segment, then anywhere in the string.
pub fn extract_asin(amazon_url: &str) -> String {
    let raw = amazon_url.trim();
    if raw.is_empty() {
        return String::new();
    }

    if let Ok(parsed) = Url::parse(raw) {
        for key in ["trackAsin", "trackasin", "trackASIN", "asin", "ASIN", "i"] {
            if let Some(value) = parsed
                .query_pairs()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.into_owned())
            {
                let asin = normalize_asin(&value);
                if !asin.is_empty() {
                    return asin;
                }
            }
        }

        let segments: Vec<&str> = parsed
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();
        for window in segments.windows(2) {
            let head = window[0].to_ascii_lowercase();
            if head == "track" || head == "tracks" {
                let asin = normalize_asin(window[1]);
                if !asin.is_empty() {
                    return asin;
                }
            }
        }
        if let Some(last) = segments.last() {
            let asin = normalize_asin(last);
            if !asin.is_empty() {
                return asin;
            }
        }
    }

    asin_find()
        .find(&raw.to_uppercase())
        .map(|m| normalize_asin(m.as_str()))
        .unwrap_or_default()
}

#[derive(Debug, Deserialize, Default)]
struct SubmitResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    id: String,
    #[serde(default)]
    error: String,
}

#[derive(Debug, Deserialize, Default)]
struct PollResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "decryptionKey", default)]
    decryption_key: String,
    #[serde(default)]
    message: String,
}

pub struct AmazonAdapter {
    http: Client,
    gateways: Vec<String>,
    poll_interval: Duration,
    poll_limit: Duration,
}

pub fn adapter() -> &'static AmazonAdapter {
    static ADAPTER: OnceLock<AmazonAdapter> = OnceLock::new();
    ADAPTER.get_or_init(AmazonAdapter::new)
}

/// Relative download URLs come back gateway-relative.
fn rebase_url(gateway: &str, raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return trimmed.to_string();
    }
    if trimmed.starts_with('/') {
        return format!("{}{trimmed}", gateway.trim_end_matches('/'));
    }
    format!("{}/{trimmed}", gateway.trim_end_matches('/'))
}

impl AmazonAdapter {
    pub fn new() -> Self {
        Self {
            http: http::shared_client().clone(),
            gateways: gateways(),
            poll_interval: POLL_INTERVAL,
            poll_limit: POLL_LIMIT,
        }
    }

    pub fn with_gateways(http: Client, gateways: Vec<String>) -> Self {
        Self {
            http,
            gateways,
            poll_interval: Duration::from_millis(20),
            poll_limit: Duration::from_secs(2),
        }
    }

    async fn submit(&self, gateway: &str, amazon_url: &str) -> Result<String, EngineError> {
        let endpoint = format!(
            "{}/dl?url={}",
            gateway.trim_end_matches('/'),
            urlencode(amazon_url)
        );
        let resp = self
            .http
            .get(&endpoint)
            .header(reqwest::header::USER_AGENT, http::random_desktop_user_agent())
            .timeout(Duration::from_secs(30))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(EngineError::Transport(format!(
                "gateway returned HTTP {}",
                resp.status().as_u16()
            )));
        }
        let submit: SubmitResponse = resp.json().await?;
        if !submit.success || submit.id.trim().is_empty() {
            let reason = if submit.error.is_empty() {
                "gateway did not accept the URL".to_string()
            } else {
                submit.error
            };
            return Err(EngineError::Transport(reason));
        }
        Ok(submit.id)
    }

    async fn poll_until_done(
        &self,
        gateway: &str,
        download_id: &str,
    ) -> Result<StreamDescriptor, EngineError> {
        let deadline = tokio::time::Instant::now() + self.poll_limit;
        let endpoint = format!("{}/dl/{download_id}", gateway.trim_end_matches('/'));

        loop {
            let resp = self
                .http
                .get(&endpoint)
                .header(reqwest::header::USER_AGENT, http::random_desktop_user_agent())
                .timeout(Duration::from_secs(30))
                .send()
                .await?;
            if !resp.status().is_success() {
                return Err(EngineError::Transport(format!(
                    "poll returned HTTP {}",
                    resp.status().as_u16()
                )));
            }
            let poll: PollResponse = resp.json().await?;

            match poll.status.as_str() {
                "done" => {
                    if poll.url.trim().is_empty() {
                        return Err(EngineError::Transport(
                            "gateway reported done without a URL".to_string(),
                        ));
                    }
                    let url = rebase_url(gateway, &poll.url);
                    let format = std::path::Path::new(&poll.name)
                        .extension()
                        .and_then(|e| e.to_str())
                        .unwrap_or("m4a")
                        .to_ascii_lowercase();
                    return Ok(StreamDescriptor {
                        url,
                        format,
                        file_name: poll.name,
                        decryption_key: poll.decryption_key,
                        ..Default::default()
                    });
                }
                "error" => {
                    let reason = if poll.message.is_empty() {
                        "gateway reported a conversion error".to_string()
                    } else {
                        poll.message
                    };
                    return Err(EngineError::Transport(reason));
                }
                // Anything else is still in progress.
                _ => {}
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(EngineError::Transport(
                    "timed out waiting for the Amazon gateway".to_string(),
                ));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Submit -> poll, per region in order; errors accumulate across the
    /// regional gateways.
    pub async fn resolve_url(&self, amazon_url: &str) -> Result<StreamDescriptor, EngineError> {
        if amazon_url.trim().is_empty() {
            return Err(EngineError::InvalidRequest("amazon URL is empty".to_string()));
        }

        let mut errors: Vec<String> = Vec::new();
        for gateway in &self.gateways {
            logbuf::debug("Amazon", format!("submitting to {gateway}"));
            let download_id = match self.submit(gateway, amazon_url).await {
                Ok(id) => id,
                Err(err) => {
                    errors.push(format!("{gateway}: {err}"));
                    continue;
                }
            };
            match self.poll_until_done(gateway, &download_id).await {
                Ok(stream) => return Ok(stream),
                Err(err) => errors.push(format!("{gateway}: {err}")),
            }
        }

        Err(EngineError::AllProvidersFailed(format!(
            "all {} Amazon gateways failed: {}",
            self.gateways.len(),
            errors.join("; ")
        )))
    }
}

impl Default for AmazonAdapter {
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
    use httpmock::prelude::*;

    #[test]
    fn asin_extraction_forms() {
        assert_eq!(
            extract_asin("https://music.amazon.com/albums/B07H8K1?trackAsin=B07XYZ1234"),
            "B07XYZ1234"
        );
        assert_eq!(
            extract_asin("https://music.amazon.com/tracks/b081h2k9x7"),
            "B081H2K9X7"
        );
        assert_eq!(
            extract_asin("https://music.amazon.de/albums/B00ALBUM11/track/B00TRACK22"),
            "B00TRACK22"
        );
        assert_eq!(extract_asin("not a url but has B09ABCDEFG inside"), "B09ABCDEFG");
        assert_eq!(extract_asin("https://example.com/nothing/here"), "");
        assert_eq!(extract_asin(""), "");
    }

    #[test]
    fn relative_urls_rebase_against_gateway() {
        assert_eq!(
            rebase_url("https://gw.example", "/files/x.flac"),
            "https://gw.example/files/x.flac"
        );
        assert_eq!(
            rebase_url("https://gw.example/", "files/x.flac"),
            "https://gw.example/files/x.flac"
        );
        assert_eq!(
            rebase_url("https://gw.example", "https://cdn/x.flac"),
            "https://cdn/x.flac"
        );
    }

    #[tokio::test]
    async fn submit_poll_done_flow() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/dl").query_param_exists("url");
            then.status(200)
                .json_body(serde_json::json!({"success": true, "id": "job42"}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/dl/job42");
            then.status(200).json_body(serde_json::json!({
                "status": "done",
                "url": "/out/track.flac",
                "name": "track.flac"
            }));
        });

        let adapter = AmazonAdapter::with_gateways(reqwest::Client::new(), vec![server.base_url()]);
        let stream = adapter
            .resolve_url("https://music.amazon.com/tracks/B000000001")
            .await
            .unwrap();
        assert_eq!(stream.url, format!("{}/out/track.flac", server.base_url()));
        assert_eq!(stream.format, "flac");
        assert!(!stream.requires_decryption());
    }

    #[tokio::test]
    async fn terminal_error_stops_polling() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/dl");
            then.status(200)
                .json_body(serde_json::json!({"success": true, "id": "bad"}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/dl/bad");
            then.status(200)
                .json_body(serde_json::json!({"status": "error", "message": "region locked"}));
        });

        let adapter = AmazonAdapter::with_gateways(reqwest::Client::new(), vec![server.base_url()]);
        let err = adapter
            .resolve_url("https://music.amazon.com/tracks/B000000001")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("region locked"));
    }
}
