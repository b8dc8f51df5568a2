//! Network guard for the plug-in `http.*` capability: manifest allow-list
//! enforcement, private-address rejection and a manual redirect walk so every
//! hop is re-validated before any connection is made.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::extensions::manifest::ExtensionManifest;
use crate::http;
use crate::logbuf;

const MAX_REDIRECTS: usize = 10;
const GUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Loopback, RFC1918, link-local and mDNS hosts. Matched on the URL host
/// string; redirect targets that point into these ranges are refused without
/// ever connecting.
pub fn is_private_host(host: &str) -> bool {
    let host = host.trim().trim_matches(|c| c == '[' || c == ']').to_ascii_lowercase();
    if host.is_empty() || host == "localhost" || host.ends_with(".local") {
        return true;
    }
    if host == "::1" || host.starts_with("fc00:") || (host.starts_with("fd") && host.contains(':')) {
        return true;
    }
    if host.starts_with("fe80:") {
        return true;
    }
    if host.starts_with("127.") || host.starts_with("10.") {
        return true;
    }
    if host.starts_with("192.168.") || host.starts_with("169.254.") {
        return true;
    }
    if let Some(rest) = host.strip_prefix("172.") {
        if let Some(second) = rest.split('.').next() {
            if let Ok(n) = second.parse::<u8>() {
                return (16..=31).contains(&n);
            }
        }
    }
    false
}

/// One URL validated against the plug-in's declared permissions. Rejects
/// embedded userinfo outright; `user:pass@evil.com` shapes defeat naive host
/// parsing in guest code.
pub fn validate_guest_url(manifest: &ExtensionManifest, raw_url: &str) -> Result<url::Url, EngineError> {
    let parsed = url::Url::parse(raw_url.trim())
        .map_err(|e| EngineError::Extension(format!("invalid URL: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(EngineError::Extension(format!(
                "unsupported URL scheme: {other}"
            )));
        }
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(EngineError::Extension(
            "URLs with embedded credentials are not allowed".to_string(),
        ));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| EngineError::Extension("URL has no host".to_string()))?;
    if is_private_host(host) {
        return Err(EngineError::Extension(format!(
            "requests to private addresses are blocked: {host}"
        )));
    }
    if !manifest.is_domain_allowed(host) {
        return Err(EngineError::Extension(format!(
            "domain not in the extension's network permissions: {host}"
        )));
    }
    Ok(parsed)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GuestHttpRequest {
    pub url: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GuestHttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

fn client() -> Client {
    // Redirects are walked manually; automatic following would skip the
    // per-hop allow-list and private-address checks.
    Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(GUEST_TIMEOUT)
        .use_rustls_tls()
        .build()
        .unwrap_or_else(|_| Client::new())
}

fn header_map(headers: &HashMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (k, v) in headers {
        let Ok(name) = HeaderName::from_bytes(k.as_bytes()) else { continue };
        let Ok(value) = HeaderValue::from_str(v) else { continue };
        map.insert(name, value);
    }
    map
}

/// Execute one guest HTTP request. Every redirect target is validated the
/// same way as the original URL, up to 10 hops; request headers and body are
/// only replayed on same-host redirects.
pub async fn guest_request(
    manifest: &ExtensionManifest,
    ext_name: &str,
    req: &GuestHttpRequest,
) -> Result<GuestHttpResponse, EngineError> {
    let method = if req.method.trim().is_empty() {
        Method::GET
    } else {
        Method::from_bytes(req.method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| EngineError::Extension(format!("invalid HTTP method: {}", req.method)))?
    };

    let mut current = validate_guest_url(manifest, &req.url)?;
    let first_host = current.host_str().unwrap_or_default().to_string();
    let http_client = client();

    for _hop in 0..=MAX_REDIRECTS {
        let same_host = current.host_str().unwrap_or_default() == first_host;
        let mut builder = http_client
            .request(method.clone(), current.clone())
            .header(reqwest::header::USER_AGENT, http::random_desktop_user_agent());
        if same_host {
            builder = builder.headers(header_map(&req.headers));
            if !req.body.is_empty() {
                builder = builder.body(req.body.clone());
            }
        }

        let resp = builder.send().await.map_err(|e| {
            EngineError::Extension(format!("request failed: {e}"))
        })?;

        let status = resp.status();
        if status.is_redirection() {
            let location = resp
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    EngineError::Extension("redirect without a Location header".to_string())
                })?;
            let next = current
                .join(location)
                .map_err(|e| EngineError::Extension(format!("invalid redirect target: {e}")))?;
            logbuf::debug(
                &format!("ext:{ext_name}"),
                format!("redirect {} -> {}", status.as_u16(), next.host_str().unwrap_or("?")),
            );
            current = validate_guest_url(manifest, next.as_str())?;
            continue;
        }

        let mut headers = HashMap::new();
        for (name, value) in resp.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.as_str().to_string(), v.to_string());
            }
        }
        let body = resp.text().await.unwrap_or_default();
        return Ok(GuestHttpResponse {
            status: status.as_u16(),
            headers,
            body,
        });
    }

    Err(EngineError::Extension(format!(
        "too many redirects (limit {MAX_REDIRECTS})"
    )))
}
