//! Cover-art fetch with Spotify CDN resolution upgrades. Bytes stay in
//! memory; writing temp files trips sandbox permissions on the host side.

use reqwest::Client;

use crate::error::EngineError;
use crate::http;
use crate::logbuf;

// Spotify CDN path size codes.
const SIZE_300: &str = "ab67616d00001e02";
const SIZE_640: &str = "ab67616d0000b273";
const SIZE_MAX: &str = "ab67616d000082c1";

/// 300x300 -> 640x640. Always applied; the CDN serves 640 whenever the
/// artwork exists at all.
pub fn upgrade_small_to_medium(image_url: &str) -> String {
    if image_url.contains(SIZE_300) {
        image_url.replacen(SIZE_300, SIZE_640, 1)
    } else {
        image_url.to_string()
    }
}

/// 640x640 -> ~2000x2000, opt-in. No HEAD probe needed.
pub fn upgrade_to_max_quality(image_url: &str) -> String {
    if image_url.contains(SIZE_640) {
        image_url.replacen(SIZE_640, SIZE_MAX, 1)
    } else {
        image_url.to_string()
    }
}

pub fn rewrite_cover_url(image_url: &str, max_quality: bool) -> String {
    if image_url.is_empty() {
        return String::new();
    }
    let upgraded = upgrade_small_to_medium(image_url);
    if max_quality {
        upgrade_to_max_quality(&upgraded)
    } else {
        upgraded
    }
}

/// Fetch cover bytes into memory.
pub async fn download_cover(
    http_client: &Client,
    cover_url: &str,
    max_quality: bool,
) -> Result<Vec<u8>, EngineError> {
    if cover_url.is_empty() {
        return Err(EngineError::InvalidRequest("no cover URL provided".to_string()));
    }

    let download_url = rewrite_cover_url(cover_url, max_quality);
    logbuf::debug("Cover", format!("fetching {download_url}"));

    let resp = http::request(http_client, reqwest::Method::GET, &download_url, |req| {
        req.timeout(std::time::Duration::from_secs(60))
    })
    .await?;
    if !resp.status().is_success() {
        return Err(EngineError::Transport(format!(
            "cover download failed: HTTP {}",
            resp.status().as_u16()
        )));
    }

    let data = resp.bytes().await?.to_vec();
    if data.is_empty() {
        return Err(EngineError::Transport("cover response was empty".to_string()));
    }
    logbuf::debug("Cover", format!("downloaded {} KB", data.len() / 1024));
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_upgrades_iff_present() {
        let small = format!("https://i.scdn.co/image/{SIZE_300}aaaa");
        let upgraded = upgrade_small_to_medium(&small);
        assert!(upgraded.contains(SIZE_640));
        assert!(!upgraded.contains(SIZE_300));

        let other = "https://i.scdn.co/image/unrelated";
        assert_eq!(upgrade_small_to_medium(other), other);
    }

    #[test]
    fn max_upgrades_iff_present() {
        let medium = format!("https://i.scdn.co/image/{SIZE_640}bbbb");
        let upgraded = upgrade_to_max_quality(&medium);
        assert!(upgraded.contains(SIZE_MAX));

        let other = "https://i.scdn.co/image/unrelated";
        assert_eq!(upgrade_to_max_quality(other), other);
    }

    #[test]
    fn chained_rewrite() {
        let small = format!("https://i.scdn.co/image/{SIZE_300}cccc");
        assert!(rewrite_cover_url(&small, false).contains(SIZE_640));
        assert!(rewrite_cover_url(&small, true).contains(SIZE_MAX));
        assert_eq!(rewrite_cover_url("", true), "");
    }
}
