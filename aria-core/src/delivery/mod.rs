pub mod amazon;
mod executor;
mod manifest;
mod output;
pub mod qobuz;
pub mod tidal;
pub mod youtube;

pub use executor::{download_dash, download_direct};
pub use manifest::{parse_manifest, ParsedManifest};
pub use output::OutputTarget;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Built-in delivery services, in fixed fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Tidal,
    Qobuz,
    Amazon,
    Youtube,
}

impl Service {
    pub const ALL: [Service; 4] = [Service::Tidal, Service::Qobuz, Service::Amazon, Service::Youtube];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tidal => "tidal",
            Self::Qobuz => "qobuz",
            Self::Amazon => "amazon",
            Self::Youtube => "youtube",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Service {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tidal" => Ok(Self::Tidal),
            "qobuz" => Ok(Self::Qobuz),
            "amazon" => Ok(Self::Amazon),
            "youtube" | "yt" => Ok(Self::Youtube),
            other => Err(format!("unsupported stream provider: {other}")),
        }
    }
}

/// Resolved stream descriptor handed from an adapter to the executor (or
/// straight to the host for transient playback).
#[derive(Debug, Clone, Default)]
pub struct StreamDescriptor {
    pub url: String,
    /// Base64 manifest blob for Tidal v2 responses; empty otherwise.
    pub manifest_b64: String,
    pub format: String,
    pub bit_depth: u32,
    pub sample_rate: u32,
    pub bitrate_kbps: u32,
    pub decryption_key: String,
    /// Gateway-suggested filename; may override the declared format.
    pub file_name: String,
}

impl StreamDescriptor {
    pub fn requires_decryption(&self) -> bool {
        !self.decryption_key.is_empty()
    }

    pub fn is_segmented(&self) -> bool {
        !self.manifest_b64.is_empty()
    }
}

pub(crate) fn normalize_stream_format(format: &str) -> &'static str {
    match format.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
        "flac" => "flac",
        "m4a" | "mp4" | "aac" => "m4a",
        "mp3" => "mp3",
        "opus" | "ogg" => "opus",
        "wav" => "wav",
        _ => "",
    }
}

/// Extension of the URL path when recognised, else the fallback.
pub fn infer_stream_format(raw_url: &str, fallback: &str) -> String {
    if !raw_url.trim().is_empty() {
        if let Ok(parsed) = url::Url::parse(raw_url) {
            if let Some(ext) = std::path::Path::new(parsed.path())
                .extension()
                .and_then(|e| e.to_str())
            {
                let mapped = normalize_stream_format(ext);
                if !mapped.is_empty() {
                    return mapped.to_string();
                }
            }
        }
    }
    normalize_stream_format(fallback).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_parsing() {
        assert_eq!("tidal".parse::<Service>().unwrap(), Service::Tidal);
        assert_eq!(" QOBUZ ".parse::<Service>().unwrap(), Service::Qobuz);
        assert!("spotify".parse::<Service>().is_err());
    }

    #[test]
    fn format_inference() {
        assert_eq!(infer_stream_format("https://cdn/x/track.flac?tok=1", "m4a"), "flac");
        assert_eq!(infer_stream_format("https://cdn/x/stream", "mp4"), "m4a");
        assert_eq!(infer_stream_format("", "OPUS"), "opus");
        assert_eq!(infer_stream_format("", "bin"), "");
    }
}
