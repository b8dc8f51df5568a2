//! Wire types for the JSON payloads crossing the FFI boundary. Field names
//! here are the contract with the host bindings; the engine's own models
//! live in `aria-core` and are mapped in `aria-ffi`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OkReply {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParsedUrl {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpotifyCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// The download-request envelope. Everything is optional on the wire;
/// validation happens engine-side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadRequest {
    #[serde(default)]
    pub isrc: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub spotify_id: String,
    #[serde(default)]
    pub deezer_id: String,
    #[serde(default)]
    pub tidal_id: String,
    #[serde(default)]
    pub qobuz_id: String,
    #[serde(default)]
    pub track_name: String,
    #[serde(default)]
    pub artist_name: String,
    #[serde(default)]
    pub album_name: String,
    #[serde(default)]
    pub album_artist: String,
    #[serde(default)]
    pub cover_url: String,
    #[serde(default)]
    pub output_dir: String,
    #[serde(default)]
    pub output_path: String,
    #[serde(default)]
    pub output_fd: i32,
    #[serde(default)]
    pub filename_format: String,
    #[serde(default)]
    pub quality: String,
    #[serde(default)]
    pub item_id: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub use_extensions: bool,
    #[serde(default)]
    pub use_fallback: bool,
    #[serde(default)]
    pub embed_lyrics: bool,
    #[serde(default)]
    pub embed_max_quality_cover: bool,
    #[serde(default)]
    pub convert_lyrics_to_romaji: bool,
    #[serde(default)]
    pub save_lrc_file: bool,
    #[serde(default)]
    pub track_number: u32,
    #[serde(default)]
    pub disc_number: u32,
    #[serde(default)]
    pub total_tracks: u32,
    #[serde(default)]
    pub release_date: String,
    #[serde(default)]
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_path: String,
    #[serde(default)]
    pub already_exists: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stream_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,
    #[serde(default)]
    pub bit_depth: u32,
    #[serde(default)]
    pub sample_rate: u32,
    #[serde(default)]
    pub bitrate: u32,
    #[serde(default)]
    pub requires_decryption: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub decryption_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DuplicateCheckResult {
    pub exists: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filepath: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackExistence {
    pub isrc: String,
    pub exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub track_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub artist_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemProgress {
    pub item_id: String,
    pub bytes_total: i64,
    pub bytes_received: i64,
    pub progress: f64,
    pub speed_mbps: f64,
    pub is_downloading: bool,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultiProgress {
    pub items: HashMap<String, ItemProgress>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegacyProgress {
    pub current_file: String,
    /// Percentage, 0..100; the keyed store carries fractions.
    pub progress: f64,
    pub speed_mbps: f64,
    pub bytes_total: i64,
    pub bytes_received: i64,
    pub is_downloading: bool,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub tag: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogsPage {
    pub logs: Vec<LogEntry>,
    pub next_index: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtensionDirectories {
    pub extensions_dir: String,
    pub data_dir: String,
    /// Device-stable secret; plug-in credential keys derive from it.
    #[serde(default)]
    pub secret: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtensionInfo {
    pub name: String,
    pub display_name: String,
    pub version: String,
    pub author: String,
    pub description: String,
    pub types: Vec<String>,
    pub enabled: bool,
    pub loaded: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quality_options: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpgradeCheck {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current_version: String,
    pub new_version: String,
    pub is_upgrade: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PendingAuth {
    pub extension: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LyricsOptions {
    #[serde(default)]
    pub include_translation_netease: bool,
    #[serde(default)]
    pub include_romanization_netease: bool,
    #[serde(default)]
    pub multi_person_word_by_word: bool,
    #[serde(default)]
    pub musixmatch_language: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_request_tolerates_sparse_json() {
        let req: DownloadRequest =
            serde_json::from_str(r#"{"isrc":"USRC17600001","service":"tidal"}"#).unwrap();
        assert_eq!(req.isrc, "USRC17600001");
        assert_eq!(req.service, "tidal");
        assert!(!req.use_fallback);
        assert_eq!(req.output_fd, 0);
        assert_eq!(req.duration_ms, 0);
    }

    #[test]
    fn download_response_omits_empty_fields() {
        let resp = DownloadResponse {
            success: true,
            file_path: "/music/a.flac".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("file_path"));
        assert!(!json.contains("error"));
        assert!(!json.contains("message"));
    }

    #[test]
    fn parsed_url_type_field_name() {
        let parsed = ParsedUrl {
            entity_type: "track".to_string(),
            id: "4iV5W9uYEdYUVa79Axb7Rh".to_string(),
        };
        let json = serde_json::to_string(&parsed).unwrap();
        assert!(json.contains(r#""type":"track""#));
        let back: ParsedUrl = serde_json::from_str(&json).unwrap();
        assert_eq!(back, parsed);
    }

    #[test]
    fn stream_response_roundtrip() {
        let resp = StreamResponse {
            success: true,
            service: "qobuz".to_string(),
            stream_url: "https://cdn/x.flac".to_string(),
            format: "flac".to_string(),
            bit_depth: 24,
            sample_rate: 96_000,
            requires_decryption: true,
            decryption_key: "k".to_string(),
            ..Default::default()
        };
        let back: StreamResponse =
            serde_json::from_str(&serde_json::to_string(&resp).unwrap()).unwrap();
        assert_eq!(back.bit_depth, 24);
        assert!(back.requires_decryption);
        assert_eq!(back.decryption_key, "k");
    }
}
