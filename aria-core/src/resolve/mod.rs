mod idhs;
mod songlink;

pub use idhs::IdhsClient;
pub use songlink::SongLinkClient;

use serde::{Deserialize, Serialize};

/// Cross-platform presence map for one logical track or album.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Availability {
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub spotify_id: String,
    pub tidal: bool,
    pub amazon: bool,
    pub qobuz: bool,
    pub deezer: bool,
    pub youtube: bool,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub tidal_url: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub tidal_id: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub amazon_url: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub qobuz_url: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub qobuz_id: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub deezer_url: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub deezer_id: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub youtube_url: String,
}

/// Album-level availability is only consulted for the Deezer hop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlbumAvailability {
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub spotify_id: String,
    pub deezer: bool,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub deezer_url: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub deezer_id: String,
}

/// Last path segment with any query stripped; Deezer/Tidal/Qobuz track URLs
/// all end in the numeric ID.
pub(crate) fn extract_trailing_id(url: &str) -> String {
    let no_query = url.split('?').next().unwrap_or("");
    no_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

pub(crate) fn extract_spotify_track_id(url: &str) -> String {
    let Some((_, tail)) = url.split_once("/track/") else {
        return String::new();
    };
    tail.split('?').next().unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_id_extraction() {
        assert_eq!(extract_trailing_id("https://www.deezer.com/track/3135556"), "3135556");
        assert_eq!(extract_trailing_id("https://tidal.com/browse/track/77646170?u=x"), "77646170");
        assert_eq!(extract_trailing_id(""), "");
    }

    #[test]
    fn spotify_id_extraction() {
        assert_eq!(
            extract_spotify_track_id("https://open.spotify.com/track/4iV5W9uYEdYUVa79Axb7Rh?si=1"),
            "4iV5W9uYEdYUVa79Axb7Rh"
        );
        assert_eq!(extract_spotify_track_id("https://open.spotify.com/album/x"), "");
    }
}
