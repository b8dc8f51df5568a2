//! Shared catalog shapes. Both metadata clients (Spotify and Deezer) expose
//! results in this one form so the host renders them uniformly; Deezer rows
//! carry a `deezer:<id>` pseudo-ID in `spotify_id`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackMetadata {
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub spotify_id: String,
    /// Artist list joined with ", " for scalar exposure.
    pub artists: String,
    pub name: String,
    pub album_name: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub album_artist: String,
    pub duration_ms: u64,
    pub images: String,
    /// Carries the source granularity: YYYY, YYYY-MM or YYYY-MM-DD.
    pub release_date: String,
    pub track_number: u32,
    #[serde(skip_serializing_if = "is_zero", default)]
    pub total_tracks: u32,
    #[serde(skip_serializing_if = "is_zero", default)]
    pub disc_number: u32,
    #[serde(rename = "external_urls")]
    pub external_url: String,
    pub isrc: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub album_id: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub album_url: String,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackResponse {
    pub track: TrackMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlbumInfo {
    pub total_tracks: u32,
    pub name: String,
    pub release_date: String,
    pub artists: String,
    pub images: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlbumResponse {
    pub album_info: AlbumInfo,
    pub track_list: Vec<TrackMetadata>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaylistOwner {
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub display_name: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub images: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaylistTracksTotal {
    pub total: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaylistInfo {
    pub tracks: PlaylistTracksTotal,
    pub owner: PlaylistOwner,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistResponse {
    pub playlist_info: PlaylistInfo,
    pub track_list: Vec<TrackMetadata>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtistInfo {
    pub id: String,
    pub name: String,
    pub images: String,
    pub followers: u64,
    pub popularity: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtistAlbum {
    pub id: String,
    pub name: String,
    pub release_date: String,
    pub total_tracks: u32,
    pub images: String,
    /// album, single, compilation
    pub album_type: String,
    pub artists: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtistResponse {
    pub artist_info: ArtistInfo,
    pub albums: Vec<ArtistAlbum>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtistSummary {
    pub id: String,
    pub name: String,
    pub images: String,
    #[serde(skip_serializing_if = "is_zero_u64", default)]
    pub fans: u64,
}

fn is_zero_u64(n: &u64) -> bool {
    *n == 0
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaylistSummary {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub images: String,
    pub total_tracks: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchAllResult {
    pub tracks: Vec<TrackMetadata>,
    pub artists: Vec<ArtistSummary>,
    pub albums: Vec<ArtistAlbum>,
    pub playlists: Vec<PlaylistSummary>,
    pub total: u32,
}

/// The whole-entity response for `get_metadata(url)`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MetadataResponse {
    Track(TrackResponse),
    Album(AlbumResponse),
    Playlist(PlaylistResponse),
    Artist(ArtistResponse),
}
