use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use futures_util::stream::{FuturesUnordered, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::error::EngineError;
use crate::http;
use crate::logbuf;

use super::cache::TtlCache;
use super::model::{
    AlbumInfo, AlbumResponse, ArtistAlbum, ArtistInfo, ArtistResponse, ArtistSummary,
    PlaylistInfo, PlaylistResponse, PlaylistSummary, SearchAllResult, TrackMetadata,
    TrackResponse,
};

const API_BASE: &str = "https://api.deezer.com";
const CACHE_TTL: Duration = Duration::from_secs(10 * 60);
const SEARCH_TTL: Duration = Duration::from_secs(5 * 60);
const MAX_PARALLEL_ISRC: usize = 10;
const MAX_RETRIES: u32 = 2;
const RETRY_DELAY: Duration = Duration::from_millis(500);

pub struct DeezerClient {
    http: Client,
    api_base: String,
    search_cache: TtlCache<String, SearchAllResult>,
    album_cache: TtlCache<String, AlbumResponse>,
    artist_cache: TtlCache<String, ArtistResponse>,
    isrc_cache: Mutex<HashMap<String, String>>,
}

pub fn client() -> &'static DeezerClient {
    static CLIENT: OnceLock<DeezerClient> = OnceLock::new();
    CLIENT.get_or_init(|| DeezerClient::new(http::shared_client().clone()))
}

// ---- wire shapes -----------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
struct DzArtist {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    picture: String,
    #[serde(default)]
    picture_medium: String,
    #[serde(default)]
    picture_big: String,
    #[serde(default)]
    picture_xl: String,
    #[serde(default)]
    nb_fan: u64,
}

impl DzArtist {
    fn best_picture(&self) -> String {
        [
            &self.picture_xl,
            &self.picture_big,
            &self.picture_medium,
            &self.picture,
        ]
        .iter()
        .find(|p| !p.is_empty())
        .map(|p| p.to_string())
        .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
struct DzAlbumSimple {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    cover: String,
    #[serde(default)]
    cover_medium: String,
    #[serde(default)]
    cover_big: String,
    #[serde(default)]
    cover_xl: String,
    #[serde(default)]
    release_date: String,
}

impl DzAlbumSimple {
    fn best_cover(&self) -> String {
        [&self.cover_xl, &self.cover_big, &self.cover_medium, &self.cover]
            .iter()
            .find(|p| !p.is_empty())
            .map(|p| p.to_string())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
struct DzTrack {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    duration: u64,
    #[serde(default)]
    track_position: u32,
    #[serde(default)]
    disk_number: u32,
    #[serde(default)]
    isrc: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    release_date: String,
    #[serde(default)]
    artist: DzArtist,
    #[serde(default)]
    album: DzAlbumSimple,
    #[serde(default)]
    contributors: Vec<DzArtist>,
}

#[derive(Debug, Clone, Deserialize)]
struct DzError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: i64,
}

fn convert_track(track: &DzTrack) -> TrackMetadata {
    let artists = if track.contributors.is_empty() {
        track.artist.name.clone()
    } else {
        track
            .contributors
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };

    let release_date = if track.release_date.is_empty() {
        track.album.release_date.clone()
    } else {
        track.release_date.clone()
    };

    TrackMetadata {
        // Deezer rows ride in the same shape with a tagged pseudo-ID.
        spotify_id: format!("deezer:{}", track.id),
        artists,
        name: track.title.clone(),
        album_name: track.album.title.clone(),
        album_artist: track.artist.name.clone(),
        duration_ms: track.duration * 1000,
        images: track.album.best_cover(),
        release_date,
        track_number: track.track_position,
        total_tracks: 0,
        disc_number: track.disk_number,
        external_url: track.link.clone(),
        isrc: track.isrc.clone(),
        album_id: if track.album.id > 0 {
            format!("deezer:{}", track.album.id)
        } else {
            String::new()
        },
        album_url: String::new(),
    }
}

fn is_retryable_text(err: &EngineError) -> bool {
    let text = err.to_string().to_ascii_lowercase();
    ["timeout", "connection reset", "connection refused", "eof", "status 5", "status 429"]
        .iter()
        .any(|p| text.contains(p))
}

impl DeezerClient {
    pub fn new(http: Client) -> Self {
        Self::with_base(http, API_BASE)
    }

    pub fn with_base(http: Client, api_base: &str) -> Self {
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            search_cache: TtlCache::new(SEARCH_TTL),
            album_cache: TtlCache::new(CACHE_TTL),
            artist_cache: TtlCache::new(CACHE_TTL),
            isrc_cache: Mutex::new(HashMap::new()),
        }
    }

    async fn do_get_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
    ) -> Result<T, EngineError> {
        let resp = self
            .http
            .get(endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(Duration::from_secs(25))
            .send()
            .await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(EngineError::Transport(format!(
                "deezer API returned status {}: {}",
                status.as_u16(),
                String::from_utf8_lossy(&body[..body.len().min(120)])
            )));
        }
        Ok(serde_json::from_slice(&body)?)
    }

    /// Deezer's edge is flaky on mobile networks; retry the known-transient
    /// failure shapes on top of the transport layer.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
    ) -> Result<T, EngineError> {
        let mut last_err = None;
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = RETRY_DELAY * (1 << (attempt - 1));
                logbuf::debug("Deezer", format!("retry {attempt}/{MAX_RETRIES} after {delay:?}"));
                tokio::time::sleep(delay).await;
            }
            match self.do_get_json(endpoint).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !is_retryable_text(&err) {
                        return Err(err);
                    }
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| EngineError::Transport("deezer request failed".to_string())))
    }

    pub async fn get_track(&self, track_id: &str) -> Result<TrackResponse, EngineError> {
        let track: DzTrack = self
            .get_json(&format!("{}/track/{track_id}", self.api_base))
            .await?;
        if track.id == 0 {
            return Err(EngineError::NotFound(format!("deezer track {track_id} not found")));
        }
        Ok(TrackResponse {
            track: convert_track(&track),
        })
    }

    /// Authoritative ISRC source. Cached for the process lifetime.
    pub async fn get_track_isrc(&self, track_id: &str) -> Result<String, EngineError> {
        if let Some(isrc) = self
            .isrc_cache
            .lock()
            .expect("deezer isrc cache")
            .get(track_id)
        {
            return Ok(isrc.clone());
        }
        let track: DzTrack = self
            .get_json(&format!("{}/track/{track_id}", self.api_base))
            .await?;
        if track.id == 0 {
            return Err(EngineError::NotFound(format!("deezer track {track_id} not found")));
        }
        self.isrc_cache
            .lock()
            .expect("deezer isrc cache")
            .insert(track_id.to_string(), track.isrc.clone());
        Ok(track.isrc)
    }

    pub async fn search_by_isrc(&self, isrc: &str) -> Result<TrackMetadata, EngineError> {
        let direct: Result<DzTrack, _> = self
            .get_json(&format!("{}/track/isrc:{isrc}", self.api_base))
            .await;
        if let Ok(track) = direct {
            if track.id != 0 {
                return Ok(convert_track(&track));
            }
        }

        #[derive(Deserialize)]
        struct SearchPage {
            #[serde(default)]
            data: Vec<DzTrack>,
        }
        let page: SearchPage = self
            .get_json(&format!(
                "{}/search/track?q=isrc:{isrc}&limit=1",
                self.api_base
            ))
            .await?;
        page.data
            .first()
            .map(convert_track)
            .ok_or_else(|| EngineError::NotFound(format!("no track found for ISRC: {isrc}")))
    }

    pub async fn search_all(
        &self,
        query: &str,
        track_limit: u32,
        artist_limit: u32,
        filter: &str,
    ) -> Result<SearchAllResult, EngineError> {
        let (track_limit, artist_limit, album_limit, playlist_limit) = match filter {
            "track" => (50, 0, 0, 0),
            "artist" => (0, 20, 0, 0),
            "album" => (0, 0, 20, 0),
            "playlist" => (0, 0, 0, 20),
            _ => (track_limit, artist_limit, 5, 5),
        };

        let cache_key =
            format!("all:{query}:{track_limit}:{artist_limit}:{album_limit}:{playlist_limit}:{filter}");
        if let Some(hit) = self.search_cache.get(&cache_key) {
            return Ok(hit);
        }

        let mut result = SearchAllResult::default();
        let encoded = urlencode(query);

        if track_limit > 0 {
            #[derive(Deserialize)]
            struct TrackPage {
                #[serde(default)]
                data: Vec<DzTrack>,
                #[serde(default)]
                error: Option<DzError>,
            }
            let page: TrackPage = self
                .get_json(&format!(
                    "{}/search/track?q={encoded}&limit={track_limit}",
                    self.api_base
                ))
                .await?;
            if let Some(err) = page.error {
                return Err(EngineError::Transport(format!(
                    "deezer API error: {} (code {})",
                    err.message, err.code
                )));
            }
            result.tracks = page.data.iter().map(convert_track).collect();
            result.total = result.tracks.len() as u32;
        }

        // Secondary entity searches are best-effort; track results alone are
        // still useful.
        if artist_limit > 0 {
            #[derive(Deserialize)]
            struct ArtistPage {
                #[serde(default)]
                data: Vec<DzArtist>,
            }
            match self
                .get_json::<ArtistPage>(&format!(
                    "{}/search/artist?q={encoded}&limit={artist_limit}",
                    self.api_base
                ))
                .await
            {
                Ok(page) => {
                    result.artists = page
                        .data
                        .iter()
                        .map(|a| ArtistSummary {
                            id: format!("deezer:{}", a.id),
                            name: a.name.clone(),
                            images: a.best_picture(),
                            fans: a.nb_fan,
                        })
                        .collect();
                }
                Err(err) => logbuf::debug("Deezer", format!("artist search failed: {err}")),
            }
        }

        if album_limit > 0 {
            #[derive(Deserialize, Default)]
            struct SearchAlbum {
                #[serde(flatten)]
                album: DzAlbumSimple,
                #[serde(default)]
                nb_tracks: u32,
                #[serde(default)]
                record_type: String,
                #[serde(default)]
                artist: DzArtist,
            }
            #[derive(Deserialize)]
            struct AlbumPage {
                #[serde(default)]
                data: Vec<SearchAlbum>,
            }
            match self
                .get_json::<AlbumPage>(&format!(
                    "{}/search/album?q={encoded}&limit={album_limit}",
                    self.api_base
                ))
                .await
            {
                Ok(page) => {
                    result.albums = page
                        .data
                        .iter()
                        .map(|a| ArtistAlbum {
                            id: format!("deezer:{}", a.album.id),
                            name: a.album.title.clone(),
                            release_date: a.album.release_date.clone(),
                            total_tracks: a.nb_tracks,
                            images: a.album.best_cover(),
                            album_type: if a.record_type == "compile" {
                                "compilation".to_string()
                            } else {
                                a.record_type.clone()
                            },
                            artists: a.artist.name.clone(),
                        })
                        .collect();
                }
                Err(err) => logbuf::debug("Deezer", format!("album search failed: {err}")),
            }
        }

        if playlist_limit > 0 {
            #[derive(Deserialize, Default)]
            struct SearchUser {
                #[serde(default)]
                name: String,
            }
            #[derive(Deserialize, Default)]
            struct SearchPlaylist {
                #[serde(default)]
                id: i64,
                #[serde(default)]
                title: String,
                #[serde(default)]
                picture: String,
                #[serde(default)]
                picture_medium: String,
                #[serde(default)]
                picture_big: String,
                #[serde(default)]
                picture_xl: String,
                #[serde(default)]
                nb_tracks: u32,
                #[serde(default)]
                user: SearchUser,
            }
            #[derive(Deserialize)]
            struct PlaylistPage {
                #[serde(default)]
                data: Vec<SearchPlaylist>,
            }
            match self
                .get_json::<PlaylistPage>(&format!(
                    "{}/search/playlist?q={encoded}&limit={playlist_limit}",
                    self.api_base
                ))
                .await
            {
                Ok(page) => {
                    result.playlists = page
                        .data
                        .iter()
                        .map(|p| PlaylistSummary {
                            id: format!("deezer:{}", p.id),
                            name: p.title.clone(),
                            owner: p.user.name.clone(),
                            images: [&p.picture_xl, &p.picture_big, &p.picture_medium, &p.picture]
                                .iter()
                                .find(|s| !s.is_empty())
                                .map(|s| s.to_string())
                                .unwrap_or_default(),
                            total_tracks: p.nb_tracks,
                        })
                        .collect();
                }
                Err(err) => logbuf::debug("Deezer", format!("playlist search failed: {err}")),
            }
        }

        self.search_cache.insert(cache_key, result.clone());
        Ok(result)
    }

    pub async fn get_album(&self, album_id: &str) -> Result<AlbumResponse, EngineError> {
        if let Some(hit) = self.album_cache.get(&album_id.to_string()) {
            return Ok(hit);
        }

        #[derive(Deserialize, Default)]
        struct Tracklist {
            #[serde(default)]
            data: Vec<DzTrack>,
            #[serde(default)]
            next: Option<String>,
        }
        #[derive(Deserialize)]
        struct AlbumFull {
            #[serde(default)]
            id: i64,
            #[serde(default)]
            title: String,
            #[serde(default)]
            cover: String,
            #[serde(default)]
            cover_medium: String,
            #[serde(default)]
            cover_big: String,
            #[serde(default)]
            cover_xl: String,
            #[serde(default)]
            release_date: String,
            #[serde(default)]
            nb_tracks: u32,
            #[serde(default)]
            artist: DzArtist,
            #[serde(default)]
            tracks: Tracklist,
        }

        let album: AlbumFull = self
            .get_json(&format!("{}/album/{album_id}", self.api_base))
            .await?;
        if album.id == 0 {
            return Err(EngineError::NotFound(format!("deezer album {album_id} not found")));
        }

        let mut tracks = album.tracks.data;
        let mut next = album.tracks.next.clone();
        while let Some(next_url) = next.take() {
            match self.get_json::<Tracklist>(&next_url).await {
                Ok(page) => {
                    tracks.extend(page.data);
                    next = page.next;
                }
                Err(err) => {
                    logbuf::warn("Deezer", format!("album page fetch failed: {err}"));
                    break;
                }
            }
            if tracks.len() as u32 >= album.nb_tracks {
                break;
            }
        }

        let cover = [&album.cover_xl, &album.cover_big, &album.cover_medium, &album.cover]
            .iter()
            .find(|p| !p.is_empty())
            .map(|p| p.to_string())
            .unwrap_or_default();

        // Album track lists omit per-track ISRC and cover; back-fill from the
        // per-track endpoint with a bounded fan-out.
        let isrcs = self.fetch_isrcs_parallel(&tracks).await;

        let track_list: Vec<TrackMetadata> = tracks
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let mut meta = convert_track(t);
                meta.album_name = album.title.clone();
                meta.album_artist = album.artist.name.clone();
                meta.total_tracks = album.nb_tracks;
                if meta.images.is_empty() {
                    meta.images = cover.clone();
                }
                if meta.release_date.is_empty() {
                    meta.release_date = album.release_date.clone();
                }
                if meta.track_number == 0 {
                    meta.track_number = (i + 1) as u32;
                }
                if meta.isrc.is_empty() {
                    if let Some(isrc) = isrcs.get(&t.id.to_string()) {
                        meta.isrc = isrc.clone();
                    }
                }
                meta
            })
            .collect();

        let response = AlbumResponse {
            album_info: AlbumInfo {
                total_tracks: album.nb_tracks,
                name: album.title,
                release_date: album.release_date,
                artists: album.artist.name,
                images: cover,
            },
            track_list,
        };
        self.album_cache.insert(album_id.to_string(), response.clone());
        Ok(response)
    }

    pub async fn get_playlist(&self, playlist_id: &str) -> Result<PlaylistResponse, EngineError> {
        #[derive(Deserialize, Default)]
        struct Tracklist {
            #[serde(default)]
            data: Vec<DzTrack>,
            #[serde(default)]
            next: Option<String>,
        }
        #[derive(Deserialize, Default)]
        struct Creator {
            #[serde(default)]
            name: String,
        }
        #[derive(Deserialize)]
        struct PlaylistFull {
            #[serde(default)]
            id: i64,
            #[serde(default)]
            title: String,
            #[serde(default)]
            picture_xl: String,
            #[serde(default)]
            picture_big: String,
            #[serde(default)]
            nb_tracks: u32,
            #[serde(default)]
            creator: Creator,
            #[serde(default)]
            tracks: Tracklist,
        }

        let playlist: PlaylistFull = self
            .get_json(&format!("{}/playlist/{playlist_id}", self.api_base))
            .await?;
        if playlist.id == 0 {
            return Err(EngineError::NotFound(format!(
                "deezer playlist {playlist_id} not found"
            )));
        }

        let mut tracks = playlist.tracks.data;
        let mut next = playlist.tracks.next.clone();
        while let Some(next_url) = next.take() {
            match self.get_json::<Tracklist>(&next_url).await {
                Ok(page) => {
                    tracks.extend(page.data);
                    next = page.next;
                }
                Err(err) => {
                    logbuf::warn("Deezer", format!("playlist page fetch failed: {err}"));
                    break;
                }
            }
        }

        let isrcs = self.fetch_isrcs_parallel(&tracks).await;
        let track_list: Vec<TrackMetadata> = tracks
            .iter()
            .map(|t| {
                let mut meta = convert_track(t);
                if meta.isrc.is_empty() {
                    if let Some(isrc) = isrcs.get(&t.id.to_string()) {
                        meta.isrc = isrc.clone();
                    }
                }
                meta
            })
            .collect();

        let mut info = PlaylistInfo::default();
        info.tracks.total = playlist.nb_tracks;
        info.owner.display_name = playlist.creator.name;
        info.owner.name = playlist.title;
        info.owner.images = if playlist.picture_xl.is_empty() {
            playlist.picture_big
        } else {
            playlist.picture_xl
        };

        Ok(PlaylistResponse {
            playlist_info: info,
            track_list,
        })
    }

    pub async fn get_artist(&self, artist_id: &str) -> Result<ArtistResponse, EngineError> {
        if let Some(hit) = self.artist_cache.get(&artist_id.to_string()) {
            return Ok(hit);
        }

        let artist: DzArtist = self
            .get_json(&format!("{}/artist/{artist_id}", self.api_base))
            .await?;
        if artist.id == 0 {
            return Err(EngineError::NotFound(format!("deezer artist {artist_id} not found")));
        }

        #[derive(Deserialize, Default)]
        struct AlbumItem {
            #[serde(flatten)]
            album: DzAlbumSimple,
            #[serde(default)]
            nb_tracks: u32,
            #[serde(default)]
            record_type: String,
        }
        #[derive(Deserialize, Default)]
        struct AlbumsPage {
            #[serde(default)]
            data: Vec<AlbumItem>,
            #[serde(default)]
            next: Option<String>,
        }

        let mut albums = Vec::new();
        let mut next = Some(format!("{}/artist/{artist_id}/albums?limit=50", self.api_base));
        while let Some(next_url) = next.take() {
            match self.get_json::<AlbumsPage>(&next_url).await {
                Ok(page) => {
                    for item in &page.data {
                        albums.push(ArtistAlbum {
                            id: format!("deezer:{}", item.album.id),
                            name: item.album.title.clone(),
                            release_date: item.album.release_date.clone(),
                            total_tracks: item.nb_tracks,
                            images: item.album.best_cover(),
                            album_type: if item.record_type == "compile" {
                                "compilation".to_string()
                            } else {
                                item.record_type.clone()
                            },
                            artists: artist.name.clone(),
                        });
                    }
                    next = page.next;
                }
                Err(err) => {
                    logbuf::warn("Deezer", format!("artist albums page failed: {err}"));
                    break;
                }
            }
            if albums.len() > 500 {
                break;
            }
        }

        let response = ArtistResponse {
            artist_info: ArtistInfo {
                id: format!("deezer:{}", artist.id),
                name: artist.name.clone(),
                images: artist.best_picture(),
                followers: artist.nb_fan,
                popularity: 0,
            },
            albums,
        };
        self.artist_cache
            .insert(artist_id.to_string(), response.clone());
        Ok(response)
    }

    async fn fetch_isrcs_parallel(&self, tracks: &[DzTrack]) -> HashMap<String, String> {
        let mut result = HashMap::with_capacity(tracks.len());
        let mut to_fetch = Vec::new();
        {
            let mut cache = self.isrc_cache.lock().expect("deezer isrc cache");
            for track in tracks {
                let id = track.id.to_string();
                if !track.isrc.is_empty() {
                    cache.entry(id.clone()).or_insert_with(|| track.isrc.clone());
                    result.insert(id, track.isrc.clone());
                } else if let Some(isrc) = cache.get(&id) {
                    result.insert(id, isrc.clone());
                } else {
                    to_fetch.push(id);
                }
            }
        }
        if to_fetch.is_empty() {
            return result;
        }

        let semaphore = Arc::new(Semaphore::new(MAX_PARALLEL_ISRC));
        let mut tasks = FuturesUnordered::new();
        for id in to_fetch {
            let semaphore = semaphore.clone();
            let endpoint = format!("{}/track/{id}", self.api_base);
            tasks.push(async move {
                let _permit = semaphore.acquire().await.ok()?;
                let track: DzTrack = self.get_json(&endpoint).await.ok()?;
                Some((id, track.isrc))
            });
        }
        while let Some(item) = tasks.next().await {
            if let Some((id, isrc)) = item {
                if !isrc.is_empty() {
                    self.isrc_cache
                        .lock()
                        .expect("deezer isrc cache")
                        .insert(id.clone(), isrc.clone());
                }
                result.insert(id, isrc);
            }
        }
        result
    }
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_track_joins_contributors() {
        let track = DzTrack {
            id: 3135556,
            title: "Harder, Better, Faster, Stronger".to_string(),
            duration: 224,
            isrc: "GBDUW0000059".to_string(),
            artist: DzArtist {
                id: 27,
                name: "Daft Punk".to_string(),
                ..Default::default()
            },
            contributors: vec![
                DzArtist { name: "Daft Punk".to_string(), ..Default::default() },
                DzArtist { name: "Someone".to_string(), ..Default::default() },
            ],
            album: DzAlbumSimple {
                id: 302127,
                title: "Discovery".to_string(),
                cover_xl: "https://cdn/xl.jpg".to_string(),
                cover: "https://cdn/s.jpg".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let meta = convert_track(&track);
        assert_eq!(meta.spotify_id, "deezer:3135556");
        assert_eq!(meta.artists, "Daft Punk, Someone");
        assert_eq!(meta.album_artist, "Daft Punk");
        assert_eq!(meta.duration_ms, 224_000);
        assert_eq!(meta.images, "https://cdn/xl.jpg");
        assert_eq!(meta.album_id, "deezer:302127");
    }
}
