use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use futures_util::stream::{FuturesUnordered, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::error::EngineError;
use crate::http;
use crate::logbuf;

use super::cache::TtlCache;
use super::model::{
    AlbumInfo, AlbumResponse, ArtistAlbum, ArtistInfo, ArtistResponse, PlaylistInfo,
    PlaylistResponse, SearchAllResult, TrackMetadata, TrackResponse,
};

const SEARCH_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const ENTITY_CACHE_TTL: Duration = Duration::from_secs(10 * 60);
const MAX_PARALLEL_ISRC: usize = 10;
const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_BASE: &str = "https://api.spotify.com/v1";

#[derive(Debug, Clone, Default)]
struct Credentials {
    client_id: String,
    client_secret: String,
}

#[derive(Debug, Clone, Default)]
struct CachedToken {
    token: String,
    expires_at: Option<Instant>,
}

pub struct SpotifyClient {
    http: Client,
    token_url: String,
    api_base: String,
    credentials: Mutex<Credentials>,
    // Token refresh is serialised separately from the data caches.
    token: tokio::sync::Mutex<CachedToken>,
    search_cache: TtlCache<String, SearchAllResult>,
    track_cache: TtlCache<String, TrackResponse>,
    album_cache: TtlCache<String, AlbumResponse>,
    artist_cache: TtlCache<String, ArtistResponse>,
    isrc_cache: Mutex<HashMap<String, String>>,
}

pub fn client() -> &'static SpotifyClient {
    static CLIENT: OnceLock<SpotifyClient> = OnceLock::new();
    CLIENT.get_or_init(|| SpotifyClient::new(http::shared_client().clone()))
}

/// Host-provided client-credentials pair for the process-wide client.
pub fn set_credentials(client_id: &str, client_secret: &str) {
    client().configure(client_id, client_secret);
}

// ---- wire shapes -----------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
struct Image {
    url: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ExternalUrl {
    #[serde(default)]
    spotify: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ExternalId {
    #[serde(default)]
    isrc: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ArtistRef {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct AlbumRef {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    release_date: String,
    #[serde(default)]
    total_tracks: u32,
    #[serde(default)]
    images: Vec<Image>,
    #[serde(default)]
    external_urls: ExternalUrl,
    #[serde(default)]
    artists: Vec<ArtistRef>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct TrackFull {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    duration_ms: u64,
    #[serde(default)]
    track_number: u32,
    #[serde(default)]
    disc_number: u32,
    #[serde(default)]
    external_urls: ExternalUrl,
    #[serde(default)]
    external_ids: ExternalId,
    #[serde(default)]
    album: AlbumRef,
    #[serde(default)]
    artists: Vec<ArtistRef>,
}

fn join_artists(artists: &[ArtistRef]) -> String {
    artists
        .iter()
        .map(|a| a.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn first_image(images: &[Image]) -> String {
    images.first().map(|i| i.url.clone()).unwrap_or_default()
}

fn track_metadata(t: &TrackFull) -> TrackMetadata {
    TrackMetadata {
        spotify_id: t.id.clone(),
        artists: join_artists(&t.artists),
        name: t.name.clone(),
        album_name: t.album.name.clone(),
        album_artist: join_artists(&t.album.artists),
        duration_ms: t.duration_ms,
        images: first_image(&t.album.images),
        release_date: t.album.release_date.clone(),
        track_number: t.track_number,
        total_tracks: t.album.total_tracks,
        disc_number: t.disc_number,
        external_url: t.external_urls.spotify.clone(),
        isrc: t.external_ids.isrc.clone(),
        album_id: t.album.id.clone(),
        album_url: t.album.external_urls.spotify.clone(),
    }
}

impl SpotifyClient {
    pub fn new(http: Client) -> Self {
        Self::with_base(http, TOKEN_URL, API_BASE)
    }

    pub fn with_base(http: Client, token_url: &str, api_base: &str) -> Self {
        Self {
            http,
            token_url: token_url.trim_end_matches('/').to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            credentials: Mutex::new(Credentials::default()),
            token: tokio::sync::Mutex::new(CachedToken::default()),
            search_cache: TtlCache::new(SEARCH_CACHE_TTL),
            track_cache: TtlCache::new(ENTITY_CACHE_TTL),
            album_cache: TtlCache::new(ENTITY_CACHE_TTL),
            artist_cache: TtlCache::new(ENTITY_CACHE_TTL),
            isrc_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn configure(&self, client_id: &str, client_secret: &str) {
        let mut creds = self.credentials.lock().expect("spotify credentials");
        creds.client_id = client_id.trim().to_string();
        creds.client_secret = client_secret.trim().to_string();
        logbuf::info("Spotify", "credentials configured");
    }

    pub fn has_credentials(&self) -> bool {
        let creds = self.credentials.lock().expect("spotify credentials");
        !creds.client_id.is_empty() && !creds.client_secret.is_empty()
    }

    async fn access_token(&self) -> Result<String, EngineError> {
        let creds = {
            let locked = self.credentials.lock().expect("spotify credentials");
            if locked.client_id.is_empty() || locked.client_secret.is_empty() {
                return Err(EngineError::NoCredentials(
                    "set Spotify client ID and secret in settings".to_string(),
                ));
            }
            locked.clone()
        };

        let mut cached = self.token.lock().await;
        if let Some(expires_at) = cached.expires_at {
            // Refresh one minute before the declared expiry.
            if !cached.token.is_empty() && Instant::now() + Duration::from_secs(60) < expires_at {
                return Ok(cached.token.clone());
            }
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            #[serde(default)]
            expires_in: Option<serde_json::Value>,
        }

        let resp = self
            .http
            .post(&self.token_url)
            .basic_auth(&creds.client_id, Some(&creds.client_secret))
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
            .timeout(Duration::from_secs(15))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(EngineError::Transport(format!(
                "failed to get access token: HTTP {}",
                resp.status().as_u16()
            )));
        }

        let token: TokenResponse = resp.json().await?;
        let expires_secs = token
            .expires_in
            .as_ref()
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .unwrap_or(3600);
        cached.token = token.access_token.clone();
        cached.expires_at = Some(Instant::now() + Duration::from_secs(expires_secs));
        Ok(token.access_token)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        token: &str,
    ) -> Result<T, EngineError> {
        let resp = self
            .http
            .get(endpoint)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(Duration::from_secs(15))
            .send()
            .await?;
        let status = resp.status();
        if status.as_u16() == 404 {
            return Err(EngineError::NotFound("spotify entity not found".to_string()));
        }
        if !status.is_success() {
            return Err(EngineError::Transport(format!(
                "spotify API returned status {}",
                status.as_u16()
            )));
        }
        Ok(resp.json().await?)
    }

    pub async fn get_track(&self, track_id: &str) -> Result<TrackResponse, EngineError> {
        if let Some(hit) = self.track_cache.get(&track_id.to_string()) {
            return Ok(hit);
        }
        let token = self.access_token().await?;
        let data: TrackFull = self
            .get_json(&format!("{}/tracks/{track_id}", self.api_base), &token)
            .await?;
        let response = TrackResponse {
            track: track_metadata(&data),
        };
        self.track_cache.insert(track_id.to_string(), response.clone());
        Ok(response)
    }

    pub async fn search_tracks(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<SearchAllResult, EngineError> {
        let cache_key = format!("{query}|{limit}");
        if let Some(hit) = self.search_cache.get(&cache_key) {
            return Ok(hit);
        }

        let token = self.access_token().await?;

        #[derive(Deserialize)]
        struct SearchTracks {
            #[serde(default)]
            items: Vec<TrackFull>,
            #[serde(default)]
            total: u32,
        }
        #[derive(Deserialize)]
        struct SearchResponse {
            tracks: SearchTracks,
        }

        let endpoint = format!(
            "{}/search?q={}&type=track&limit={limit}",
            self.api_base,
            urlencode(query)
        );
        let data: SearchResponse = self.get_json(&endpoint, &token).await?;

        let result = SearchAllResult {
            tracks: data.tracks.items.iter().map(track_metadata).collect(),
            total: data.tracks.total,
            ..Default::default()
        };
        self.search_cache.insert(cache_key, result.clone());
        Ok(result)
    }

    /// Exact-ISRC lookup through the `isrc:` search filter.
    pub async fn search_by_isrc(&self, isrc: &str) -> Result<TrackMetadata, EngineError> {
        let isrc = isrc.trim().to_uppercase();
        if isrc.is_empty() {
            return Err(EngineError::InvalidRequest("empty ISRC".to_string()));
        }
        let result = self.search_tracks(&format!("isrc:{isrc}"), 5).await?;
        result
            .tracks
            .into_iter()
            .find(|t| t.isrc.eq_ignore_ascii_case(&isrc))
            .ok_or_else(|| {
                EngineError::NotFound(format!("no spotify track found for ISRC {isrc}"))
            })
    }

    pub async fn get_album(&self, album_id: &str) -> Result<AlbumResponse, EngineError> {
        if let Some(hit) = self.album_cache.get(&album_id.to_string()) {
            return Ok(hit);
        }

        let token = self.access_token().await?;

        #[derive(Deserialize, Default)]
        struct AlbumTrackItem {
            #[serde(default)]
            id: String,
            #[serde(default)]
            name: String,
            #[serde(default)]
            duration_ms: u64,
            #[serde(default)]
            track_number: u32,
            #[serde(default)]
            disc_number: u32,
            #[serde(default)]
            external_urls: ExternalUrl,
            #[serde(default)]
            artists: Vec<ArtistRef>,
        }
        #[derive(Deserialize, Default)]
        struct AlbumTracksPage {
            #[serde(default)]
            items: Vec<AlbumTrackItem>,
            #[serde(default)]
            next: Option<String>,
        }
        #[derive(Deserialize)]
        struct AlbumData {
            #[serde(default)]
            name: String,
            #[serde(default)]
            release_date: String,
            #[serde(default)]
            total_tracks: u32,
            #[serde(default)]
            images: Vec<Image>,
            #[serde(default)]
            artists: Vec<ArtistRef>,
            #[serde(default)]
            tracks: AlbumTracksPage,
        }

        let data: AlbumData = self
            .get_json(&format!("{}/albums/{album_id}", self.api_base), &token)
            .await?;

        let mut items = data.tracks.items;
        let mut next = data.tracks.next.clone();
        // Long albums page past 50 tracks; a page failure keeps what we have.
        while let Some(next_url) = next.take() {
            match self.get_json::<AlbumTracksPage>(&next_url, &token).await {
                Ok(page) => {
                    items.extend(page.items);
                    next = page.next;
                }
                Err(err) => {
                    logbuf::warn("Spotify", format!("album page fetch failed: {err}"));
                    break;
                }
            }
            if items.len() as u32 >= data.total_tracks {
                break;
            }
        }

        let album_image = first_image(&data.images);
        let album_artist = join_artists(&data.artists);
        let info = AlbumInfo {
            total_tracks: data.total_tracks,
            name: data.name.clone(),
            release_date: data.release_date.clone(),
            artists: album_artist.clone(),
            images: album_image.clone(),
        };

        let mut tracks: Vec<TrackMetadata> = items
            .iter()
            .map(|item| TrackMetadata {
                spotify_id: item.id.clone(),
                artists: join_artists(&item.artists),
                name: item.name.clone(),
                album_name: data.name.clone(),
                album_artist: album_artist.clone(),
                duration_ms: item.duration_ms,
                images: album_image.clone(),
                release_date: data.release_date.clone(),
                track_number: item.track_number,
                total_tracks: data.total_tracks,
                disc_number: item.disc_number,
                external_url: item.external_urls.spotify.clone(),
                isrc: String::new(),
                album_id: album_id.to_string(),
                album_url: String::new(),
            })
            .collect();

        // Simplified album tracks carry no ISRC; back-fill in parallel.
        let ids: Vec<String> = tracks.iter().map(|t| t.spotify_id.clone()).collect();
        let isrcs = self.fetch_isrcs_parallel(&token, &ids).await;
        for track in &mut tracks {
            if let Some(isrc) = isrcs.get(&track.spotify_id) {
                track.isrc = isrc.clone();
            }
        }

        let response = AlbumResponse {
            album_info: info,
            track_list: tracks,
        };
        self.album_cache.insert(album_id.to_string(), response.clone());
        Ok(response)
    }

    pub async fn get_playlist(&self, playlist_id: &str) -> Result<PlaylistResponse, EngineError> {
        let token = self.access_token().await?;

        #[derive(Deserialize, Default)]
        struct PlaylistItem {
            #[serde(default)]
            track: Option<TrackFull>,
        }
        #[derive(Deserialize, Default)]
        struct PlaylistTracksPage {
            #[serde(default)]
            items: Vec<PlaylistItem>,
            #[serde(default)]
            next: Option<String>,
            #[serde(default)]
            total: u32,
        }
        #[derive(Deserialize)]
        struct PlaylistData {
            #[serde(default)]
            name: String,
            #[serde(default)]
            images: Vec<Image>,
            #[serde(default)]
            owner: OwnerData,
            #[serde(default)]
            tracks: PlaylistTracksPage,
        }
        #[derive(Deserialize, Default)]
        struct OwnerData {
            #[serde(default)]
            display_name: String,
        }

        let data: PlaylistData = self
            .get_json(&format!("{}/playlists/{playlist_id}", self.api_base), &token)
            .await?;

        let mut items = data.tracks.items;
        let mut next = data.tracks.next.clone();
        while let Some(next_url) = next.take() {
            match self.get_json::<PlaylistTracksPage>(&next_url, &token).await {
                Ok(page) => {
                    items.extend(page.items);
                    next = page.next;
                }
                Err(err) => {
                    logbuf::warn("Spotify", format!("playlist page fetch failed: {err}"));
                    break;
                }
            }
        }

        let mut info = PlaylistInfo::default();
        info.tracks.total = data.tracks.total;
        info.owner.display_name = data.owner.display_name;
        info.owner.name = data.name;
        info.owner.images = first_image(&data.images);

        let track_list = items
            .iter()
            .filter_map(|i| i.track.as_ref())
            .map(track_metadata)
            .collect();

        Ok(PlaylistResponse {
            playlist_info: info,
            track_list,
        })
    }

    pub async fn get_artist(&self, artist_id: &str) -> Result<ArtistResponse, EngineError> {
        if let Some(hit) = self.artist_cache.get(&artist_id.to_string()) {
            return Ok(hit);
        }

        let token = self.access_token().await?;

        #[derive(Deserialize, Default)]
        struct Followers {
            #[serde(default)]
            total: u64,
        }
        #[derive(Deserialize)]
        struct ArtistData {
            #[serde(default)]
            id: String,
            #[serde(default)]
            name: String,
            #[serde(default)]
            images: Vec<Image>,
            #[serde(default)]
            followers: Followers,
            #[serde(default)]
            popularity: u32,
        }

        let data: ArtistData = self
            .get_json(&format!("{}/artists/{artist_id}", self.api_base), &token)
            .await?;
        let artist_info = ArtistInfo {
            id: data.id,
            name: data.name,
            images: first_image(&data.images),
            followers: data.followers.total,
            popularity: data.popularity,
        };

        #[derive(Deserialize, Default)]
        struct AlbumsPage {
            #[serde(default)]
            items: Vec<AlbumRef>,
            #[serde(default)]
            next: Option<String>,
        }
        #[derive(Deserialize, Default)]
        struct AlbumItemExt {
            #[serde(default)]
            album_type: String,
        }

        let mut albums = Vec::new();
        let mut offset = 0u32;
        let limit = 50u32;
        loop {
            let endpoint = format!(
                "{}/artists/{artist_id}/albums?include_groups=album,single,compilation&limit={limit}&offset={offset}",
                self.api_base
            );
            // album_type rides alongside the simplified album shape.
            let raw: serde_json::Value = self.get_json(&endpoint, &token).await?;
            let page: AlbumsPage = serde_json::from_value(raw.clone())?;
            let types: Vec<AlbumItemExt> = raw
                .get("items")
                .cloned()
                .map(|v| serde_json::from_value::<Vec<AlbumItemExt>>(v).unwrap_or_default())
                .unwrap_or_default();

            let item_count = page.items.len();
            for (i, album) in page.items.into_iter().enumerate() {
                albums.push(ArtistAlbum {
                    id: album.id,
                    name: album.name,
                    release_date: album.release_date,
                    total_tracks: album.total_tracks,
                    images: first_image(&album.images),
                    album_type: types.get(i).map(|t| t.album_type.clone()).unwrap_or_default(),
                    artists: join_artists(&album.artists),
                });
            }

            if page.next.is_none() || (item_count as u32) < limit {
                break;
            }
            offset += limit;
            if offset > 500 {
                break;
            }
        }

        let response = ArtistResponse {
            artist_info,
            albums,
        };
        self.artist_cache
            .insert(artist_id.to_string(), response.clone());
        Ok(response)
    }

    /// Bounded fan-out for per-track ISRC fetches; already-seen tracks come
    /// from the process-lifetime ISRC cache.
    async fn fetch_isrcs_parallel(
        &self,
        token: &str,
        track_ids: &[String],
    ) -> HashMap<String, String> {
        let mut result = HashMap::with_capacity(track_ids.len());
        let mut to_fetch = Vec::new();
        {
            let cache = self.isrc_cache.lock().expect("isrc cache");
            for id in track_ids {
                if id.is_empty() {
                    continue;
                }
                match cache.get(id) {
                    Some(isrc) => {
                        result.insert(id.clone(), isrc.clone());
                    }
                    None => to_fetch.push(id.clone()),
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
            let endpoint = format!("{}/tracks/{id}", self.api_base);
            let token = token.to_string();
            tasks.push(async move {
                let _permit = semaphore.acquire().await.ok()?;
                let data: TrackFull = self.get_json(&endpoint, &token).await.ok()?;
                Some((id, data.external_ids.isrc))
            });
        }

        while let Some(item) = tasks.next().await {
            if let Some((id, isrc)) = item {
                if !isrc.is_empty() {
                    self.isrc_cache
                        .lock()
                        .expect("isrc cache")
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
