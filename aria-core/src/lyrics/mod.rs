mod lrc;
pub mod model;
mod pax;
pub mod providers;

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock, RwLock};
use std::time::{Duration, Instant};

pub use lrc::{
    convert_to_lrc_with_metadata, ms_to_lrc_timestamp, ms_to_lrc_timestamp_inline,
    normalize_artist_name, parse_synced_lyrics, save_lrc_sidecar, simplify_track_name,
};
pub use model::{LyricsFetchOptions, LyricsLine, LyricsResponse, SyncType};
pub(crate) use pax::format_pax_lyrics_to_lrc;

use crate::error::EngineError;
use crate::logbuf;

pub const PROVIDER_LRCLIB: &str = "lrclib";
pub const PROVIDER_NETEASE: &str = "netease";
pub const PROVIDER_MUSIXMATCH: &str = "musixmatch";
pub const PROVIDER_APPLE: &str = "apple_music";
pub const PROVIDER_QQ: &str = "qqmusic";

/// Default cascade order. LRCLIB first (no proxy dependency).
pub const DEFAULT_PROVIDERS: [&str; 5] = [
    PROVIDER_LRCLIB,
    PROVIDER_MUSIXMATCH,
    PROVIDER_NETEASE,
    PROVIDER_APPLE,
    PROVIDER_QQ,
];

const CACHE_TTL: Duration = Duration::from_secs(24 * 3600);

fn provider_order() -> &'static RwLock<Vec<String>> {
    static ORDER: OnceLock<RwLock<Vec<String>>> = OnceLock::new();
    ORDER.get_or_init(|| RwLock::new(Vec::new()))
}

/// Set the ordered provider list; unknown names are dropped, an empty list
/// restores the defaults.
pub fn set_provider_order(providers: &[String]) {
    let valid: Vec<String> = providers
        .iter()
        .map(|p| p.trim().to_ascii_lowercase())
        .filter(|p| DEFAULT_PROVIDERS.contains(&p.as_str()))
        .collect();
    logbuf::info("Lyrics", format!("provider order set to: {valid:?}"));
    *provider_order().write().expect("lyrics provider order") = valid;
}

pub fn get_provider_order() -> Vec<String> {
    let order = provider_order().read().expect("lyrics provider order");
    if order.is_empty() {
        DEFAULT_PROVIDERS.iter().map(|s| s.to_string()).collect()
    } else {
        order.clone()
    }
}

fn fetch_options() -> &'static RwLock<LyricsFetchOptions> {
    static OPTS: OnceLock<RwLock<LyricsFetchOptions>> = OnceLock::new();
    OPTS.get_or_init(|| RwLock::new(LyricsFetchOptions::default()))
}

pub fn set_fetch_options(options: LyricsFetchOptions) {
    *fetch_options().write().expect("lyrics fetch options") = options.normalized();
}

pub fn get_fetch_options() -> LyricsFetchOptions {
    fetch_options().read().expect("lyrics fetch options").clone()
}

struct CacheEntry {
    response: LyricsResponse,
    stored_at: Instant,
}

fn cache() -> &'static Mutex<HashMap<String, CacheEntry>> {
    static CACHE: OnceLock<Mutex<HashMap<String, CacheEntry>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn cache_key(artist: &str, track: &str, duration_sec: f64) -> String {
    // Rounding duration to 10s buckets lets near-identical requests share.
    let rounded = (duration_sec / 10.0).round() * 10.0;
    format!(
        "{}|{}|{rounded:.0}",
        artist.trim().to_lowercase(),
        track.trim().to_lowercase()
    )
}

fn cache_get(artist: &str, track: &str, duration_sec: f64) -> Option<LyricsResponse> {
    let cache = cache().lock().expect("lyrics cache");
    let entry = cache.get(&cache_key(artist, track, duration_sec))?;
    if entry.stored_at.elapsed() >= CACHE_TTL {
        return None;
    }
    Some(entry.response.clone())
}

fn cache_put(artist: &str, track: &str, duration_sec: f64, response: &LyricsResponse) {
    cache().lock().expect("lyrics cache").insert(
        cache_key(artist, track, duration_sec),
        CacheEntry {
            response: response.clone(),
            stored_at: Instant::now(),
        },
    );
}

pub fn clear_cache() {
    cache().lock().expect("lyrics cache").clear();
}

fn has_usable_text(lyrics: &LyricsResponse) -> bool {
    if lyrics.instrumental {
        return true;
    }
    if !lyrics.plain_lyrics.trim().is_empty() {
        return true;
    }
    lyrics.lines.iter().any(|l| !l.words.trim().is_empty())
}

/// Ordered source cascade. Sources are tried serially to respect their rate
/// limits and the configured preference order; the first usable result wins
/// and is cached for a day.
pub async fn fetch_lyrics(
    track_name: &str,
    artist_name: &str,
    duration_sec: f64,
) -> Result<LyricsResponse, EngineError> {
    if let Some(mut cached) = cache_get(artist_name, track_name, duration_sec) {
        logbuf::debug("Lyrics", format!("cache hit for {artist_name} - {track_name}"));
        cached.source = format!("{} (cached)", cached.source);
        return Ok(cached);
    }

    let options = get_fetch_options();
    let primary_artist = normalize_artist_name(artist_name);
    let simplified_track = simplify_track_name(track_name);
    let order = get_provider_order();

    logbuf::debug(
        "Lyrics",
        format!("searching for {artist_name} - {track_name} (providers: {order:?})"),
    );

    for provider in &order {
        let result = match provider.as_str() {
            PROVIDER_LRCLIB => {
                providers::lrclib::LrclibClient::new()
                    .fetch(&primary_artist, artist_name, track_name, &simplified_track, duration_sec)
                    .await
            }
            PROVIDER_NETEASE => {
                let client = providers::netease::NeteaseClient::new();
                let mut result = client
                    .fetch_lyrics(track_name, &primary_artist, &options)
                    .await;
                if result.is_err() && primary_artist != artist_name {
                    result = client.fetch_lyrics(track_name, artist_name, &options).await;
                }
                if result.is_err() && simplified_track != track_name {
                    result = client
                        .fetch_lyrics(&simplified_track, &primary_artist, &options)
                        .await;
                }
                result
            }
            PROVIDER_MUSIXMATCH => {
                let client = providers::musixmatch::MusixmatchClient::new();
                let mut result = client
                    .fetch_lyrics(track_name, &primary_artist, &options.musixmatch_language)
                    .await;
                if result.is_err() && primary_artist != artist_name {
                    result = client
                        .fetch_lyrics(track_name, artist_name, &options.musixmatch_language)
                        .await;
                }
                result
            }
            PROVIDER_APPLE => {
                let client = providers::apple::AppleMusicClient::new();
                let mut result = client
                    .fetch_lyrics(track_name, &primary_artist, options.multi_person_word_by_word)
                    .await;
                if result.is_err() && primary_artist != artist_name {
                    result = client
                        .fetch_lyrics(track_name, artist_name, options.multi_person_word_by_word)
                        .await;
                }
                result
            }
            PROVIDER_QQ => {
                let client = providers::qq::QqMusicClient::new();
                let mut result = client
                    .fetch_lyrics(track_name, &primary_artist, options.multi_person_word_by_word)
                    .await;
                if result.is_err() && primary_artist != artist_name {
                    result = client
                        .fetch_lyrics(track_name, artist_name, options.multi_person_word_by_word)
                        .await;
                }
                result
            }
            unknown => {
                logbuf::debug("Lyrics", format!("unknown provider: {unknown}, skipping"));
                continue;
            }
        };

        match result {
            Ok(lyrics) if has_usable_text(&lyrics) => {
                logbuf::info("Lyrics", format!("got lyrics from: {provider}"));
                cache_put(artist_name, track_name, duration_sec, &lyrics);
                return Ok(lyrics);
            }
            Ok(_) => {}
            Err(err) => {
                logbuf::debug("Lyrics", format!("provider {provider} failed: {err}"));
            }
        }
    }

    Err(EngineError::NotFound(
        "lyrics not found from any source".to_string(),
    ))
}
