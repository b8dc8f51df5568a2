//! C ABI for the engine. Every function takes and returns JSON as C strings;
//! returned pointers are freed with `aria_string_free`. A null return means
//! failure, with details in `aria_last_error_json`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::path::Path;
use std::ptr;
use std::sync::OnceLock;

use libc::c_char;

use aria_core::catalog::{self, deezer, spotify};
use aria_core::extensions;
use aria_core::jobs;
use aria_core::library;
use aria_core::logbuf;
use aria_core::lyrics;
use aria_core::matching;
use aria_core::pipeline::{self, DownloadRequest as CoreRequest};
use aria_core::resolve::SongLinkClient;
use aria_core::EngineError;
use aria_proto::{
    DownloadRequest, DownloadResponse, DuplicateCheckResult, ExtensionDirectories,
    ExtensionInfo, ItemProgress, LegacyProgress, LogEntry, LogsPage, LyricsOptions,
    MultiProgress, OkReply, ParsedUrl, PendingAuth, SpotifyCredentials, StreamResponse,
    TrackExistence, UpgradeCheck,
};

const API_VERSION: u32 = 1;

fn ensure_rustls_provider() {
    static ONCE: OnceLock<()> = OnceLock::new();
    ONCE.get_or_init(|| {
        // In some dependency graphs multiple rustls CryptoProviders can be
        // enabled; picking one avoids runtime panics.
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(message: impl Into<String>, context: Option<String>) {
    #[derive(serde::Serialize)]
    struct ErrJson {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    }
    let err = ErrJson {
        message: message.into(),
        context,
    };
    let s = serde_json::to_string(&err).unwrap_or_else(|_| "{\"message\":\"error\"}".to_string());
    let c = CString::new(s).unwrap_or_else(|_| CString::new("{\"message\":\"error\"}").unwrap());
    LAST_ERROR.with(|e| *e.borrow_mut() = Some(c));
}

fn take_last_error() -> Option<CString> {
    LAST_ERROR.with(|e| e.borrow_mut().take())
}

fn ok_json(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(c) => c.into_raw(),
        Err(_) => {
            set_last_error("invalid utf-8/embedded NUL", None);
            ptr::null_mut()
        }
    }
}

fn require_cstr<'a>(p: *const c_char, name: &'static str) -> Result<&'a str, ()> {
    if p.is_null() {
        set_last_error(format!("{name} is null"), None);
        return Err(());
    }
    let s = unsafe { CStr::from_ptr(p) };
    match s.to_str() {
        Ok(v) => Ok(v),
        Err(_) => {
            set_last_error(format!("{name} is not valid utf-8"), None);
            Err(())
        }
    }
}

fn runtime() -> &'static tokio::runtime::Runtime {
    static RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
    RT.get_or_init(|| {
        ensure_rustls_provider();
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("tokio runtime")
    })
}

fn serialize<T: serde::Serialize>(value: &T, what: &'static str) -> Result<String, ()> {
    serde_json::to_string(value).map_err(|e| {
        set_last_error(format!("failed to serialize {what}"), Some(e.to_string()));
    })
}

/// Wrap one entry point: panic containment, JSON out, null on failure.
fn entry<F>(name: &'static str, body: F) -> *mut c_char
where
    F: FnOnce() -> Result<String, ()> + std::panic::UnwindSafe,
{
    match std::panic::catch_unwind(body) {
        Ok(Ok(s)) => ok_json(s),
        Ok(Err(())) => ptr::null_mut(),
        Err(_) => {
            set_last_error(format!("panic in {name}"), None);
            ptr::null_mut()
        }
    }
}

// -----------------------------
// Request/response mapping
// -----------------------------

fn map_request_to_core(req: DownloadRequest) -> CoreRequest {
    CoreRequest {
        isrc: req.isrc,
        service: req.service,
        spotify_id: req.spotify_id,
        deezer_id: req.deezer_id,
        tidal_id: req.tidal_id,
        qobuz_id: req.qobuz_id,
        track_name: req.track_name,
        artist_name: req.artist_name,
        album_name: req.album_name,
        album_artist: req.album_artist,
        cover_url: req.cover_url,
        output_dir: req.output_dir,
        output_path: req.output_path,
        output_fd: req.output_fd,
        filename_format: req.filename_format,
        quality: req.quality,
        item_id: req.item_id,
        source: req.source,
        use_extensions: req.use_extensions,
        use_fallback: req.use_fallback,
        embed_lyrics: req.embed_lyrics,
        embed_max_quality_cover: req.embed_max_quality_cover,
        convert_lyrics_to_romaji: req.convert_lyrics_to_romaji,
        save_lrc_file: req.save_lrc_file,
        track_number: req.track_number,
        disc_number: req.disc_number,
        total_tracks: req.total_tracks,
        release_date: req.release_date,
        duration_ms: req.duration_ms,
    }
}

fn download_response(result: Result<pipeline::DownloadOutcome, EngineError>) -> DownloadResponse {
    match result {
        Ok(outcome) => DownloadResponse {
            success: true,
            message: if outcome.already_exists {
                "file already exists".to_string()
            } else {
                String::new()
            },
            file_path: outcome.file_path,
            already_exists: outcome.already_exists,
            service: outcome.service,
            ..Default::default()
        },
        Err(err) => DownloadResponse {
            success: false,
            error: err.to_string(),
            error_type: err.error_type().to_string(),
            ..Default::default()
        },
    }
}

fn stream_response(result: Result<pipeline::StreamOutcome, EngineError>) -> StreamResponse {
    match result {
        Ok(outcome) => StreamResponse {
            success: true,
            service: outcome.service,
            stream_url: outcome.stream_url,
            format: outcome.format,
            bit_depth: outcome.bit_depth,
            sample_rate: outcome.sample_rate,
            bitrate: outcome.bitrate,
            requires_decryption: outcome.requires_decryption,
            decryption_key: outcome.decryption_key,
            ..Default::default()
        },
        Err(err) => StreamResponse {
            success: false,
            error: err.to_string(),
            error_type: err.error_type().to_string(),
            ..Default::default()
        },
    }
}

fn map_item_progress(p: jobs::ItemProgress) -> ItemProgress {
    ItemProgress {
        item_id: p.item_id,
        bytes_total: p.bytes_total,
        bytes_received: p.bytes_received,
        progress: p.progress,
        speed_mbps: p.speed_mbps,
        is_downloading: p.is_downloading,
        status: p.status,
    }
}

fn map_extension_info(info: extensions::ExtensionInfo) -> ExtensionInfo {
    ExtensionInfo {
        name: info.name,
        display_name: info.display_name,
        version: info.version,
        author: info.author,
        description: info.description,
        types: info
            .types
            .iter()
            .filter_map(|t| serde_json::to_value(t).ok())
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        enabled: info.enabled,
        loaded: info.loaded,
        quality_options: info.quality_options,
    }
}

// -----------------------------
// URL parsing and metadata
// -----------------------------

#[unsafe(no_mangle)]
pub extern "C" fn aria_parse_url(url_utf8: *const c_char) -> *mut c_char {
    entry("aria_parse_url", || {
        let url = require_cstr(url_utf8, "url_utf8")?;
        let parsed = catalog::parse_spotify_uri(url)
            .or_else(|_| catalog::parse_deezer_url(url))
            .map_err(|e| {
                set_last_error("unrecognized URL", Some(e.to_string()));
            })?;
        serialize(
            &ParsedUrl {
                entity_type: parsed.entity_type,
                id: parsed.id,
            },
            "parsed url",
        )
    })
}

fn metadata_json(url: &str) -> Result<String, EngineError> {
    use aria_core::catalog::model::MetadataResponse;

    if let Ok(parsed) = catalog::parse_spotify_uri(url) {
        let client = spotify::client();
        return runtime().block_on(async {
            let json = match parsed.entity_type.as_str() {
                "track" => {
                    serde_json::to_string(&MetadataResponse::Track(client.get_track(&parsed.id).await?))?
                }
                "album" => {
                    serde_json::to_string(&MetadataResponse::Album(client.get_album(&parsed.id).await?))?
                }
                "playlist" => serde_json::to_string(&MetadataResponse::Playlist(
                    client.get_playlist(&parsed.id).await?,
                ))?,
                "artist" => serde_json::to_string(&MetadataResponse::Artist(
                    client.get_artist(&parsed.id).await?,
                ))?,
                other => {
                    return Err(EngineError::InvalidRequest(format!(
                        "unsupported spotify entity: {other}"
                    )));
                }
            };
            Ok(json)
        });
    }

    let parsed = catalog::parse_deezer_url(url)?;
    let client = deezer::client();
    runtime().block_on(async {
        let json = match parsed.entity_type.as_str() {
            "track" => {
                serde_json::to_string(&MetadataResponse::Track(client.get_track(&parsed.id).await?))?
            }
            "album" => {
                serde_json::to_string(&MetadataResponse::Album(client.get_album(&parsed.id).await?))?
            }
            "playlist" => serde_json::to_string(&MetadataResponse::Playlist(
                client.get_playlist(&parsed.id).await?,
            ))?,
            "artist" => serde_json::to_string(&MetadataResponse::Artist(
                client.get_artist(&parsed.id).await?,
            ))?,
            other => {
                return Err(EngineError::InvalidRequest(format!(
                    "unsupported deezer entity: {other}"
                )));
            }
        };
        Ok(json)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_get_metadata(url_utf8: *const c_char) -> *mut c_char {
    entry("aria_get_metadata", || {
        let url = require_cstr(url_utf8, "url_utf8")?;
        metadata_json(url).map_err(|e| {
            set_last_error("metadata fetch failed", Some(e.to_string()));
        })
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_search(query_utf8: *const c_char, limit: u32) -> *mut c_char {
    entry("aria_search", || {
        let query = require_cstr(query_utf8, "query_utf8")?.trim().to_string();
        if query.is_empty() {
            return serialize(&catalog::model::SearchAllResult::default(), "search result");
        }
        let limit = limit.clamp(1, 50);
        let result = runtime()
            .block_on(deezer::client().search_all(&query, limit, limit, ""))
            .map_err(|e| {
                set_last_error("search failed", Some(e.to_string()));
            })?;
        serialize(&result, "search result")
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_check_availability(
    spotify_id_utf8: *const c_char,
    isrc_utf8: *const c_char,
) -> *mut c_char {
    entry("aria_check_availability", || {
        let spotify_id = require_cstr(spotify_id_utf8, "spotify_id_utf8")?;
        let isrc = if isrc_utf8.is_null() {
            ""
        } else {
            require_cstr(isrc_utf8, "isrc_utf8")?
        };
        let availability = runtime()
            .block_on(SongLinkClient::new().check_by_spotify_id(spotify_id, isrc))
            .map_err(|e| {
                set_last_error("availability check failed", Some(e.to_string()));
            })?;
        serialize(&availability, "availability")
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_set_spotify_credentials(credentials_json_utf8: *const c_char) -> *mut c_char {
    entry("aria_set_spotify_credentials", || {
        let json = require_cstr(credentials_json_utf8, "credentials_json_utf8")?;
        let creds: SpotifyCredentials = serde_json::from_str(json).map_err(|e| {
            set_last_error("invalid credentials_json_utf8", Some(e.to_string()));
        })?;
        spotify::set_credentials(&creds.client_id, &creds.client_secret);
        serialize(&OkReply { ok: true }, "ok reply")
    })
}

// -----------------------------
// Downloads and streams
// -----------------------------

fn run_download(json: &str, force_fallback: bool) -> Result<String, ()> {
    let req: DownloadRequest = serde_json::from_str(json).map_err(|e| {
        set_last_error("invalid request_json_utf8", Some(e.to_string()));
    })?;
    let core_req = map_request_to_core(req);
    let result = runtime().block_on(async {
        if force_fallback {
            pipeline::pipeline().download_with_fallback(core_req).await
        } else {
            pipeline::pipeline().download(core_req).await
        }
    });
    serialize(&download_response(result), "download response")
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_download(request_json_utf8: *const c_char) -> *mut c_char {
    entry("aria_download", || {
        let json = require_cstr(request_json_utf8, "request_json_utf8")?;
        run_download(json, false)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_download_with_fallback(request_json_utf8: *const c_char) -> *mut c_char {
    entry("aria_download_with_fallback", || {
        let json = require_cstr(request_json_utf8, "request_json_utf8")?;
        run_download(json, true)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_resolve_stream(request_json_utf8: *const c_char) -> *mut c_char {
    entry("aria_resolve_stream", || {
        let json = require_cstr(request_json_utf8, "request_json_utf8")?;
        let req: DownloadRequest = serde_json::from_str(json).map_err(|e| {
            set_last_error("invalid request_json_utf8", Some(e.to_string()));
        })?;
        let result = runtime().block_on(pipeline::pipeline().resolve_stream(map_request_to_core(req)));
        serialize(&stream_response(result), "stream response")
    })
}

// -----------------------------
// Duplicate detection and library
// -----------------------------

#[unsafe(no_mangle)]
pub extern "C" fn aria_check_duplicate(
    output_dir_utf8: *const c_char,
    isrc_utf8: *const c_char,
) -> *mut c_char {
    entry("aria_check_duplicate", || {
        let dir = require_cstr(output_dir_utf8, "output_dir_utf8")?;
        let isrc = require_cstr(isrc_utf8, "isrc_utf8")?;
        let found = library::check_isrc_exists(Path::new(dir), &pipeline::normalize_isrc(isrc));
        serialize(
            &DuplicateCheckResult {
                exists: found.is_some(),
                filepath: found
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            },
            "duplicate check",
        )
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_check_files_exist_parallel(
    output_dir_utf8: *const c_char,
    tracks_json_utf8: *const c_char,
) -> *mut c_char {
    entry("aria_check_files_exist_parallel", || {
        let dir = require_cstr(output_dir_utf8, "output_dir_utf8")?.to_string();
        let json = require_cstr(tracks_json_utf8, "tracks_json_utf8")?;
        let probes: Vec<library::ExistenceProbe> = serde_json::from_str(json).map_err(|e| {
            set_last_error("invalid tracks_json_utf8", Some(e.to_string()));
        })?;
        let results =
            runtime().block_on(library::check_files_exist_parallel(Path::new(&dir), probes));
        let mapped: Vec<TrackExistence> = results
            .into_iter()
            .map(|r| TrackExistence {
                isrc: r.isrc,
                exists: r.exists,
                file_path: r.file_path,
                track_name: r.track_name,
                artist_name: r.artist_name,
            })
            .collect();
        serialize(&mapped, "existence results")
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_prebuild_isrc_index(output_dir_utf8: *const c_char) -> *mut c_char {
    entry("aria_prebuild_isrc_index", || {
        let dir = require_cstr(output_dir_utf8, "output_dir_utf8")?;
        library::prebuild_index(Path::new(dir)).map_err(|e| {
            set_last_error("index prebuild failed", Some(e.to_string()));
        })?;
        serialize(&OkReply { ok: true }, "ok reply")
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_invalidate_isrc_index(output_dir_utf8: *const c_char) -> *mut c_char {
    entry("aria_invalidate_isrc_index", || {
        let dir = require_cstr(output_dir_utf8, "output_dir_utf8")?;
        library::invalidate_index(Path::new(dir));
        serialize(&OkReply { ok: true }, "ok reply")
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_scan_library(folder_utf8: *const c_char) -> *mut c_char {
    entry("aria_scan_library", || {
        let folder = require_cstr(folder_utf8, "folder_utf8")?;
        let tracks = library::scan_library_folder(Path::new(folder)).map_err(|e| {
            set_last_error("library scan failed", Some(e.to_string()));
        })?;
        serialize(&tracks, "library tracks")
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_scan_library_incremental(
    folder_utf8: *const c_char,
    known_json_utf8: *const c_char,
) -> *mut c_char {
    entry("aria_scan_library_incremental", || {
        let folder = require_cstr(folder_utf8, "folder_utf8")?;
        let json = require_cstr(known_json_utf8, "known_json_utf8")?;
        let known: Vec<library::KnownFile> = serde_json::from_str(json).map_err(|e| {
            set_last_error("invalid known_json_utf8", Some(e.to_string()));
        })?;
        let scan = library::scan_library_incremental(Path::new(folder), known).map_err(|e| {
            set_last_error("incremental scan failed", Some(e.to_string()));
        })?;
        serialize(&scan, "incremental scan")
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_read_audio_metadata(path_utf8: *const c_char) -> *mut c_char {
    entry("aria_read_audio_metadata", || {
        let path = require_cstr(path_utf8, "path_utf8")?;
        let track = library::read_audio_metadata(Path::new(path)).map_err(|e| {
            set_last_error("metadata read failed", Some(e.to_string()));
        })?;
        serialize(&track, "audio metadata")
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_get_audio_quality(path_utf8: *const c_char) -> *mut c_char {
    entry("aria_get_audio_quality", || {
        let path = require_cstr(path_utf8, "path_utf8")?;
        let quality = library::audio_quality(Path::new(path)).map_err(|e| {
            set_last_error("quality probe failed", Some(e.to_string()));
        })?;
        serialize(&quality, "audio quality")
    })
}

// -----------------------------
// Progress and cancellation
// -----------------------------

#[unsafe(no_mangle)]
pub extern "C" fn aria_get_progress() -> *mut c_char {
    entry("aria_get_progress", || {
        let p = jobs::legacy_progress();
        serialize(
            &LegacyProgress {
                current_file: p.current_file,
                progress: p.progress,
                speed_mbps: p.speed_mbps,
                bytes_total: p.bytes_total,
                bytes_received: p.bytes_received,
                is_downloading: p.is_downloading,
                status: p.status,
            },
            "progress",
        )
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_get_multi_progress() -> *mut c_char {
    entry("aria_get_multi_progress", || {
        let all = jobs::all_item_progress();
        let mapped = MultiProgress {
            items: all
                .items
                .into_iter()
                .map(|(k, v)| (k, map_item_progress(v)))
                .collect(),
        };
        serialize(&mapped, "multi progress")
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_get_item_progress(item_id_utf8: *const c_char) -> *mut c_char {
    entry("aria_get_item_progress", || {
        let item_id = require_cstr(item_id_utf8, "item_id_utf8")?;
        match jobs::item_progress(item_id) {
            Some(p) => serialize(&map_item_progress(p), "item progress"),
            None => {
                set_last_error(format!("no progress for item: {item_id}"), None);
                Err(())
            }
        }
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_cancel_download(item_id_utf8: *const c_char) -> *mut c_char {
    entry("aria_cancel_download", || {
        let item_id = require_cstr(item_id_utf8, "item_id_utf8")?;
        jobs::cancel(item_id);
        serialize(&OkReply { ok: true }, "ok reply")
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_clear_all_progress() -> *mut c_char {
    entry("aria_clear_all_progress", || {
        jobs::clear_all_item_progress();
        serialize(&OkReply { ok: true }, "ok reply")
    })
}

// -----------------------------
// Logs
// -----------------------------

#[unsafe(no_mangle)]
pub extern "C" fn aria_get_logs_since(index: u64) -> *mut c_char {
    entry("aria_get_logs_since", || {
        let page = logbuf::get_since(index as usize);
        let mapped = LogsPage {
            logs: page
                .logs
                .into_iter()
                .map(|l| LogEntry {
                    timestamp: l.timestamp,
                    level: l.level,
                    tag: l.tag,
                    message: l.message,
                })
                .collect(),
            next_index: page.next_index,
        };
        serialize(&mapped, "logs page")
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_set_logging_enabled(enabled: u8) -> *mut c_char {
    entry("aria_set_logging_enabled", || {
        logbuf::set_enabled(enabled != 0);
        serialize(&OkReply { ok: true }, "ok reply")
    })
}

// -----------------------------
// Lyrics configuration
// -----------------------------

#[unsafe(no_mangle)]
pub extern "C" fn aria_set_lyrics_provider_order(providers_json_utf8: *const c_char) -> *mut c_char {
    entry("aria_set_lyrics_provider_order", || {
        let json = require_cstr(providers_json_utf8, "providers_json_utf8")?;
        let providers: Vec<String> = serde_json::from_str(json).map_err(|e| {
            set_last_error("invalid providers_json_utf8", Some(e.to_string()));
        })?;
        lyrics::set_provider_order(&providers);
        serialize(&OkReply { ok: true }, "ok reply")
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_set_lyrics_fetch_options(options_json_utf8: *const c_char) -> *mut c_char {
    entry("aria_set_lyrics_fetch_options", || {
        let json = require_cstr(options_json_utf8, "options_json_utf8")?;
        let opts: LyricsOptions = serde_json::from_str(json).map_err(|e| {
            set_last_error("invalid options_json_utf8", Some(e.to_string()));
        })?;
        lyrics::set_fetch_options(lyrics::LyricsFetchOptions {
            include_translation_netease: opts.include_translation_netease,
            include_romanization_netease: opts.include_romanization_netease,
            multi_person_word_by_word: opts.multi_person_word_by_word,
            musixmatch_language: opts.musixmatch_language,
        });
        serialize(&OkReply { ok: true }, "ok reply")
    })
}

// -----------------------------
// Transliteration callback
// -----------------------------

type TransliterateFn = extern "C" fn(*const c_char) -> *mut c_char;
type FreeFn = extern "C" fn(*mut c_char);

struct CallbackTransliterator {
    transliterate: TransliterateFn,
    free: FreeFn,
}

impl matching::Transliterator for CallbackTransliterator {
    fn to_romaji(&self, text: &str) -> String {
        let Ok(input) = CString::new(text) else {
            return text.to_string();
        };
        let out = (self.transliterate)(input.as_ptr());
        if out.is_null() {
            return text.to_string();
        }
        let result = unsafe { CStr::from_ptr(out) }
            .to_str()
            .map(str::to_string)
            .unwrap_or_else(|_| text.to_string());
        (self.free)(out);
        result
    }
}

/// Register the host's kana->romaji callback. `free_fn` releases strings the
/// callback allocates; both must stay valid for the process lifetime.
#[unsafe(no_mangle)]
pub extern "C" fn aria_set_transliterator(
    transliterate_fn: TransliterateFn,
    free_fn: FreeFn,
) -> *mut c_char {
    entry("aria_set_transliterator", || {
        matching::set_transliterator(Box::new(CallbackTransliterator {
            transliterate: transliterate_fn,
            free: free_fn,
        }));
        serialize(&OkReply { ok: true }, "ok reply")
    })
}

// -----------------------------
// Extension manager
// -----------------------------

#[unsafe(no_mangle)]
pub extern "C" fn aria_ext_set_directories(dirs_json_utf8: *const c_char) -> *mut c_char {
    entry("aria_ext_set_directories", || {
        let json = require_cstr(dirs_json_utf8, "dirs_json_utf8")?;
        let dirs: ExtensionDirectories = serde_json::from_str(json).map_err(|e| {
            set_last_error("invalid dirs_json_utf8", Some(e.to_string()));
        })?;
        extensions::manager().configure(
            Path::new(&dirs.extensions_dir),
            Path::new(&dirs.data_dir),
            &dirs.secret,
        );
        serialize(&OkReply { ok: true }, "ok reply")
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_ext_load_installed() -> *mut c_char {
    entry("aria_ext_load_installed", || {
        let count = runtime()
            .block_on(async { extensions::manager().load_installed() })
            .map_err(|e| {
                set_last_error("extension load failed", Some(e.to_string()));
            })?;
        serialize(&serde_json::json!({ "loaded": count }), "load result")
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_ext_install(archive_path_utf8: *const c_char) -> *mut c_char {
    entry("aria_ext_install", || {
        let path = require_cstr(archive_path_utf8, "archive_path_utf8")?;
        let info = runtime()
            .block_on(extensions::manager().install(Path::new(path)))
            .map_err(|e| {
                set_last_error("extension install failed", Some(e.to_string()));
            })?;
        serialize(&map_extension_info(info), "extension info")
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_ext_upgrade(archive_path_utf8: *const c_char) -> *mut c_char {
    entry("aria_ext_upgrade", || {
        let path = require_cstr(archive_path_utf8, "archive_path_utf8")?;
        let info = runtime()
            .block_on(extensions::manager().upgrade(Path::new(path)))
            .map_err(|e| {
                set_last_error("extension upgrade failed", Some(e.to_string()));
            })?;
        serialize(&map_extension_info(info), "extension info")
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_ext_check_upgrade(archive_path_utf8: *const c_char) -> *mut c_char {
    entry("aria_ext_check_upgrade", || {
        let path = require_cstr(archive_path_utf8, "archive_path_utf8")?;
        let check = extensions::manager()
            .check_upgrade(Path::new(path))
            .map_err(|e| {
                set_last_error("upgrade check failed", Some(e.to_string()));
            })?;
        serialize(
            &UpgradeCheck {
                name: check.name,
                current_version: check.current_version,
                new_version: check.new_version,
                is_upgrade: check.is_upgrade,
            },
            "upgrade check",
        )
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_ext_remove(name_utf8: *const c_char) -> *mut c_char {
    entry("aria_ext_remove", || {
        let name = require_cstr(name_utf8, "name_utf8")?;
        runtime()
            .block_on(extensions::manager().remove(name))
            .map_err(|e| {
                set_last_error("extension remove failed", Some(e.to_string()));
            })?;
        serialize(&OkReply { ok: true }, "ok reply")
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_ext_list() -> *mut c_char {
    entry("aria_ext_list", || {
        let infos: Vec<ExtensionInfo> = extensions::manager()
            .list()
            .into_iter()
            .map(map_extension_info)
            .collect();
        serialize(&infos, "extension list")
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_ext_set_enabled(name_utf8: *const c_char, enabled: u8) -> *mut c_char {
    entry("aria_ext_set_enabled", || {
        let name = require_cstr(name_utf8, "name_utf8")?;
        extensions::manager()
            .set_enabled(name, enabled != 0)
            .map_err(|e| {
                set_last_error("enable/disable failed", Some(e.to_string()));
            })?;
        serialize(&OkReply { ok: true }, "ok reply")
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_ext_initialize(name_utf8: *const c_char) -> *mut c_char {
    entry("aria_ext_initialize", || {
        let name = require_cstr(name_utf8, "name_utf8")?;
        runtime()
            .block_on(extensions::manager().initialize(name))
            .map_err(|e| {
                set_last_error("extension initialize failed", Some(e.to_string()));
            })?;
        serialize(&OkReply { ok: true }, "ok reply")
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_ext_cleanup(name_utf8: *const c_char) -> *mut c_char {
    entry("aria_ext_cleanup", || {
        let name = require_cstr(name_utf8, "name_utf8")?;
        runtime()
            .block_on(extensions::manager().cleanup(name))
            .map_err(|e| {
                set_last_error("extension cleanup failed", Some(e.to_string()));
            })?;
        serialize(&OkReply { ok: true }, "ok reply")
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_ext_invoke_action(params_json_utf8: *const c_char) -> *mut c_char {
    entry("aria_ext_invoke_action", || {
        #[derive(serde::Deserialize)]
        struct InvokeParams {
            extension: String,
            action: String,
            #[serde(default)]
            args: serde_json::Value,
        }
        let json = require_cstr(params_json_utf8, "params_json_utf8")?;
        let params: InvokeParams = serde_json::from_str(json).map_err(|e| {
            set_last_error("invalid params_json_utf8", Some(e.to_string()));
        })?;
        let result = runtime()
            .block_on(extensions::manager().invoke_action(
                &params.extension,
                &params.action,
                params.args,
            ))
            .map_err(|e| {
                set_last_error("extension action failed", Some(e.to_string()));
            })?;
        serde_json::to_string(&result).map_err(|e| {
            set_last_error("failed to serialize action result", Some(e.to_string()));
        })
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_ext_unload_all() -> *mut c_char {
    entry("aria_ext_unload_all", || {
        runtime().block_on(extensions::manager().unload_all());
        serialize(&OkReply { ok: true }, "ok reply")
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_ext_get_settings(name_utf8: *const c_char) -> *mut c_char {
    entry("aria_ext_get_settings", || {
        let name = require_cstr(name_utf8, "name_utf8")?;
        let settings = extensions::manager().get_settings(name).map_err(|e| {
            set_last_error("settings read failed", Some(e.to_string()));
        })?;
        serde_json::to_string(&settings).map_err(|e| {
            set_last_error("failed to serialize settings", Some(e.to_string()));
        })
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_ext_set_setting(params_json_utf8: *const c_char) -> *mut c_char {
    entry("aria_ext_set_setting", || {
        #[derive(serde::Deserialize)]
        struct SettingParams {
            extension: String,
            key: String,
            value: serde_json::Value,
        }
        let json = require_cstr(params_json_utf8, "params_json_utf8")?;
        let params: SettingParams = serde_json::from_str(json).map_err(|e| {
            set_last_error("invalid params_json_utf8", Some(e.to_string()));
        })?;
        extensions::manager()
            .set_setting(&params.extension, &params.key, params.value)
            .map_err(|e| {
                set_last_error("settings write failed", Some(e.to_string()));
            })?;
        serialize(&OkReply { ok: true }, "ok reply")
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_ext_get_pending_auth() -> *mut c_char {
    entry("aria_ext_get_pending_auth", || {
        match extensions::manager().take_pending_auth() {
            Some(pending) => serialize(
                &PendingAuth {
                    extension: pending.extension,
                    url: pending.url,
                },
                "pending auth",
            ),
            None => Ok("null".to_string()),
        }
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_ext_complete_auth(params_json_utf8: *const c_char) -> *mut c_char {
    entry("aria_ext_complete_auth", || {
        #[derive(serde::Deserialize)]
        struct AuthParams {
            extension: String,
            code: String,
        }
        let json = require_cstr(params_json_utf8, "params_json_utf8")?;
        let params: AuthParams = serde_json::from_str(json).map_err(|e| {
            set_last_error("invalid params_json_utf8", Some(e.to_string()));
        })?;
        extensions::manager()
            .complete_auth(&params.extension, &params.code)
            .map_err(|e| {
                set_last_error("auth completion failed", Some(e.to_string()));
            })?;
        serialize(&OkReply { ok: true }, "ok reply")
    })
}

// -----------------------------
// Process plumbing
// -----------------------------

#[unsafe(no_mangle)]
pub extern "C" fn aria_close_idle_connections() -> *mut c_char {
    entry("aria_close_idle_connections", || {
        aria_core::http::close_idle_connections();
        serialize(&OkReply { ok: true }, "ok reply")
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_ffi_api_version() -> u32 {
    API_VERSION
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_ffi_version_json() -> *mut c_char {
    #[derive(serde::Serialize)]
    struct Ver<'a> {
        version: &'a str,
        api: u32,
    }
    let v = Ver {
        version: env!("CARGO_PKG_VERSION"),
        api: API_VERSION,
    };
    match serde_json::to_string(&v) {
        Ok(s) => ok_json(s),
        Err(e) => {
            set_last_error("failed to serialize version", Some(e.to_string()));
            ptr::null_mut()
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_last_error_json() -> *mut c_char {
    match take_last_error() {
        Some(c) => c.into_raw(),
        None => ptr::null_mut(),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn aria_string_free(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    unsafe {
        drop(CString::from_raw(s));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cstr(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    fn take_string(p: *mut c_char) -> String {
        assert!(!p.is_null(), "expected a JSON string, got null");
        let out = unsafe { CStr::from_ptr(p) }.to_str().unwrap().to_string();
        aria_string_free(p);
        out
    }

    #[test]
    fn version_json_shape() {
        let p = aria_ffi_version_json();
        let s = take_string(p);
        assert!(s.contains("\"api\":1"), "{s}");
        assert_eq!(aria_ffi_api_version(), 1);
    }

    #[test]
    fn null_inputs_set_last_error() {
        let p = aria_parse_url(ptr::null());
        assert!(p.is_null());
        let err = aria_last_error_json();
        let s = take_string(err);
        assert!(s.contains("url_utf8"), "{s}");
        // The error slot is consumed.
        assert!(aria_last_error_json().is_null());
    }

    #[test]
    fn parse_url_roundtrip() {
        let input = cstr("https://open.spotify.com/track/4iV5W9uYEdYUVa79Axb7Rh?si=x");
        let s = take_string(aria_parse_url(input.as_ptr()));
        let parsed: ParsedUrl = serde_json::from_str(&s).unwrap();
        assert_eq!(parsed.entity_type, "track");
        assert_eq!(parsed.id, "4iV5W9uYEdYUVa79Axb7Rh");

        let input = cstr("https://www.deezer.com/en/album/302127");
        let s = take_string(aria_parse_url(input.as_ptr()));
        let parsed: ParsedUrl = serde_json::from_str(&s).unwrap();
        assert_eq!(parsed.entity_type, "album");
        assert_eq!(parsed.id, "302127");
    }

    #[test]
    fn invalid_download_request_is_reported_in_band() {
        let input = cstr(r#"{"service":"nosuch"}"#);
        let s = take_string(aria_download(input.as_ptr()));
        let resp: DownloadResponse = serde_json::from_str(&s).unwrap();
        assert!(!resp.success);
        assert_eq!(resp.error_type, "invalid_request");
    }

    #[test]
    fn cancel_then_download_is_cancelled_without_io() {
        let item = cstr("ffi-cancel-1");
        take_string(aria_cancel_download(item.as_ptr()));

        let req = cstr(r#"{"service":"tidal","item_id":"ffi-cancel-1","output_dir":"/tmp"}"#);
        let s = take_string(aria_download(req.as_ptr()));
        let resp: DownloadResponse = serde_json::from_str(&s).unwrap();
        assert!(!resp.success);
        assert_eq!(resp.error_type, "cancelled");
    }

    #[test]
    fn progress_surfaces() {
        let s = take_string(aria_get_progress());
        let _: LegacyProgress = serde_json::from_str(&s).unwrap();

        let s = take_string(aria_get_multi_progress());
        let _: MultiProgress = serde_json::from_str(&s).unwrap();

        let missing = cstr("no-such-item");
        assert!(aria_get_item_progress(missing.as_ptr()).is_null());
        take_string(aria_last_error_json());
    }

    #[test]
    fn logs_pagination_over_ffi() {
        take_string(aria_set_logging_enabled(1));
        logbuf::info("FFI", "over the boundary");
        let s = take_string(aria_get_logs_since(0));
        let page: LogsPage = serde_json::from_str(&s).unwrap();
        assert!(page.next_index >= page.logs.len());
        take_string(aria_set_logging_enabled(0));
    }

    #[test]
    fn duplicate_check_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let dir_c = cstr(dir.path().to_str().unwrap());
        let isrc = cstr("USRC17600001");
        let s = take_string(aria_check_duplicate(dir_c.as_ptr(), isrc.as_ptr()));
        let result: DuplicateCheckResult = serde_json::from_str(&s).unwrap();
        assert!(!result.exists);
    }
}
