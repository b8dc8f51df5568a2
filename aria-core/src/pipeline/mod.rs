//! End-to-end request resolution: identifier enrichment, duplicate
//! detection, provider-chain selection with fallback, the download itself
//! and post-processing (tags, cover, lyrics, index update).

mod filename;
pub mod track_ids;

pub use filename::{build_filename, render_template, sanitize_filename, TemplateFields};

use std::path::{Path, PathBuf};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::catalog::deezer::DeezerClient;
use crate::cover;
use crate::delivery::{self, Service, StreamDescriptor};
use crate::error::EngineError;
use crate::extensions;
use crate::http;
use crate::jobs;
use crate::library;
use crate::library::tags::TrackTags;
use crate::logbuf;
use crate::lyrics;
use crate::matching;
use crate::resolve::{Availability, IdhsClient, SongLinkClient};

/// One logical track request as it crosses the host boundary.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
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
    /// Originating provider tag; a matching plug-in is preferred when
    /// extensions are in play.
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

impl DownloadRequest {
    fn expected_duration_sec(&self) -> i64 {
        (self.duration_ms / 1000) as i64
    }

    fn template_fields(&self) -> TemplateFields {
        TemplateFields {
            title: self.track_name.clone(),
            artist: self.artist_name.clone(),
            album: self.album_name.clone(),
            track_number: self.track_number,
            disc_number: self.disc_number,
            release_date: self.release_date.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadOutcome {
    pub file_path: String,
    pub already_exists: bool,
    pub service: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StreamOutcome {
    pub service: String,
    pub stream_url: String,
    pub format: String,
    pub bit_depth: u32,
    pub sample_rate: u32,
    pub bitrate: u32,
    pub requires_decryption: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub decryption_key: String,
}

/// Built-in services stay a closed enum; plug-ins ride along as opaque
/// names. Adapter selection is a walk over this list.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ProviderKind {
    Builtin(Service),
    Extension(String),
}

impl ProviderKind {
    fn label(&self) -> String {
        match self {
            Self::Builtin(s) => s.to_string(),
            Self::Extension(name) => format!("ext:{name}"),
        }
    }
}

/// Uppercase 12-char normal form; anything else passes through untouched so
/// vendor quirks stay visible downstream.
pub fn normalize_isrc(isrc: &str) -> String {
    let cleaned: String = isrc
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if cleaned.len() == 12 {
        cleaned
    } else {
        isrc.trim().to_uppercase()
    }
}

pub struct Pipeline {
    pub tidal: delivery::tidal::TidalAdapter,
    pub qobuz: delivery::qobuz::QobuzAdapter,
    pub amazon: delivery::amazon::AmazonAdapter,
    pub youtube: delivery::youtube::YoutubeAdapter,
    pub songlink: SongLinkClient,
    pub idhs: IdhsClient,
    pub deezer: DeezerClient,
    pub download_http: Client,
}

pub fn pipeline() -> &'static Pipeline {
    static PIPELINE: std::sync::OnceLock<Pipeline> = std::sync::OnceLock::new();
    PIPELINE.get_or_init(Pipeline::new)
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            tidal: delivery::tidal::TidalAdapter::new(),
            qobuz: delivery::qobuz::QobuzAdapter::new(),
            amazon: delivery::amazon::AmazonAdapter::new(),
            youtube: delivery::youtube::YoutubeAdapter::new(),
            songlink: SongLinkClient::new(),
            idhs: IdhsClient::new(),
            deezer: DeezerClient::new(http::shared_client().clone()),
            download_http: http::download_client().clone(),
        }
    }

    // ---- step 1: identifier enrichment ----

    /// Complete the identifier set opportunistically. Deezer is the
    /// authoritative ISRC source; SongLink fills the cross-platform IDs.
    /// Individual lookup failures degrade to whatever is already known.
    pub async fn enrich_identifiers(
        &self,
        req: &mut DownloadRequest,
    ) -> Option<Availability> {
        req.isrc = normalize_isrc(&req.isrc);

        if !req.deezer_id.is_empty() && req.isrc.is_empty() {
            match self.deezer.get_track_isrc(&req.deezer_id).await {
                Ok(isrc) => req.isrc = normalize_isrc(&isrc),
                Err(err) => logbuf::warn("Pipeline", format!("deezer ISRC lookup failed: {err}")),
            }
            return None;
        }

        if req.spotify_id.is_empty() {
            return None;
        }

        let availability = match self
            .songlink
            .check_by_spotify_id(&req.spotify_id, &req.isrc)
            .await
        {
            Ok(a) => a,
            Err(err) => {
                logbuf::warn("Pipeline", format!("availability check failed: {err}"));
                match self.idhs.availability_from_spotify(&req.spotify_id).await {
                    Ok(a) => a,
                    Err(idhs_err) => {
                        logbuf::warn("Pipeline", format!("IDHS fallback failed: {idhs_err}"));
                        return None;
                    }
                }
            }
        };

        if req.deezer_id.is_empty() {
            req.deezer_id = availability.deezer_id.clone();
        }
        if req.tidal_id.is_empty() {
            req.tidal_id = availability.tidal_id.clone();
        }
        if req.qobuz_id.is_empty() {
            req.qobuz_id = availability.qobuz_id.clone();
        }

        if req.isrc.is_empty() && !req.deezer_id.is_empty() {
            match self.deezer.get_track_isrc(&req.deezer_id).await {
                Ok(isrc) => req.isrc = normalize_isrc(&isrc),
                Err(err) => logbuf::warn("Pipeline", format!("deezer ISRC lookup failed: {err}")),
            }
        }
        Some(availability)
    }

    // ---- step 3: adapter selection ----

    fn parse_chosen(&self, req: &DownloadRequest) -> Option<ProviderKind> {
        if let Ok(service) = req.service.parse::<Service>() {
            return Some(ProviderKind::Builtin(service));
        }
        let service = req.service.trim();
        if !service.is_empty()
            && extensions::manager()
                .enabled_download_providers()
                .iter()
                .any(|n| n == service)
        {
            return Some(ProviderKind::Extension(service.to_string()));
        }
        None
    }

    fn provider_chain(&self, req: &DownloadRequest) -> Result<Vec<ProviderKind>, EngineError> {
        let chosen = self.parse_chosen(req);

        // Strict mode: the explicitly chosen built-in only, even with
        // extensions switched on.
        if req.use_extensions && !req.use_fallback {
            if let Some(kind @ ProviderKind::Builtin(_)) = &chosen {
                return Ok(vec![kind.clone()]);
            }
        }

        let mut chain: Vec<ProviderKind> = Vec::new();
        let mut push = |kind: ProviderKind, chain: &mut Vec<ProviderKind>| {
            if !chain.contains(&kind) {
                chain.push(kind);
            }
        };

        if req.use_extensions {
            let providers = extensions::manager().enabled_download_providers();
            // A plug-in that owns the track's source goes first.
            if !req.source.is_empty() {
                if let Some(name) = providers.iter().find(|n| **n == req.source) {
                    push(ProviderKind::Extension(name.clone()), &mut chain);
                }
            }
            if let Some(kind) = &chosen {
                push(kind.clone(), &mut chain);
            }
            if req.use_fallback {
                for name in providers {
                    push(ProviderKind::Extension(name), &mut chain);
                }
                for service in Service::ALL {
                    push(ProviderKind::Builtin(service), &mut chain);
                }
            }
        } else if req.use_fallback {
            if let Some(kind) = &chosen {
                push(kind.clone(), &mut chain);
            }
            for service in Service::ALL {
                push(ProviderKind::Builtin(service), &mut chain);
            }
        } else if let Some(kind) = chosen {
            chain.push(kind);
        }

        if chain.is_empty() {
            return Err(EngineError::InvalidRequest(format!(
                "no usable stream provider for service '{}'",
                req.service
            )));
        }
        Ok(chain)
    }

    // ---- step 4: per-adapter search and resolve ----

    async fn resolve_via(
        &self,
        kind: &ProviderKind,
        req: &DownloadRequest,
        availability: &Option<Availability>,
    ) -> Result<StreamDescriptor, EngineError> {
        match kind {
            ProviderKind::Builtin(Service::Tidal) => {
                let track_id = self.find_tidal_track(req, availability).await?;
                self.tidal.resolve_url(track_id, &req.quality).await
            }
            ProviderKind::Builtin(Service::Qobuz) => {
                let track_id = self.find_qobuz_track(req).await?;
                self.qobuz.resolve_url(track_id, &req.quality).await
            }
            ProviderKind::Builtin(Service::Amazon) => {
                let amazon_url = availability
                    .as_ref()
                    .map(|a| a.amazon_url.clone())
                    .unwrap_or_default();
                if amazon_url.is_empty() {
                    return Err(EngineError::NotFound(
                        "could not find amazon url for track".to_string(),
                    ));
                }
                self.amazon.resolve_url(&amazon_url).await
            }
            ProviderKind::Builtin(Service::Youtube) => {
                let youtube_url = self.find_youtube_url(req, availability).await?;
                self.youtube.resolve_url(&youtube_url, &req.quality).await
            }
            ProviderKind::Extension(name) => {
                extensions::manager()
                    .resolve_track(
                        name,
                        json!({
                            "isrc": req.isrc,
                            "trackName": req.track_name,
                            "artistName": req.artist_name,
                            "albumName": req.album_name,
                            "durationMs": req.duration_ms,
                            "quality": req.quality,
                            "spotifyId": req.spotify_id,
                            "deezerId": req.deezer_id,
                        }),
                    )
                    .await
            }
        }
    }

    /// Tidal resolution order: known ID, SongLink URL, ISRC search,
    /// metadata-only search.
    async fn find_tidal_track(
        &self,
        req: &DownloadRequest,
        availability: &Option<Availability>,
    ) -> Result<i64, EngineError> {
        if let Ok(id) = req.tidal_id.trim().parse::<i64>() {
            if id > 0 {
                return Ok(id);
            }
        }
        if let Some(ids) = track_ids::get(&req.isrc) {
            if ids.tidal > 0 {
                return Ok(ids.tidal);
            }
        }
        if let Some(av) = availability {
            if !av.tidal_url.is_empty() {
                if let Ok(id) = delivery::tidal::TidalAdapter::track_id_from_url(&av.tidal_url) {
                    track_ids::set_tidal(&req.isrc, id);
                    return Ok(id);
                }
            }
        }
        if !req.isrc.is_empty() {
            if let Ok(track) = self.tidal.search_by_isrc(&req.isrc).await {
                track_ids::set_tidal(&req.isrc, track.id);
                return Ok(track.id);
            }
        }
        let track = self
            .tidal
            .search_by_metadata(
                &req.track_name,
                &req.artist_name,
                &req.isrc,
                req.expected_duration_sec(),
            )
            .await?;
        track_ids::set_tidal(&req.isrc, track.id);
        Ok(track.id)
    }

    async fn find_qobuz_track(&self, req: &DownloadRequest) -> Result<i64, EngineError> {
        if let Ok(id) = req.qobuz_id.trim().parse::<i64>() {
            if id > 0 {
                return Ok(id);
            }
        }
        if let Some(ids) = track_ids::get(&req.isrc) {
            if ids.qobuz > 0 {
                return Ok(ids.qobuz);
            }
        }
        if !req.isrc.is_empty() {
            if let Ok(track) = self
                .qobuz
                .search_by_isrc(&req.isrc, req.expected_duration_sec())
                .await
            {
                track_ids::set_qobuz(&req.isrc, track.id);
                return Ok(track.id);
            }
        }
        let track = self
            .qobuz
            .search_by_metadata(
                &req.track_name,
                &req.artist_name,
                req.expected_duration_sec(),
            )
            .await?;
        track_ids::set_qobuz(&req.isrc, track.id);
        Ok(track.id)
    }

    async fn find_youtube_url(
        &self,
        req: &DownloadRequest,
        availability: &Option<Availability>,
    ) -> Result<String, EngineError> {
        if let Some(av) = availability {
            if !av.youtube_url.is_empty() {
                return Ok(av.youtube_url.clone());
            }
        }
        if !req.spotify_id.is_empty() {
            if let Ok(url) = self.songlink.youtube_url_from_spotify(&req.spotify_id).await {
                return Ok(url);
            }
        }
        if !req.deezer_id.is_empty() {
            if let Ok(url) = self.songlink.youtube_url_from_deezer(&req.deezer_id).await {
                return Ok(url);
            }
        }
        Err(EngineError::NotFound(
            "could not find youtube url for track".to_string(),
        ))
    }

    // ---- download execution ----

    fn output_path_for(&self, req: &DownloadRequest, format: &str) -> PathBuf {
        if !req.output_path.trim().is_empty() {
            return PathBuf::from(req.output_path.trim());
        }
        let ext = {
            let mapped = delivery::infer_stream_format("", format);
            if mapped.is_empty() { "flac".to_string() } else { mapped }
        };
        let name = build_filename(&req.filename_format, &req.template_fields());
        Path::new(&req.output_dir).join(format!("{name}.{ext}"))
    }

    async fn execute_download(
        &self,
        req: &DownloadRequest,
        descriptor: &StreamDescriptor,
    ) -> Result<PathBuf, EngineError> {
        if descriptor.requires_decryption() {
            // The core never decrypts; the caller gets the key through the
            // stream surface instead.
            return Err(EngineError::EncryptedStream {
                url: descriptor.url.clone(),
                key: descriptor.decryption_key.clone(),
                format: descriptor.format.clone(),
            });
        }

        if descriptor.is_segmented() {
            let parsed = delivery::parse_manifest(&descriptor.manifest_b64)?;
            if !parsed.direct_url.is_empty() {
                return self
                    .download_direct_to(req, &parsed.direct_url, &descriptor.format)
                    .await;
            }
            if req.output_fd > 0 {
                return Err(EngineError::InvalidRequest(
                    "segmented streams require a filesystem output".to_string(),
                ));
            }
            let out_path = self.output_path_for(req, &descriptor.format);
            return delivery::download_dash(
                &self.download_http,
                &parsed.init_url,
                &parsed.media_urls,
                &out_path,
                &req.item_id,
            )
            .await;
        }

        if descriptor.url.is_empty() {
            return Err(EngineError::NotFound(
                "no stream provider available".to_string(),
            ));
        }
        self.download_direct_to(req, &descriptor.url, &descriptor.format)
            .await
    }

    async fn download_direct_to(
        &self,
        req: &DownloadRequest,
        url: &str,
        format: &str,
    ) -> Result<PathBuf, EngineError> {
        let format = delivery::infer_stream_format(url, format);
        if req.output_fd > 0 {
            let target = delivery::OutputTarget::Fd(req.output_fd);
            delivery::download_direct(&self.download_http, url, &target, &req.item_id).await?;
            return Ok(PathBuf::new());
        }
        let out_path = self.output_path_for(req, &format);
        let target = delivery::OutputTarget::Path(out_path.clone());
        delivery::download_direct(&self.download_http, url, &target, &req.item_id).await?;
        Ok(out_path)
    }

    // ---- step 5-8: post-processing ----

    async fn fetch_lyrics_text(&self, req: &DownloadRequest) -> Option<(lyrics::LyricsResponse, String)> {
        let duration_sec = req.duration_ms as f64 / 1000.0;
        let mut response =
            match lyrics::fetch_lyrics(&req.track_name, &req.artist_name, duration_sec).await {
                Ok(r) => r,
                Err(err) => {
                    logbuf::debug("Pipeline", format!("lyrics skipped: {err}"));
                    return None;
                }
            };

        if req.convert_lyrics_to_romaji {
            for line in &mut response.lines {
                if matching::contains_japanese(&line.words) {
                    if let Some(romaji) = matching::to_romaji(&line.words) {
                        line.words = romaji;
                    }
                }
            }
        }

        let lrc = lyrics::convert_to_lrc_with_metadata(&response, &req.track_name, &req.artist_name);
        Some((response, lrc))
    }

    async fn post_process(&self, req: &DownloadRequest, file_path: &Path) {
        jobs::set_item_finalizing(&req.item_id);

        let is_flac = file_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("flac"))
            .unwrap_or(false);

        let lyrics_text = if req.embed_lyrics && !req.track_name.is_empty() {
            self.fetch_lyrics_text(req).await
        } else {
            None
        };

        if let Some((_, lrc)) = &lyrics_text {
            if req.save_lrc_file && !lrc.is_empty() {
                if let Err(err) = lyrics::save_lrc_sidecar(file_path, lrc) {
                    logbuf::warn("Pipeline", format!("LRC sidecar failed: {err}"));
                }
            }
        }

        // M4A outputs leave untagged; the host tags them after container
        // conversion.
        if !is_flac {
            return;
        }

        let cover_bytes = if !req.cover_url.is_empty() {
            match cover::download_cover(
                http::shared_client(),
                &req.cover_url,
                req.embed_max_quality_cover,
            )
            .await
            {
                Ok(bytes) => Some(bytes),
                Err(err) => {
                    logbuf::warn("Pipeline", format!("cover skipped: {err}"));
                    None
                }
            }
        } else {
            None
        };

        let tags = TrackTags {
            title: req.track_name.clone(),
            artist: req.artist_name.clone(),
            album: req.album_name.clone(),
            album_artist: req.album_artist.clone(),
            date: req.release_date.clone(),
            track_number: req.track_number,
            total_tracks: req.total_tracks,
            disc_number: req.disc_number,
            isrc: req.isrc.clone(),
            lyrics: lyrics_text.map(|(_, lrc)| lrc).unwrap_or_default(),
            genre: String::new(),
            duration_sec: req.duration_ms / 1000,
        };
        if let Err(err) = library::tags::embed_flac_tags(file_path, &tags, cover_bytes.as_deref()) {
            // The audio is already on disk; a tagging failure must not
            // delete it.
            logbuf::error("Pipeline", format!("tag embedding failed: {err}"));
        }
    }

    // ---- the end-to-end run ----

    pub async fn download(&self, req: DownloadRequest) -> Result<DownloadOutcome, EngineError> {
        self.run(req).await
    }

    pub async fn download_with_fallback(
        &self,
        mut req: DownloadRequest,
    ) -> Result<DownloadOutcome, EngineError> {
        req.use_fallback = true;
        self.run(req).await
    }

    async fn run(&self, mut req: DownloadRequest) -> Result<DownloadOutcome, EngineError> {
        let token = jobs::init_cancel(&req.item_id);
        if token.is_cancelled() {
            jobs::clear_cancel(&req.item_id);
            return Err(EngineError::Cancelled);
        }

        let availability = self.enrich_identifiers(&mut req).await;

        // Duplicate detection: an ISRC-matching, still-existent file in the
        // output directory short-circuits the whole pipeline.
        if !req.isrc.is_empty() && !req.output_dir.is_empty() {
            if let Some(existing) =
                library::check_isrc_exists(Path::new(&req.output_dir), &req.isrc)
            {
                logbuf::info(
                    "Pipeline",
                    format!("{} already downloaded: {}", req.isrc, existing.display()),
                );
                jobs::clear_cancel(&req.item_id);
                return Ok(DownloadOutcome {
                    file_path: existing.to_string_lossy().into_owned(),
                    already_exists: true,
                    service: String::new(),
                });
            }
        }

        let chain = self.provider_chain(&req)?;
        jobs::start_item(&req.item_id);

        let result = self.run_chain(&req, &chain, &availability).await;
        match result {
            Ok(outcome) => {
                jobs::complete_item(&req.item_id);
                jobs::clear_cancel(&req.item_id);
                Ok(outcome)
            }
            Err(err) => {
                if jobs::is_cancelled(&req.item_id) {
                    jobs::remove_item(&req.item_id);
                    jobs::clear_cancel(&req.item_id);
                    return Err(EngineError::Cancelled);
                }
                jobs::remove_item(&req.item_id);
                jobs::clear_cancel(&req.item_id);
                Err(err)
            }
        }
    }

    async fn run_chain(
        &self,
        req: &DownloadRequest,
        chain: &[ProviderKind],
        availability: &Option<Availability>,
    ) -> Result<DownloadOutcome, EngineError> {
        let mut errors: Vec<String> = Vec::new();
        let mut last_err: Option<EngineError> = None;

        for kind in chain {
            if jobs::is_cancelled(&req.item_id) {
                return Err(EngineError::Cancelled);
            }
            logbuf::info(
                "Pipeline",
                format!("trying {} for {} - {}", kind.label(), req.artist_name, req.track_name),
            );

            let descriptor = match self.resolve_via(kind, req, availability).await {
                Ok(d) => d,
                Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
                Err(err) => {
                    logbuf::warn("Pipeline", format!("{} failed: {err}", kind.label()));
                    errors.push(format!("{}: {err}", kind.label()));
                    last_err = Some(err);
                    continue;
                }
            };

            match self.execute_download(req, &descriptor).await {
                Ok(path) => {
                    if !path.as_os_str().is_empty() {
                        self.post_process(req, &path).await;
                        if !req.isrc.is_empty() && !req.output_dir.is_empty() {
                            library::add_to_index(Path::new(&req.output_dir), &req.isrc, &path);
                        }
                    }
                    return Ok(DownloadOutcome {
                        file_path: path.to_string_lossy().into_owned(),
                        already_exists: false,
                        service: kind.label(),
                    });
                }
                Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
                // An encrypted stream will be encrypted from every mirror of
                // the same service, but another provider may serve it plain.
                Err(err @ EngineError::EncryptedStream { .. }) if chain.len() == 1 => {
                    return Err(err);
                }
                Err(err) => {
                    logbuf::warn("Pipeline", format!("{} download failed: {err}", kind.label()));
                    errors.push(format!("{}: {err}", kind.label()));
                    last_err = Some(err);
                }
            }
        }

        // A single-provider chain surfaces the original error untouched so
        // the host keeps its discriminator.
        if chain.len() == 1 {
            return Err(last_err.unwrap_or_else(|| {
                EngineError::Other("unknown failure".to_string())
            }));
        }
        Err(EngineError::AllProvidersFailed(format!(
            "all {} providers failed: {}",
            chain.len(),
            errors.join("; ")
        )))
    }

    /// Transient playable URL: same provider selection as a download, but
    /// the stream descriptor goes back to the host instead of the executor.
    /// Encrypted streams surface their key.
    pub async fn resolve_stream(
        &self,
        mut req: DownloadRequest,
    ) -> Result<StreamOutcome, EngineError> {
        let availability = self.enrich_identifiers(&mut req).await;
        let chain = self.provider_chain(&req)?;

        let mut errors: Vec<String> = Vec::new();
        let mut last_err: Option<EngineError> = None;
        for kind in &chain {
            let descriptor = match self.resolve_via(kind, &req, &availability).await {
                Ok(d) => d,
                Err(err) => {
                    errors.push(format!("{}: {err}", kind.label()));
                    last_err = Some(err);
                    continue;
                }
            };

            let (url, format) = if descriptor.is_segmented() {
                match delivery::parse_manifest(&descriptor.manifest_b64) {
                    Ok(parsed) if !parsed.direct_url.is_empty() => {
                        (parsed.direct_url, descriptor.format.clone())
                    }
                    Ok(_) => {
                        errors.push(format!(
                            "{}: segmented stream is not directly playable",
                            kind.label()
                        ));
                        continue;
                    }
                    Err(err) => {
                        errors.push(format!("{}: {err}", kind.label()));
                        continue;
                    }
                }
            } else if descriptor.url.is_empty() {
                errors.push(format!("{}: no stream URL in response", kind.label()));
                continue;
            } else {
                (descriptor.url.clone(), descriptor.format.clone())
            };

            return Ok(StreamOutcome {
                service: kind.label(),
                stream_url: url,
                format: delivery::infer_stream_format("", &format),
                bit_depth: descriptor.bit_depth,
                sample_rate: descriptor.sample_rate,
                bitrate: descriptor.bitrate_kbps,
                requires_decryption: descriptor.requires_decryption(),
                decryption_key: descriptor.decryption_key.clone(),
            });
        }

        if chain.len() == 1 {
            return Err(last_err.unwrap_or_else(|| {
                EngineError::Other("unknown failure".to_string())
            }));
        }
        Err(EngineError::AllProvidersFailed(format!(
            "all {} providers failed: {}",
            chain.len(),
            errors.join("; ")
        )))
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isrc_normalization() {
        assert_eq!(normalize_isrc("usrc17600001"), "USRC17600001");
        assert_eq!(normalize_isrc(" us-rc1.7600001 "), "USRC17600001");
        // Wrong length passes through uppercased.
        assert_eq!(normalize_isrc("abc"), "ABC");
        assert_eq!(normalize_isrc(""), "");
    }

    #[test]
    fn chain_chosen_only() {
        let p = Pipeline::new();
        let req = DownloadRequest {
            service: "tidal".to_string(),
            ..Default::default()
        };
        let chain = p.provider_chain(&req).unwrap();
        assert_eq!(chain, vec![ProviderKind::Builtin(Service::Tidal)]);
    }

    #[test]
    fn chain_builtin_fallback_order() {
        let p = Pipeline::new();
        let req = DownloadRequest {
            service: "qobuz".to_string(),
            use_fallback: true,
            ..Default::default()
        };
        let chain = p.provider_chain(&req).unwrap();
        assert_eq!(
            chain,
            vec![
                ProviderKind::Builtin(Service::Qobuz),
                ProviderKind::Builtin(Service::Tidal),
                ProviderKind::Builtin(Service::Amazon),
                ProviderKind::Builtin(Service::Youtube),
            ]
        );
    }

    #[test]
    fn chain_strict_mode_ignores_extensions() {
        let p = Pipeline::new();
        let req = DownloadRequest {
            service: "amazon".to_string(),
            use_extensions: true,
            use_fallback: false,
            ..Default::default()
        };
        let chain = p.provider_chain(&req).unwrap();
        assert_eq!(chain, vec![ProviderKind::Builtin(Service::Amazon)]);
    }

    #[test]
    fn chain_rejects_unknown_service() {
        let p = Pipeline::new();
        let req = DownloadRequest {
            service: "napster".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            p.provider_chain(&req),
            Err(EngineError::InvalidRequest(_))
        ));
    }

    #[test]
    fn extension_fallback_covers_builtins() {
        let p = Pipeline::new();
        let req = DownloadRequest {
            service: "tidal".to_string(),
            use_extensions: true,
            use_fallback: true,
            ..Default::default()
        };
        // No extensions installed in this test process: built-ins must
        // still cover all four services, chosen first.
        let chain = p.provider_chain(&req).unwrap();
        assert_eq!(chain[0], ProviderKind::Builtin(Service::Tidal));
        assert_eq!(chain.len(), 4);
    }

    #[test]
    fn output_path_respects_explicit_path() {
        let p = Pipeline::new();
        let req = DownloadRequest {
            output_path: "/music/explicit.flac".to_string(),
            ..Default::default()
        };
        assert_eq!(
            p.output_path_for(&req, "flac"),
            PathBuf::from("/music/explicit.flac")
        );

        let req = DownloadRequest {
            output_dir: "/music".to_string(),
            track_name: "Song".to_string(),
            artist_name: "Artist".to_string(),
            ..Default::default()
        };
        assert_eq!(
            p.output_path_for(&req, "flac"),
            PathBuf::from("/music/Artist - Song.flac")
        );
        assert_eq!(
            p.output_path_for(&req, "unknown-format"),
            PathBuf::from("/music/Artist - Song.flac")
        );
    }
}
