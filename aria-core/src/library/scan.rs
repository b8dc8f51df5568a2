use std::collections::HashMap;
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::EngineError;
use crate::logbuf;

use super::quality;
use super::tags;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryTrack {
    pub id: String,
    pub track_name: String,
    pub artist_name: String,
    pub album_name: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub album_artist: String,
    pub file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_mod_time: Option<i64>,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub isrc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disc_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub release_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bit_depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub genre: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementalScan {
    pub scanned: Vec<LibraryTrack>,
    pub deleted_paths: Vec<String>,
    pub skipped_count: usize,
    pub total_files: usize,
}

/// Known `(path, mtime-ms)` pair from the host's previous scan.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnownFile {
    pub file_path: String,
    #[serde(default)]
    pub file_mod_time: i64,
}

// FNV-1a, stable across runs so library IDs survive restarts.
fn hash_path(path: &str) -> u32 {
    let mut hash: u32 = 2166136261;
    for b in path.bytes() {
        hash ^= b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

fn library_id(path: &str) -> String {
    format!("local_{:08x}", hash_path(path))
}

fn mod_time_ms(path: &Path) -> Option<i64> {
    std::fs::metadata(path)
        .ok()?
        .modified()
        .ok()?
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_millis() as i64)
}

fn scan_audio_file(path: &Path) -> Result<LibraryTrack, EngineError> {
    let format = tags::supported_extension(path)
        .ok_or_else(|| EngineError::InvalidRequest("unsupported audio format".to_string()))?;
    let t = tags::read_tags(path)?;

    let path_str = path.to_string_lossy().into_owned();
    let mut track = LibraryTrack {
        id: library_id(&path_str),
        track_name: t.title,
        artist_name: t.artist,
        album_name: t.album,
        album_artist: t.album_artist,
        file_path: path_str.clone(),
        file_mod_time: mod_time_ms(path),
        isrc: t.isrc,
        track_number: (t.track_number > 0).then_some(t.track_number),
        disc_number: (t.disc_number > 0).then_some(t.disc_number),
        duration: (t.duration_sec > 0).then_some(t.duration_sec),
        release_date: t.date,
        bit_depth: None,
        sample_rate: None,
        genre: t.genre,
        format: format.to_string(),
    };

    // Tagless files still get an entry derived from the name, so downloads
    // done outside the app remain visible.
    if track.track_name.is_empty() {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown");
        if let Some((artist, title)) = stem.split_once(" - ") {
            track.artist_name = artist.trim().to_string();
            track.track_name = title.trim().to_string();
        } else {
            track.track_name = stem.to_string();
        }
    }

    if let Ok(q) = quality::audio_quality(path) {
        track.bit_depth = (q.bit_depth > 0).then_some(q.bit_depth);
        track.sample_rate = (q.sample_rate > 0).then_some(q.sample_rate);
        if track.duration.is_none() && q.duration_sec > 0 {
            track.duration = Some(q.duration_sec);
        }
    }

    Ok(track)
}

fn collect_audio_files(folder: &Path) -> Vec<std::path::PathBuf> {
    WalkDir::new(folder)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| tags::supported_extension(p).is_some())
        .collect()
}

pub fn scan_library_folder(folder: &Path) -> Result<Vec<LibraryTrack>, EngineError> {
    if folder.as_os_str().is_empty() {
        return Err(EngineError::InvalidRequest("folder path is empty".to_string()));
    }
    let meta = std::fs::metadata(folder)
        .map_err(|e| EngineError::InvalidRequest(format!("folder not found: {e}")))?;
    if !meta.is_dir() {
        return Err(EngineError::InvalidRequest(format!(
            "path is not a folder: {}",
            folder.display()
        )));
    }

    let files = collect_audio_files(folder);
    logbuf::debug("LibraryScan", format!("found {} audio files to scan", files.len()));

    let mut results = Vec::with_capacity(files.len());
    let mut errors = 0usize;
    for path in &files {
        match scan_audio_file(path) {
            Ok(track) => results.push(track),
            Err(err) => {
                errors += 1;
                logbuf::debug(
                    "LibraryScan",
                    format!("error scanning {}: {err}", path.display()),
                );
            }
        }
    }
    logbuf::info(
        "LibraryScan",
        format!("scan complete: {} tracks, {errors} errors", results.len()),
    );
    Ok(results)
}

/// Re-read only new/changed files; report paths that disappeared.
pub fn scan_library_incremental(
    folder: &Path,
    known: Vec<KnownFile>,
) -> Result<IncrementalScan, EngineError> {
    if folder.as_os_str().is_empty() {
        return Err(EngineError::InvalidRequest("folder path is empty".to_string()));
    }

    let known_map: HashMap<String, i64> = known
        .into_iter()
        .map(|k| (k.file_path, k.file_mod_time))
        .collect();

    let files = collect_audio_files(folder);
    let total_files = files.len();

    let mut scanned = Vec::new();
    let mut skipped = 0usize;
    let mut seen: HashMap<String, ()> = HashMap::new();

    for path in &files {
        let path_str = path.to_string_lossy().into_owned();
        seen.insert(path_str.clone(), ());
        let mtime = mod_time_ms(path).unwrap_or(0);
        match known_map.get(&path_str) {
            Some(&prev) if prev == mtime && prev != 0 => skipped += 1,
            _ => {
                if let Ok(track) = scan_audio_file(path) {
                    scanned.push(track);
                }
            }
        }
    }

    let deleted_paths = known_map
        .keys()
        .filter(|p| !seen.contains_key(*p))
        .cloned()
        .collect();

    Ok(IncrementalScan {
        scanned,
        deleted_paths,
        skipped_count: skipped,
        total_files,
    })
}

/// Single-file metadata read for the host's track-detail view.
pub fn read_audio_metadata(path: &Path) -> Result<LibraryTrack, EngineError> {
    scan_audio_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_id_is_stable() {
        assert_eq!(library_id("/music/a.flac"), library_id("/music/a.flac"));
        assert_ne!(library_id("/music/a.flac"), library_id("/music/b.flac"));
    }

    #[test]
    fn incremental_reports_deletions_and_skips() {
        let dir = tempfile::tempdir().unwrap();
        // Non-audio files must be ignored entirely.
        std::fs::write(dir.path().join("cover.jpg"), b"jpg").unwrap();

        let known = vec![KnownFile {
            file_path: dir
                .path()
                .join("gone.flac")
                .to_string_lossy()
                .into_owned(),
            file_mod_time: 12345,
        }];
        let result = scan_library_incremental(dir.path(), known).unwrap();
        assert_eq!(result.total_files, 0);
        assert_eq!(result.deleted_paths.len(), 1);
        assert_eq!(result.skipped_count, 0);
    }

    #[test]
    fn empty_folder_rejected() {
        assert!(scan_library_folder(Path::new("")).is_err());
        assert!(scan_library_folder(Path::new("/definitely/not/here/xyz")).is_err());
    }
}
