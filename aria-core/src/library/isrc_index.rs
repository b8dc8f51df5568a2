use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::EngineError;
use crate::logbuf;

use super::tags;

const INDEX_TTL: Duration = Duration::from_secs(5 * 60);

/// ISRC (uppercase) -> absolute file path, for one output directory.
struct IsrcIndex {
    entries: RwLock<HashMap<String, PathBuf>>,
    built_at: Instant,
}

impl IsrcIndex {
    fn lookup(&self, isrc: &str) -> Option<PathBuf> {
        if isrc.is_empty() {
            return None;
        }
        self.entries
            .read()
            .expect("isrc index")
            .get(&isrc.to_uppercase())
            .cloned()
    }

    fn remove(&self, isrc: &str) {
        self.entries
            .write()
            .expect("isrc index")
            .remove(&isrc.to_uppercase());
    }

    fn add(&self, isrc: &str, path: &Path) {
        if isrc.is_empty() || path.as_os_str().is_empty() {
            return;
        }
        self.entries
            .write()
            .expect("isrc index")
            .insert(isrc.to_uppercase(), path.to_path_buf());
    }
}

// The global map lock is never held while an index's own lock is taken;
// indices are cloned out as Arcs first.
fn cache() -> &'static Mutex<HashMap<PathBuf, Arc<IsrcIndex>>> {
    static CACHE: OnceLock<Mutex<HashMap<PathBuf, Arc<IsrcIndex>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn build_index(output_dir: &Path) -> Arc<IsrcIndex> {
    let mut entries = HashMap::new();
    if !output_dir.as_os_str().is_empty() {
        let start = Instant::now();
        let mut file_count = 0usize;
        for entry in WalkDir::new(output_dir).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            // Duplicate detection only produces FLAC; other formats are
            // covered by the library scan instead.
            let is_flac = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("flac"))
                .unwrap_or(false);
            if !is_flac {
                continue;
            }
            let Ok(t) = tags::read_tags(path) else { continue };
            if t.isrc.is_empty() {
                continue;
            }
            entries.insert(t.isrc.to_uppercase(), path.to_path_buf());
            file_count += 1;
        }
        logbuf::debug(
            "ISRCIndex",
            format!(
                "built index for {}: {file_count} files in {:?}",
                output_dir.display(),
                start.elapsed()
            ),
        );
    }

    let idx = Arc::new(IsrcIndex {
        entries: RwLock::new(entries),
        built_at: Instant::now(),
    });
    cache()
        .lock()
        .expect("isrc cache")
        .insert(output_dir.to_path_buf(), idx.clone());
    idx
}

fn get_index(output_dir: &Path) -> Arc<IsrcIndex> {
    let cached = cache()
        .lock()
        .expect("isrc cache")
        .get(output_dir)
        .cloned();
    match cached {
        Some(idx) if idx.built_at.elapsed() < INDEX_TTL => idx,
        _ => build_index(output_dir),
    }
}

pub fn file_exists_non_empty(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Duplicate check: cached index lookup plus a liveness stat. Stale entries
/// (file deleted since the build) are removed so the next call misses.
pub fn check_isrc_exists(output_dir: &Path, isrc: &str) -> Option<PathBuf> {
    if isrc.is_empty() || output_dir.as_os_str().is_empty() {
        return None;
    }
    let idx = get_index(output_dir);
    let path = idx.lookup(isrc)?;
    if !file_exists_non_empty(&path) {
        idx.remove(isrc);
        return None;
    }
    Some(path)
}

/// Post-download insertion, avoiding a full rescan. Only touches an index
/// that is already cached; a future rebuild will pick the file up anyway.
pub fn add_to_index(output_dir: &Path, isrc: &str, path: &Path) {
    if output_dir.as_os_str().is_empty() || isrc.is_empty() || path.as_os_str().is_empty() {
        return;
    }
    let cached = cache()
        .lock()
        .expect("isrc cache")
        .get(output_dir)
        .cloned();
    if let Some(idx) = cached {
        idx.add(isrc, path);
    }
}

pub fn invalidate_index(output_dir: &Path) {
    cache().lock().expect("isrc cache").remove(output_dir);
}

/// Warm-up entry point for the host (album/playlist screens).
pub fn prebuild_index(output_dir: &Path) -> Result<(), EngineError> {
    if output_dir.as_os_str().is_empty() {
        return Err(EngineError::InvalidRequest(
            "output directory is required".to_string(),
        ));
    }
    build_index(output_dir);
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExistenceProbe {
    pub isrc: String,
    #[serde(default)]
    pub track_name: String,
    #[serde(default)]
    pub artist_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileExistence {
    pub isrc: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub track_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub artist_name: String,
}

/// Batch existence check for the host's album/playlist UI: the index is
/// consulted once, then probes fan out with independent results.
pub async fn check_files_exist_parallel(
    output_dir: &Path,
    tracks: Vec<ExistenceProbe>,
) -> Vec<FileExistence> {
    let idx = get_index(output_dir);

    let mut handles = Vec::with_capacity(tracks.len());
    for probe in tracks {
        let idx = idx.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let mut result = FileExistence {
                isrc: probe.isrc.clone(),
                exists: false,
                file_path: None,
                track_name: probe.track_name,
                artist_name: probe.artist_name,
            };
            if let Some(path) = idx.lookup(&probe.isrc) {
                result.exists = true;
                result.file_path = Some(path.to_string_lossy().into_owned());
            }
            result
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        if let Ok(r) = handle.await {
            results.push(r);
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_lookup_and_stale_removal() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().to_path_buf();
        prebuild_index(&out_dir).unwrap();

        let file = out_dir.join("USRC17600001.flac");
        std::fs::write(&file, b"not-really-flac-but-non-empty").unwrap();
        add_to_index(&out_dir, "usrc17600001", &file);

        // Case-insensitive hit, idempotent across calls.
        let hit = check_isrc_exists(&out_dir, "USRC17600001").unwrap();
        assert_eq!(hit, file);
        assert_eq!(check_isrc_exists(&out_dir, "USRC17600001").unwrap(), file);

        // Deleting the file makes the entry stale: first lookup misses and
        // self-corrects the index.
        std::fs::remove_file(&file).unwrap();
        assert!(check_isrc_exists(&out_dir, "USRC17600001").is_none());
        assert!(check_isrc_exists(&out_dir, "USRC17600001").is_none());

        invalidate_index(&out_dir);
    }

    #[test]
    fn empty_inputs_miss() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_isrc_exists(dir.path(), "").is_none());
        assert!(check_isrc_exists(Path::new(""), "USRC17600001").is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn parallel_existence_probe() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().to_path_buf();
        prebuild_index(&out_dir).unwrap();

        let file = out_dir.join("a.flac");
        std::fs::write(&file, b"x").unwrap();
        add_to_index(&out_dir, "AAAA00000001", &file);

        let probes = vec![
            ExistenceProbe {
                isrc: "AAAA00000001".into(),
                track_name: "A".into(),
                artist_name: "X".into(),
            },
            ExistenceProbe {
                isrc: "BBBB00000002".into(),
                track_name: "B".into(),
                artist_name: "Y".into(),
            },
        ];
        let results = check_files_exist_parallel(&out_dir, probes).await;
        assert_eq!(results.len(), 2);
        let a = results.iter().find(|r| r.isrc == "AAAA00000001").unwrap();
        assert!(a.exists);
        let b = results.iter().find(|r| r.isrc == "BBBB00000002").unwrap();
        assert!(!b.exists);

        invalidate_index(&out_dir);
    }
}
