//! Plug-in lifecycle: archive validation, strict upgrade-only installs,
//! guest VM construction through the registered engine factory, and
//! serialised, timeout-bounded guest invocation.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::error::EngineError;
use crate::extensions::engine::{engine_factory, HostBridge, ScriptEngine};
use crate::extensions::manifest::{compare_versions, ExtensionManifest, ExtensionType};
use crate::extensions::paths::safe_archive_entry;
use crate::extensions::storage::{self, JsonStore, ENABLED_KEY};
use crate::logbuf;

const GUEST_CALL_TIMEOUT: Duration = Duration::from_secs(30);
const MANIFEST_FILE: &str = "manifest.json";
const ENTRY_SCRIPT: &str = "index.js";

struct LoadedExtension {
    manifest: ExtensionManifest,
    source_dir: PathBuf,
    data_dir: PathBuf,
    bridge: Arc<HostBridge>,
    engine: Mutex<Option<Arc<dyn ScriptEngine>>>,
    /// Serialises guest calls; plug-in VMs are single-threaded guests.
    call_lock: tokio::sync::Mutex<()>,
}

#[derive(Debug, Clone, Default)]
struct ManagerConfig {
    extensions_root: PathBuf,
    data_root: PathBuf,
    process_secret: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtensionInfo {
    pub name: String,
    pub display_name: String,
    pub version: String,
    pub author: String,
    pub description: String,
    pub types: Vec<ExtensionType>,
    pub enabled: bool,
    pub loaded: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub quality_options: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpgradeCheck {
    pub name: String,
    pub current_version: String,
    pub new_version: String,
    pub is_upgrade: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingAuth {
    pub extension: String,
    pub url: String,
}

pub struct ExtensionManager {
    config: Mutex<ManagerConfig>,
    extensions: RwLock<HashMap<String, Arc<LoadedExtension>>>,
}

pub fn manager() -> &'static ExtensionManager {
    static MANAGER: OnceLock<ExtensionManager> = OnceLock::new();
    MANAGER.get_or_init(ExtensionManager::new)
}

impl ExtensionManager {
    pub fn new() -> Self {
        Self {
            config: Mutex::new(ManagerConfig::default()),
            extensions: RwLock::new(HashMap::new()),
        }
    }

    /// Host-supplied roots and the device secret credentials are derived
    /// from. Must be called before any install or load.
    pub fn configure(&self, extensions_root: &Path, data_root: &Path, process_secret: &str) {
        let mut config = self.config.lock().expect("manager config");
        config.extensions_root = extensions_root.to_path_buf();
        config.data_root = data_root.to_path_buf();
        config.process_secret = process_secret.to_string();
    }

    fn config(&self) -> Result<ManagerConfig, EngineError> {
        let config = self.config.lock().expect("manager config").clone();
        if config.extensions_root.as_os_str().is_empty() || config.data_root.as_os_str().is_empty() {
            return Err(EngineError::Extension(
                "extension directories are not configured".to_string(),
            ));
        }
        Ok(config)
    }

    fn get(&self, name: &str) -> Result<Arc<LoadedExtension>, EngineError> {
        self.extensions
            .read()
            .expect("extensions map")
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::Extension(format!("extension not installed: {name}")))
    }

    // ---- archive handling ----

    fn read_archive(archive_path: &Path) -> Result<Vec<(PathBuf, Vec<u8>)>, EngineError> {
        let ext = archive_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if ext != "zip" {
            return Err(EngineError::Extension(format!(
                "unsupported archive type: .{ext}"
            )));
        }

        let file = std::fs::File::open(archive_path)?;
        let mut zip = zip::ZipArchive::new(file)
            .map_err(|e| EngineError::Extension(format!("failed to open archive: {e}")))?;

        let mut entries = Vec::new();
        for i in 0..zip.len() {
            let mut entry = zip
                .by_index(i)
                .map_err(|e| EngineError::Extension(format!("failed to read archive entry: {e}")))?;
            if entry.is_dir() {
                continue;
            }
            let rel = safe_archive_entry(entry.name())?;
            let mut data = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut data)?;
            entries.push((rel, data));
        }
        Ok(entries)
    }

    fn archive_manifest(entries: &[(PathBuf, Vec<u8>)]) -> Result<ExtensionManifest, EngineError> {
        let manifest_data = entries
            .iter()
            .find(|(p, _)| p == Path::new(MANIFEST_FILE))
            .map(|(_, d)| d)
            .ok_or_else(|| EngineError::Extension("archive has no manifest.json".to_string()))?;
        if !entries.iter().any(|(p, _)| p == Path::new(ENTRY_SCRIPT)) {
            return Err(EngineError::Extension("archive has no index.js".to_string()));
        }
        ExtensionManifest::parse(manifest_data)
    }

    fn extract_to(
        entries: &[(PathBuf, Vec<u8>)],
        target: &Path,
    ) -> Result<(), EngineError> {
        for (rel, data) in entries {
            let dest = target.join(rel);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(dest, data)?;
        }
        Ok(())
    }

    /// Compare an archive against the installed version without touching it.
    pub fn check_upgrade(&self, archive_path: &Path) -> Result<UpgradeCheck, EngineError> {
        let entries = Self::read_archive(archive_path)?;
        let manifest = Self::archive_manifest(&entries)?;
        let current = self
            .extensions
            .read()
            .expect("extensions map")
            .get(&manifest.name)
            .map(|e| e.manifest.version.clone())
            .unwrap_or_default();
        let is_upgrade = !current.is_empty()
            && compare_versions(&manifest.version, &current) == std::cmp::Ordering::Greater;
        Ok(UpgradeCheck {
            name: manifest.name,
            current_version: current,
            new_version: manifest.version,
            is_upgrade,
        })
    }

    // ---- lifecycle ----

    /// Install a plug-in archive. Same-name installs are strict upgrade-only:
    /// an equal or lower version is rejected, a higher one is delegated to
    /// `upgrade`. New installs start disabled.
    pub async fn install(&self, archive_path: &Path) -> Result<ExtensionInfo, EngineError> {
        let config = self.config()?;
        let entries = Self::read_archive(archive_path)?;
        let manifest = Self::archive_manifest(&entries)?;
        let name = manifest.name.clone();

        let installed_version = self
            .extensions
            .read()
            .expect("extensions map")
            .get(&name)
            .map(|e| e.manifest.version.clone());
        if let Some(current) = installed_version {
            return match compare_versions(&manifest.version, &current) {
                std::cmp::Ordering::Greater => self.upgrade(archive_path).await,
                std::cmp::Ordering::Equal => Err(EngineError::Extension(format!(
                    "extension {name} v{current} is already installed"
                ))),
                std::cmp::Ordering::Less => Err(EngineError::Extension(format!(
                    "downgrade rejected: installed v{current}, archive v{}",
                    manifest.version
                ))),
            };
        }

        let source_dir = config.extensions_root.join(&name);
        let data_dir = config.data_root.join(&name);
        Self::extract_to(&entries, &source_dir)?;
        std::fs::create_dir_all(&data_dir)?;
        storage::write_enabled(&data_dir, false)?;

        let loaded = self.load_from_dirs(manifest, source_dir, data_dir, &config)?;
        logbuf::info(
            "Extensions",
            format!("installed {name} v{}", loaded.manifest.version),
        );
        self.info_for(&loaded)
    }

    /// Replace an installed plug-in with a newer archive, preserving the
    /// enabled state and the data directory.
    pub async fn upgrade(&self, archive_path: &Path) -> Result<ExtensionInfo, EngineError> {
        let config = self.config()?;
        let entries = Self::read_archive(archive_path)?;
        let manifest = Self::archive_manifest(&entries)?;
        let name = manifest.name.clone();

        let existing = self.get(&name)?;
        if compare_versions(&manifest.version, &existing.manifest.version)
            != std::cmp::Ordering::Greater
        {
            return Err(EngineError::Extension(format!(
                "upgrade requires a higher version: installed v{}, archive v{}",
                existing.manifest.version, manifest.version
            )));
        }

        // Give the old guest a chance to flush state before teardown.
        let _ = self.invoke_optional(&name, "cleanup", &Value::Null).await;
        self.extensions.write().expect("extensions map").remove(&name);

        let source_dir = existing.source_dir.clone();
        let staging = config.extensions_root.join(format!(".staging-{name}"));
        let _ = std::fs::remove_dir_all(&staging);
        Self::extract_to(&entries, &staging)?;
        if source_dir.exists() {
            std::fs::remove_dir_all(&source_dir)?;
        }
        std::fs::rename(&staging, &source_dir)?;

        let loaded =
            self.load_from_dirs(manifest, source_dir, existing.data_dir.clone(), &config)?;
        logbuf::info(
            "Extensions",
            format!("upgraded {name} to v{}", loaded.manifest.version),
        );
        self.info_for(&loaded)
    }

    /// Load every plug-in found under the configured extensions root.
    /// Individual failures are logged and skipped, not fatal.
    pub fn load_installed(&self) -> Result<usize, EngineError> {
        let config = self.config()?;
        let Ok(dir) = std::fs::read_dir(&config.extensions_root) else {
            return Ok(0);
        };

        let mut count = 0usize;
        for entry in dir.filter_map(Result::ok) {
            let source_dir = entry.path();
            if !source_dir.is_dir() {
                continue;
            }
            if source_dir
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with('.'))
                .unwrap_or(true)
            {
                continue;
            }
            let manifest_path = source_dir.join(MANIFEST_FILE);
            let manifest = match std::fs::read(&manifest_path)
                .map_err(EngineError::from)
                .and_then(|d| ExtensionManifest::parse(&d))
            {
                Ok(m) => m,
                Err(err) => {
                    logbuf::warn(
                        "Extensions",
                        format!("skipping {}: {err}", source_dir.display()),
                    );
                    continue;
                }
            };
            let data_dir = config.data_root.join(&manifest.name);
            let _ = std::fs::create_dir_all(&data_dir);
            match self.load_from_dirs(manifest, source_dir, data_dir, &config) {
                Ok(_) => count += 1,
                Err(err) => logbuf::error("Extensions", format!("load failed: {err}")),
            }
        }
        Ok(count)
    }

    fn load_from_dirs(
        &self,
        manifest: ExtensionManifest,
        source_dir: PathBuf,
        data_dir: PathBuf,
        config: &ManagerConfig,
    ) -> Result<Arc<LoadedExtension>, EngineError> {
        let name = manifest.name.clone();
        let bridge = Arc::new(HostBridge::new(
            manifest.clone(),
            data_dir.clone(),
            &config.process_secret,
            tokio::runtime::Handle::try_current()
                .map_err(|_| EngineError::Extension("no tokio runtime for extensions".to_string()))?,
        ));

        let engine = match engine_factory() {
            Some(factory) => {
                let engine: Arc<dyn ScriptEngine> =
                    Arc::from(factory.create(&name, bridge.clone())?);
                let source = std::fs::read_to_string(source_dir.join(ENTRY_SCRIPT))?;
                // registerExtension must run during top-level evaluation;
                // load() reports its absence as an error.
                engine.load(&source)?;
                Some(engine)
            }
            None => None,
        };

        let loaded = Arc::new(LoadedExtension {
            manifest,
            source_dir,
            data_dir,
            bridge,
            engine: Mutex::new(engine),
            call_lock: tokio::sync::Mutex::new(()),
        });
        self.extensions
            .write()
            .expect("extensions map")
            .insert(name, loaded.clone());
        Ok(loaded)
    }

    /// Remove a plug-in: guest cleanup, VM teardown, then both directories.
    pub async fn remove(&self, name: &str) -> Result<(), EngineError> {
        let ext = self.get(name)?;
        let _ = self.invoke_optional(name, "cleanup", &Value::Null).await;
        self.extensions.write().expect("extensions map").remove(name);
        if ext.source_dir.exists() {
            std::fs::remove_dir_all(&ext.source_dir)?;
        }
        if ext.data_dir.exists() {
            std::fs::remove_dir_all(&ext.data_dir)?;
        }
        logbuf::info("Extensions", format!("removed {name}"));
        Ok(())
    }

    /// Unload every VM without touching the filesystem; cleanup hooks fire
    /// first. Called at process teardown.
    pub async fn unload_all(&self) {
        let names: Vec<String> = self
            .extensions
            .read()
            .expect("extensions map")
            .keys()
            .cloned()
            .collect();
        for name in names {
            let _ = self.invoke_optional(&name, "cleanup", &Value::Null).await;
        }
        self.extensions.write().expect("extensions map").clear();
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), EngineError> {
        let ext = self.get(name)?;
        storage::write_enabled(&ext.data_dir, enabled)?;
        logbuf::info(
            "Extensions",
            format!("{name} {}", if enabled { "enabled" } else { "disabled" }),
        );
        Ok(())
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.get(name)
            .map(|e| storage::read_enabled(&e.data_dir))
            .unwrap_or(false)
    }

    fn info_for(&self, ext: &LoadedExtension) -> Result<ExtensionInfo, EngineError> {
        Ok(ExtensionInfo {
            name: ext.manifest.name.clone(),
            display_name: if ext.manifest.display_name.is_empty() {
                ext.manifest.name.clone()
            } else {
                ext.manifest.display_name.clone()
            },
            version: ext.manifest.version.clone(),
            author: ext.manifest.author.clone(),
            description: ext.manifest.description.clone(),
            types: ext.manifest.types.clone(),
            enabled: storage::read_enabled(&ext.data_dir),
            loaded: ext.engine.lock().expect("engine slot").is_some(),
            quality_options: ext
                .manifest
                .quality_options
                .iter()
                .map(|q| q.id.clone())
                .collect(),
        })
    }

    pub fn list(&self) -> Vec<ExtensionInfo> {
        let map = self.extensions.read().expect("extensions map");
        let mut out: Vec<ExtensionInfo> = map
            .values()
            .filter_map(|e| self.info_for(e).ok())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Enabled download-provider names, in listing order; the orchestrator
    /// consults this when building its provider chain.
    pub fn enabled_download_providers(&self) -> Vec<String> {
        self.list()
            .into_iter()
            .filter(|e| e.enabled && e.loaded)
            .filter(|e| e.types.contains(&ExtensionType::DownloadProvider))
            .map(|e| e.name)
            .collect()
    }

    // ---- settings ----

    pub fn get_settings(&self, name: &str) -> Result<Value, EngineError> {
        let ext = self.get(name)?;
        let mut map = JsonStore::settings(&ext.data_dir).get_all();
        map.remove(ENABLED_KEY);
        Ok(serde_json::to_value(map)?)
    }

    pub fn set_setting(&self, name: &str, key: &str, value: Value) -> Result<(), EngineError> {
        if key == ENABLED_KEY {
            return Err(EngineError::Extension(
                "use the enable/disable API for the enabled flag".to_string(),
            ));
        }
        let ext = self.get(name)?;
        JsonStore::settings(&ext.data_dir).set(key, value)
    }

    // ---- auth plumbing ----

    /// First parked auth URL across all plug-ins, consumed on read.
    pub fn take_pending_auth(&self) -> Option<PendingAuth> {
        let map = self.extensions.read().expect("extensions map");
        for (name, ext) in map.iter() {
            if let Some(url) = ext.bridge.take_pending_auth_url() {
                return Some(PendingAuth {
                    extension: name.clone(),
                    url,
                });
            }
        }
        None
    }

    pub fn complete_auth(&self, name: &str, code: &str) -> Result<(), EngineError> {
        let ext = self.get(name)?;
        ext.bridge.set_auth_code(code);
        Ok(())
    }

    // ---- guest invocation ----

    async fn run_engine_call(
        &self,
        ext: &Arc<LoadedExtension>,
        method: String,
        args: Value,
    ) -> Result<Value, EngineError> {
        let engine = ext
            .engine
            .lock()
            .expect("engine slot")
            .clone()
            .ok_or_else(|| {
                EngineError::Extension(format!(
                    "extension {} has no script engine loaded",
                    ext.manifest.name
                ))
            })?;

        // One guest call at a time per plug-in, bounded to 30s, panics
        // contained by the blocking task boundary.
        let _serialised = ext.call_lock.lock().await;
        let name = ext.manifest.name.clone();
        let joined = tokio::time::timeout(
            GUEST_CALL_TIMEOUT,
            tokio::task::spawn_blocking(move || engine.invoke(&method, &args)),
        )
        .await;

        match joined {
            Err(_) => Err(EngineError::Extension(format!(
                "extension {name} call timed out after {}s",
                GUEST_CALL_TIMEOUT.as_secs()
            ))),
            Ok(Err(join_err)) if join_err.is_panic() => Err(EngineError::Extension(format!(
                "extension {name} panicked during a call"
            ))),
            Ok(Err(join_err)) => Err(EngineError::Extension(format!(
                "extension {name} call failed: {join_err}"
            ))),
            Ok(Ok(result)) => result,
        }
    }

    async fn invoke_optional(
        &self,
        name: &str,
        method: &str,
        args: &Value,
    ) -> Result<Value, EngineError> {
        let ext = self.get(name)?;
        let has = ext
            .engine
            .lock()
            .expect("engine slot")
            .as_ref()
            .map(|e| e.has_function(method))
            .unwrap_or(false);
        if !has {
            return Ok(Value::Null);
        }
        self.run_engine_call(&ext, method.to_string(), args.clone())
            .await
    }

    pub async fn initialize(&self, name: &str) -> Result<(), EngineError> {
        self.invoke_optional(name, "initialize", &Value::Null).await?;
        Ok(())
    }

    pub async fn cleanup(&self, name: &str) -> Result<(), EngineError> {
        self.invoke_optional(name, "cleanup", &Value::Null).await?;
        Ok(())
    }

    /// Invoke a manifest-declared action (settings buttons and the like). A
    /// guest failure disables the extension so a broken plug-in cannot wedge
    /// the pipeline.
    pub async fn invoke_action(
        &self,
        name: &str,
        action: &str,
        args: Value,
    ) -> Result<Value, EngineError> {
        let ext = self.get(name)?;
        if !storage::read_enabled(&ext.data_dir) {
            return Err(EngineError::Extension(format!(
                "extension {name} is disabled"
            )));
        }
        match self.run_engine_call(&ext, action.to_string(), args).await {
            Ok(result) => Ok(result),
            Err(err) => {
                logbuf::error(
                    "Extensions",
                    format!("{name}.{action} failed, disabling: {err}"),
                );
                let _ = storage::write_enabled(&ext.data_dir, false);
                Err(err)
            }
        }
    }

    /// Download-provider contract used by the orchestrator: the guest's
    /// `resolveTrack` receives the track criteria and answers with a stream
    /// URL plus format metadata.
    pub async fn resolve_track(
        &self,
        name: &str,
        criteria: Value,
    ) -> Result<crate::delivery::StreamDescriptor, EngineError> {
        let ext = self.get(name)?;
        if !storage::read_enabled(&ext.data_dir) {
            return Err(EngineError::Extension(format!(
                "extension {name} is disabled"
            )));
        }
        if !ext.manifest.is_download_provider() {
            return Err(EngineError::Extension(format!(
                "extension {name} is not a download provider"
            )));
        }

        let result = self
            .run_engine_call(&ext, "resolveTrack".to_string(), criteria)
            .await?;
        let url = result
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if url.is_empty() {
            return Err(EngineError::NotFound(format!(
                "extension {name} could not find the track"
            )));
        }
        Ok(crate::delivery::StreamDescriptor {
            url,
            format: result
                .get("format")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            bitrate_kbps: result.get("bitrate").and_then(Value::as_u64).unwrap_or(0) as u32,
            bit_depth: result.get("bitDepth").and_then(Value::as_u64).unwrap_or(0) as u32,
            sample_rate: result.get("sampleRate").and_then(Value::as_u64).unwrap_or(0) as u32,
            decryption_key: result
                .get("decryptionKey")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            file_name: result
                .get("fileName")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            ..Default::default()
        })
    }
}

impl Default for ExtensionManager {
    fn default() -> Self {
        Self::new()
    }
}
