//! Per-plug-in persistence: `settings.json` (host-visible settings plus the
//! reserved `_enabled` flag) and `storage.json` (the guest `storage.*`
//! capability, plain JSON values).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::EngineError;

pub const ENABLED_KEY: &str = "_enabled";

const SETTINGS_FILE: &str = "settings.json";
const STORAGE_FILE: &str = "storage.json";

fn read_map(path: &Path) -> BTreeMap<String, Value> {
    let Ok(data) = std::fs::read(path) else {
        return BTreeMap::new();
    };
    serde_json::from_slice(&data).unwrap_or_default()
}

fn write_map(path: &Path, map: &BTreeMap<String, Value>) -> Result<(), EngineError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_vec_pretty(map)?;
    // Write-then-rename keeps a crash from truncating the previous state.
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Flat key -> JSON value store backed by one file in the plug-in's data
/// directory.
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    pub fn settings(data_dir: &Path) -> Self {
        Self { path: data_dir.join(SETTINGS_FILE) }
    }

    pub fn guest_storage(data_dir: &Path) -> Self {
        Self { path: data_dir.join(STORAGE_FILE) }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        read_map(&self.path).get(key).cloned()
    }

    pub fn get_all(&self) -> BTreeMap<String, Value> {
        read_map(&self.path)
    }

    pub fn set(&self, key: &str, value: Value) -> Result<(), EngineError> {
        if key.trim().is_empty() {
            return Err(EngineError::Extension("storage key is required".to_string()));
        }
        let mut map = read_map(&self.path);
        map.insert(key.to_string(), value);
        write_map(&self.path, &map)
    }

    pub fn remove(&self, key: &str) -> Result<(), EngineError> {
        let mut map = read_map(&self.path);
        if map.remove(key).is_some() {
            write_map(&self.path, &map)?;
        }
        Ok(())
    }

    pub fn replace_all(&self, values: BTreeMap<String, Value>) -> Result<(), EngineError> {
        write_map(&self.path, &values)
    }
}

/// Enabled state, persisted in `settings.json` under the reserved key.
pub fn read_enabled(data_dir: &Path) -> bool {
    JsonStore::settings(data_dir)
        .get(ENABLED_KEY)
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

pub fn write_enabled(data_dir: &Path, enabled: bool) -> Result<(), EngineError> {
    JsonStore::settings(data_dir).set(ENABLED_KEY, Value::Bool(enabled))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_roundtrip_and_enabled_flag() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::settings(dir.path());

        assert!(store.get("region").is_none());
        store.set("region", Value::String("eu".into())).unwrap();
        store.set("limit", Value::from(5)).unwrap();
        assert_eq!(store.get("region").unwrap(), Value::String("eu".into()));
        assert_eq!(store.get_all().len(), 2);

        store.remove("limit").unwrap();
        assert!(store.get("limit").is_none());

        // New installs are disabled until the host opts in.
        assert!(!read_enabled(dir.path()));
        write_enabled(dir.path(), true).unwrap();
        assert!(read_enabled(dir.path()));

        // The enabled flag and ordinary settings share the file.
        let store = JsonStore::settings(dir.path());
        assert_eq!(store.get(ENABLED_KEY).unwrap(), Value::Bool(true));
        assert_eq!(store.get("region").unwrap(), Value::String("eu".into()));
    }

    #[test]
    fn guest_storage_is_a_separate_file() {
        let dir = tempfile::tempdir().unwrap();
        JsonStore::settings(dir.path())
            .set("a", Value::from(1))
            .unwrap();
        let guest = JsonStore::guest_storage(dir.path());
        assert!(guest.get("a").is_none());
        guest.set("a", Value::from(2)).unwrap();
        assert_eq!(guest.get("a").unwrap(), Value::from(2));
        assert_eq!(
            JsonStore::settings(dir.path()).get("a").unwrap(),
            Value::from(1)
        );
    }

    #[test]
    fn empty_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(JsonStore::settings(dir.path()).set(" ", Value::Null).is_err());
    }
}
