use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionType {
    MetadataProvider,
    DownloadProvider,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingType {
    String,
    Number,
    Boolean,
    Select,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtensionPermissions {
    /// Allowed network domains, exact or `*.suffix`.
    #[serde(default)]
    pub network: Vec<String>,
    #[serde(default)]
    pub storage: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionSetting {
    pub key: String,
    #[serde(rename = "type")]
    pub setting_type: SettingType,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub secret: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityOption {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub settings: Vec<ExtensionSetting>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchBehavior {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub placeholder: String,
    #[serde(default)]
    pub primary: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub icon: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub thumbnail_ratio: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackMatching {
    #[serde(default)]
    pub custom_matching: bool,
    /// "isrc", "name", "duration", "custom"
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub strategy: String,
    #[serde(default)]
    pub duration_tolerance: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostProcessingHook {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub default_enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_formats: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostProcessing {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<PostProcessingHook>,
}

/// Parsed `manifest.json` of one plug-in package.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionManifest {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    pub version: String,
    pub author: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub homepage: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub icon: String,
    #[serde(rename = "type")]
    pub types: Vec<ExtensionType>,
    #[serde(default)]
    pub permissions: ExtensionPermissions,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub settings: Vec<ExtensionSetting>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quality_options: Vec<QualityOption>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub min_app_version: String,
    #[serde(default)]
    pub skip_metadata_enrichment: bool,
    #[serde(default)]
    pub skip_built_in_fallback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_behavior: Option<SearchBehavior>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_matching: Option<TrackMatching>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_processing: Option<PostProcessing>,
}

impl ExtensionManifest {
    pub fn parse(data: &[u8]) -> Result<Self, EngineError> {
        let manifest: ExtensionManifest = serde_json::from_slice(data)
            .map_err(|e| EngineError::Extension(format!("failed to parse manifest JSON: {e}")))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let required = [
            ("name", &self.name),
            ("version", &self.version),
            ("author", &self.author),
            ("description", &self.description),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(EngineError::Extension(format!(
                    "manifest validation error: {field} is required"
                )));
            }
        }
        if self.types.is_empty() {
            return Err(EngineError::Extension(
                "manifest validation error: at least one type is required".to_string(),
            ));
        }
        for (i, setting) in self.settings.iter().enumerate() {
            if setting.key.trim().is_empty() {
                return Err(EngineError::Extension(format!(
                    "manifest validation error: settings[{i}].key is required"
                )));
            }
            if setting.setting_type == SettingType::Select && setting.options.is_empty() {
                return Err(EngineError::Extension(format!(
                    "manifest validation error: settings[{i}] select type requires options"
                )));
            }
        }
        Ok(())
    }

    pub fn has_type(&self, t: ExtensionType) -> bool {
        self.types.contains(&t)
    }

    pub fn is_metadata_provider(&self) -> bool {
        self.has_type(ExtensionType::MetadataProvider)
    }

    pub fn is_download_provider(&self) -> bool {
        self.has_type(ExtensionType::DownloadProvider)
    }

    /// Network allow-list check: exact match or `*.suffix` wildcard.
    pub fn is_domain_allowed(&self, domain: &str) -> bool {
        let domain = domain.trim().to_ascii_lowercase();
        if domain.is_empty() {
            return false;
        }
        for allowed in &self.permissions.network {
            let allowed = allowed.trim().to_ascii_lowercase();
            if allowed == domain {
                return true;
            }
            if let Some(suffix) = allowed.strip_prefix('*') {
                if domain.ends_with(suffix) {
                    return true;
                }
            }
        }
        false
    }
}

/// SemVer-ish comparison over dotted numeric segments; missing segments
/// count as zero, non-numeric segments compare as zero.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.trim()
            .trim_start_matches('v')
            .split('.')
            .map(|part| {
                part.chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect::<String>()
                    .parse()
                    .unwrap_or(0)
            })
            .collect()
    };
    let va = parse(a);
    let vb = parse(b);
    let len = va.len().max(vb.len());
    for i in 0..len {
        let x = va.get(i).copied().unwrap_or(0);
        let y = vb.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_manifest() -> &'static str {
        r#"{
            "name": "demo-source",
            "displayName": "Demo Source",
            "version": "1.2.0",
            "author": "someone",
            "description": "a demo",
            "type": ["download_provider"],
            "permissions": {"network": ["api.example.com", "*.cdn.example.com"], "storage": true}
        }"#
    }

    #[test]
    fn parses_and_validates() {
        let manifest = ExtensionManifest::parse(minimal_manifest().as_bytes()).unwrap();
        assert_eq!(manifest.name, "demo-source");
        assert!(manifest.is_download_provider());
        assert!(!manifest.is_metadata_provider());
        assert!(manifest.permissions.storage);
    }

    #[test]
    fn rejects_missing_fields() {
        assert!(ExtensionManifest::parse(br#"{"name":"x"}"#).is_err());
        assert!(ExtensionManifest::parse(
            br#"{"name":"x","version":"1","author":"a","description":"d","type":[]}"#
        )
        .is_err());
    }

    #[test]
    fn rejects_select_without_options() {
        let raw = r#"{
            "name": "x", "version": "1", "author": "a", "description": "d",
            "type": ["metadata_provider"],
            "settings": [{"key": "mode", "type": "select", "label": "Mode"}]
        }"#;
        assert!(ExtensionManifest::parse(raw.as_bytes()).is_err());
    }

    #[test]
    fn domain_allow_list_matching() {
        let manifest = ExtensionManifest::parse(minimal_manifest().as_bytes()).unwrap();
        assert!(manifest.is_domain_allowed("api.example.com"));
        assert!(manifest.is_domain_allowed("API.Example.COM"));
        assert!(manifest.is_domain_allowed("img.cdn.example.com"));
        assert!(!manifest.is_domain_allowed("example.com"));
        assert!(!manifest.is_domain_allowed("evil.com"));
        assert!(!manifest.is_domain_allowed(""));
    }

    #[test]
    fn version_comparison() {
        assert_eq!(compare_versions("1.2.0", "1.2.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.10.0", "1.9.9"), Ordering::Greater);
        assert_eq!(compare_versions("2.0", "2.0.1"), Ordering::Less);
        assert_eq!(compare_versions("v1.3", "1.2.9"), Ordering::Greater);
    }
}
