//! Extension lifecycle against a scripted fake engine: archive validation,
//! strict upgrade-only versioning, capability scoping and the
//! failure-disables-extension contract.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};

use aria_core::extensions::{
    self, ExtensionManager, HostBridge, ScriptEngine, ScriptEngineFactory,
};
use aria_core::EngineError;

struct FakeEngine {
    bridge: Arc<HostBridge>,
}

const KNOWN_FUNCTIONS: &[&str] = &[
    "initialize",
    "cleanup",
    "ping",
    "resolveTrack",
    "fetchPrivate",
    "useStorage",
];

impl ScriptEngine for FakeEngine {
    fn load(&self, source: &str) -> Result<(), EngineError> {
        if source.contains("registerExtension(") {
            Ok(())
        } else {
            Err(EngineError::Extension(
                "script never called registerExtension".to_string(),
            ))
        }
    }

    fn invoke(&self, name: &str, args: &Value) -> Result<Value, EngineError> {
        match name {
            "initialize" | "cleanup" => Ok(Value::Null),
            "ping" => Ok(json!("pong")),
            "resolveTrack" => Ok(json!({
                "url": format!(
                    "https://cdn.example.com/{}.flac",
                    args.get("isrc").and_then(Value::as_str).unwrap_or("unknown")
                ),
                "format": "flac",
                "bitDepth": 16,
                "sampleRate": 44100,
            })),
            // A guest trying to reach link-local metadata through its own
            // http capability.
            "fetchPrivate" => self
                .bridge
                .call("http.get", &json!({"url": "http://169.254.169.254/latest/meta-data"})),
            "useStorage" => {
                self.bridge
                    .call("storage.set", &json!({"key": "counter", "value": 41}))?;
                self.bridge.call("storage.get", &json!({"key": "counter"}))
            }
            other => Err(EngineError::Extension(format!("unknown function: {other}"))),
        }
    }

    fn has_function(&self, name: &str) -> bool {
        KNOWN_FUNCTIONS.contains(&name)
    }
}

struct FakeFactory;

impl ScriptEngineFactory for FakeFactory {
    fn create(
        &self,
        _ext_name: &str,
        bridge: Arc<HostBridge>,
    ) -> Result<Box<dyn ScriptEngine>, EngineError> {
        Ok(Box::new(FakeEngine { bridge }))
    }
}

fn install_factory() {
    extensions::set_engine_factory(Arc::new(FakeFactory));
}

fn write_archive(path: &Path, entries: &[(&str, &str)]) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (name, content) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

fn manifest_json(name: &str, version: &str) -> String {
    json!({
        "name": name,
        "displayName": "Demo Provider",
        "version": version,
        "author": "tester",
        "description": "a download provider for tests",
        "type": ["download_provider"],
        "permissions": {"network": ["api.example.com"], "storage": true}
    })
    .to_string()
}

fn build_extension_zip(dir: &Path, name: &str, version: &str) -> std::path::PathBuf {
    let path = dir.join(format!("{name}-{version}.zip"));
    write_archive(
        &path,
        &[
            ("manifest.json", &manifest_json(name, version)),
            ("index.js", "registerExtension({ name: 'demo' });\n"),
        ],
    );
    path
}

struct TestEnv {
    _root: tempfile::TempDir,
    manager: ExtensionManager,
    ext_dir: std::path::PathBuf,
    data_dir: std::path::PathBuf,
    archives: std::path::PathBuf,
}

fn env() -> TestEnv {
    install_factory();
    let root = tempfile::tempdir().unwrap();
    let ext_dir = root.path().join("extensions");
    let data_dir = root.path().join("data");
    let archives = root.path().join("archives");
    std::fs::create_dir_all(&archives).unwrap();
    let manager = ExtensionManager::new();
    manager.configure(&ext_dir, &data_dir, "device-secret");
    TestEnv {
        _root: root,
        manager,
        ext_dir,
        data_dir,
        archives,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn install_enable_invoke_lifecycle() {
    let env = env();
    let archive = build_extension_zip(&env.archives, "demo-provider", "1.0.0");

    let info = env.manager.install(&archive).await.unwrap();
    assert_eq!(info.name, "demo-provider");
    assert_eq!(info.version, "1.0.0");
    assert!(info.loaded);
    // New installs start disabled.
    assert!(!info.enabled);
    assert!(env.ext_dir.join("demo-provider/manifest.json").exists());
    assert!(env.ext_dir.join("demo-provider/index.js").exists());
    assert!(env.data_dir.join("demo-provider").is_dir());

    // Disabled extensions refuse actions.
    let err = env
        .manager
        .invoke_action("demo-provider", "ping", Value::Null)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("disabled"));

    env.manager.set_enabled("demo-provider", true).unwrap();
    env.manager.initialize("demo-provider").await.unwrap();
    let result = env
        .manager
        .invoke_action("demo-provider", "ping", Value::Null)
        .await
        .unwrap();
    assert_eq!(result, json!("pong"));

    // The guest's storage capability lands in the data directory.
    let stored = env
        .manager
        .invoke_action("demo-provider", "useStorage", Value::Null)
        .await
        .unwrap();
    assert_eq!(stored, json!(41));
    assert!(env.data_dir.join("demo-provider/storage.json").exists());

    assert_eq!(
        env.manager.enabled_download_providers(),
        vec!["demo-provider".to_string()]
    );

    env.manager.remove("demo-provider").await.unwrap();
    assert!(env.manager.list().is_empty());
    assert!(!env.ext_dir.join("demo-provider").exists());
    assert!(!env.data_dir.join("demo-provider").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn upgrade_is_strictly_monotonic_and_preserves_state() {
    let env = env();
    let v1 = build_extension_zip(&env.archives, "upgrader", "1.2.0");
    env.manager.install(&v1).await.unwrap();
    env.manager.set_enabled("upgrader", true).unwrap();
    env.manager
        .set_setting("upgrader", "region", json!("eu"))
        .unwrap();

    // Same version: rejected.
    let err = env.manager.install(&v1).await.unwrap_err();
    assert!(err.to_string().contains("already installed"));

    // Lower version: rejected.
    let v0 = build_extension_zip(&env.archives, "upgrader", "1.1.9");
    let err = env.manager.install(&v0).await.unwrap_err();
    assert!(err.to_string().contains("downgrade"));

    // Higher version through install() delegates to upgrade.
    let v2 = build_extension_zip(&env.archives, "upgrader", "2.0.0");
    let check = env.manager.check_upgrade(&v2).unwrap();
    assert!(check.is_upgrade);
    assert_eq!(check.current_version, "1.2.0");

    let info = env.manager.install(&v2).await.unwrap();
    assert_eq!(info.version, "2.0.0");
    // Enabled state and settings survive the swap.
    assert!(info.enabled);
    assert_eq!(
        env.manager.get_settings("upgrader").unwrap()["region"],
        json!("eu")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn archive_validation_rejects_bad_packages() {
    let env = env();

    // Wrong extension.
    let not_zip = env.archives.join("ext.rar");
    std::fs::write(&not_zip, b"whatever").unwrap();
    assert!(env.manager.install(&not_zip).await.is_err());

    // Missing index.js.
    let no_script = env.archives.join("noscript.zip");
    write_archive(&no_script, &[("manifest.json", &manifest_json("x", "1.0.0"))]);
    let err = env.manager.install(&no_script).await.unwrap_err();
    assert!(err.to_string().contains("index.js"));

    // Missing manifest.
    let no_manifest = env.archives.join("nomanifest.zip");
    write_archive(&no_manifest, &[("index.js", "registerExtension({})")]);
    let err = env.manager.install(&no_manifest).await.unwrap_err();
    assert!(err.to_string().contains("manifest.json"));

    // Path traversal in an entry name.
    let traversal = env.archives.join("traversal.zip");
    write_archive(
        &traversal,
        &[
            ("manifest.json", &manifest_json("evil", "1.0.0")),
            ("index.js", "registerExtension({})"),
            ("../evil.js", "boom"),
        ],
    );
    let err = env.manager.install(&traversal).await.unwrap_err();
    assert!(err.to_string().contains("escapes"), "{err}");

    // A script that never registers fails the load.
    let no_register = env.archives.join("noregister.zip");
    write_archive(
        &no_register,
        &[
            ("manifest.json", &manifest_json("lazy", "1.0.0")),
            ("index.js", "console.log('hello')"),
        ],
    );
    let err = env.manager.install(&no_register).await.unwrap_err();
    assert!(err.to_string().contains("registerExtension"), "{err}");
}

/// S6-adjacent: a guest reaching for link-local metadata through its own
/// http capability is denied before any connection, and the failing action
/// disables the extension.
#[tokio::test(flavor = "multi_thread")]
async fn guest_ssrf_attempt_is_denied_and_disables() {
    let env = env();
    let archive = build_extension_zip(&env.archives, "ssrf-probe", "1.0.0");
    env.manager.install(&archive).await.unwrap();
    env.manager.set_enabled("ssrf-probe", true).unwrap();

    let err = env
        .manager
        .invoke_action("ssrf-probe", "fetchPrivate", Value::Null)
        .await
        .unwrap_err();
    assert!(
        err.to_string().contains("private addresses"),
        "unexpected error: {err}"
    );
    assert!(!env.manager.is_enabled("ssrf-probe"));
}

#[tokio::test(flavor = "multi_thread")]
async fn resolve_track_contract_maps_to_descriptor() {
    let env = env();
    let archive = build_extension_zip(&env.archives, "stream-src", "1.0.0");
    env.manager.install(&archive).await.unwrap();
    env.manager.set_enabled("stream-src", true).unwrap();

    let descriptor = env
        .manager
        .resolve_track("stream-src", json!({"isrc": "USRC17600001"}))
        .await
        .unwrap();
    assert_eq!(descriptor.url, "https://cdn.example.com/USRC17600001.flac");
    assert_eq!(descriptor.format, "flac");
    assert_eq!(descriptor.bit_depth, 16);
    assert!(!descriptor.requires_decryption());

    // Disabled extensions do not resolve.
    env.manager.set_enabled("stream-src", false).unwrap();
    assert!(env
        .manager
        .resolve_track("stream-src", json!({}))
        .await
        .is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn unload_all_clears_the_registry() {
    let env = env();
    let a = build_extension_zip(&env.archives, "one", "1.0.0");
    let b = build_extension_zip(&env.archives, "two", "1.0.0");
    env.manager.install(&a).await.unwrap();
    env.manager.install(&b).await.unwrap();
    assert_eq!(env.manager.list().len(), 2);

    env.manager.unload_all().await;
    assert!(env.manager.list().is_empty());

    // Directories stay; a later load_installed picks them back up.
    let count = env.manager.load_installed().unwrap();
    assert_eq!(count, 2);
    assert_eq!(env.manager.list().len(), 2);
}
