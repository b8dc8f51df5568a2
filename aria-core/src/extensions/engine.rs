//! The script VM is an external collaborator: the engine crate only
//! prescribes the contract. A host-registered factory constructs one guest VM
//! per plug-in; every host capability the guest can reach goes through
//! [`HostBridge::call`], which validates domain, path and redirect policy at
//! the call boundary.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use md5::Md5;
use serde_json::{json, Value};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::EngineError;
use crate::extensions::credentials::{self, CredentialStore};
use crate::extensions::manifest::ExtensionManifest;
use crate::extensions::netguard::{self, GuestHttpRequest};
use crate::extensions::oauth::{self, AuthState, TokenExchangeRequest};
use crate::extensions::paths;
use crate::extensions::storage::JsonStore;
use crate::logbuf;
use crate::matching;

/// One loaded guest VM. Implementations are single-threaded interpreters;
/// the manager serialises calls through a per-plug-in mutex.
pub trait ScriptEngine: Send + Sync {
    /// Run the guest source top-level. The guest must call
    /// `registerExtension(obj)` during this evaluation; return an error if it
    /// never does.
    fn load(&self, source: &str) -> Result<(), EngineError>;

    /// Invoke a function the guest registered, with a JSON argument object.
    fn invoke(&self, name: &str, args: &Value) -> Result<Value, EngineError>;

    fn has_function(&self, name: &str) -> bool;
}

/// Constructs engines; registered once by the host binding.
pub trait ScriptEngineFactory: Send + Sync {
    fn create(
        &self,
        ext_name: &str,
        bridge: Arc<HostBridge>,
    ) -> Result<Box<dyn ScriptEngine>, EngineError>;
}

static FACTORY: OnceLock<Mutex<Option<Arc<dyn ScriptEngineFactory>>>> = OnceLock::new();

fn factory_slot() -> &'static Mutex<Option<Arc<dyn ScriptEngineFactory>>> {
    FACTORY.get_or_init(|| Mutex::new(None))
}

pub fn set_engine_factory(factory: Arc<dyn ScriptEngineFactory>) {
    *factory_slot().lock().expect("engine factory slot") = Some(factory);
}

pub fn engine_factory() -> Option<Arc<dyn ScriptEngineFactory>> {
    factory_slot().lock().expect("engine factory slot").clone()
}

/// Media operations (`ffmpeg.*`) are proxied to the host; the guest only
/// describes the transform.
pub trait MediaProxy: Send + Sync {
    fn execute(&self, operation: &str, args: &Value) -> Result<Value, EngineError>;
}

static MEDIA_PROXY: OnceLock<Mutex<Option<Arc<dyn MediaProxy>>>> = OnceLock::new();

fn media_proxy_slot() -> &'static Mutex<Option<Arc<dyn MediaProxy>>> {
    MEDIA_PROXY.get_or_init(|| Mutex::new(None))
}

pub fn set_media_proxy(proxy: Arc<dyn MediaProxy>) {
    *media_proxy_slot().lock().expect("media proxy slot") = Some(proxy);
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

fn arg_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, EngineError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::Extension(format!("missing argument: {key}")))
}

fn arg_str_or<'a>(args: &'a Value, key: &str, default: &'a str) -> &'a str {
    args.get(key).and_then(Value::as_str).unwrap_or(default)
}

/// The curated capability graph one plug-in sees. Everything is scoped: HTTP
/// to the manifest's domain allow-list, files to the data directory,
/// credentials to a per-plug-in key.
pub struct HostBridge {
    ext_name: String,
    manifest: ExtensionManifest,
    data_dir: PathBuf,
    guest_storage: JsonStore,
    credentials: CredentialStore,
    auth: Mutex<AuthState>,
    runtime: tokio::runtime::Handle,
}

impl HostBridge {
    pub fn new(
        manifest: ExtensionManifest,
        data_dir: PathBuf,
        process_secret: &str,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        let ext_name = manifest.name.clone();
        Self {
            guest_storage: JsonStore::guest_storage(&data_dir),
            credentials: CredentialStore::new(&data_dir, process_secret, &ext_name),
            auth: Mutex::new(AuthState::default()),
            ext_name,
            manifest,
            data_dir,
            runtime,
        }
    }

    pub fn ext_name(&self) -> &str {
        &self.ext_name
    }

    // Guest calls arrive on blocking threads (the manager wraps engine
    // invocations in spawn_blocking), where blocking on the runtime directly
    // would be context-dependent. Spawning onto the stored handle and
    // waiting on a channel is safe from any thread.
    fn block_on<F>(&self, fut: F) -> F::Output
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (tx, rx) = std::sync::mpsc::channel();
        self.runtime.spawn(async move {
            let _ = tx.send(fut.await);
        });
        rx.recv().expect("bridge task dropped")
    }

    pub fn manifest(&self) -> &ExtensionManifest {
        &self.manifest
    }

    fn log_tag(&self) -> String {
        format!("ext:{}", self.ext_name)
    }

    /// URL the host should open in an external browser, if a guest parked one.
    pub fn take_pending_auth_url(&self) -> Option<String> {
        self.auth.lock().expect("auth state").pending_auth_url.take()
    }

    /// Host-side completion of the external browser flow.
    pub fn set_auth_code(&self, code: &str) {
        let mut auth = self.auth.lock().expect("auth state");
        auth.auth_code = Some(code.to_string());
    }

    pub fn clear_auth(&self) {
        self.auth.lock().expect("auth state").clear();
    }

    /// Capability dispatch. `method` is `namespace.name` (`http.get`,
    /// `storage.set`, ...). Called from the engine's execution thread, which
    /// is a blocking thread, so async capabilities can block on the runtime.
    pub fn call(&self, method: &str, args: &Value) -> Result<Value, EngineError> {
        let (namespace, name) = method
            .split_once('.')
            .ok_or_else(|| EngineError::Extension(format!("unknown capability: {method}")))?;
        match namespace {
            "http" => self.call_http(name, args),
            "storage" => self.call_storage(name, args),
            "credentials" => self.call_credentials(name, args),
            "auth" => self.call_auth(name, args),
            "file" => self.call_file(name, args),
            "ffmpeg" => self.call_ffmpeg(name, args),
            "matching" => self.call_matching(name, args),
            "utils" => self.call_utils(name, args),
            "log" => {
                let message = arg_str_or(args, "message", "");
                match name {
                    "error" => logbuf::error(&self.log_tag(), message),
                    "warn" => logbuf::warn(&self.log_tag(), message),
                    "debug" => logbuf::debug(&self.log_tag(), message),
                    _ => logbuf::info(&self.log_tag(), message),
                }
                Ok(Value::Null)
            }
            other => Err(EngineError::Extension(format!(
                "unknown capability namespace: {other}"
            ))),
        }
    }

    fn call_http(&self, name: &str, args: &Value) -> Result<Value, EngineError> {
        let mut req: GuestHttpRequest = serde_json::from_value(args.clone())
            .map_err(|e| EngineError::Extension(format!("invalid http arguments: {e}")))?;
        match name {
            "get" | "post" | "put" | "patch" | "delete" => req.method = name.to_string(),
            "request" => {}
            other => {
                return Err(EngineError::Extension(format!("unknown http method: {other}")));
            }
        }
        let manifest = self.manifest.clone();
        let ext_name = self.ext_name.clone();
        let resp =
            self.block_on(async move { netguard::guest_request(&manifest, &ext_name, &req).await })?;
        Ok(serde_json::to_value(resp)?)
    }

    fn call_storage(&self, name: &str, args: &Value) -> Result<Value, EngineError> {
        if !self.manifest.permissions.storage {
            return Err(EngineError::Extension(
                "extension does not have the storage permission".to_string(),
            ));
        }
        let key = arg_str(args, "key")?;
        match name {
            "get" => Ok(self.guest_storage.get(key).unwrap_or(Value::Null)),
            "set" => {
                let value = args.get("value").cloned().unwrap_or(Value::Null);
                self.guest_storage.set(key, value)?;
                Ok(Value::Bool(true))
            }
            "remove" => {
                self.guest_storage.remove(key)?;
                Ok(Value::Bool(true))
            }
            other => Err(EngineError::Extension(format!("unknown storage method: {other}"))),
        }
    }

    fn call_credentials(&self, name: &str, args: &Value) -> Result<Value, EngineError> {
        let key = arg_str(args, "key")?;
        match name {
            "store" => {
                let value = arg_str(args, "value")?;
                self.credentials.store(key, value)?;
                Ok(Value::Bool(true))
            }
            "get" => Ok(self
                .credentials
                .get(key)?
                .map(Value::String)
                .unwrap_or(Value::Null)),
            "remove" => {
                self.credentials.remove(key)?;
                Ok(Value::Bool(true))
            }
            "has" => Ok(Value::Bool(self.credentials.has(key))),
            other => Err(EngineError::Extension(format!(
                "unknown credentials method: {other}"
            ))),
        }
    }

    fn call_auth(&self, name: &str, args: &Value) -> Result<Value, EngineError> {
        match name {
            "generatePKCE" | "startOAuthWithPKCE" => {
                let pair = oauth::generate_pkce();
                let mut auth = self.auth.lock().expect("auth state");
                auth.pkce = Some(pair.clone());
                if name == "startOAuthWithPKCE" {
                    let auth_url = arg_str(args, "url")?;
                    oauth::validate_auth_url(auth_url)?;
                    auth.pending_auth_url = Some(auth_url.to_string());
                    logbuf::info(&self.log_tag(), "OAuth flow started, waiting for host");
                }
                Ok(json!({
                    "verifier": pair.verifier,
                    "challenge": pair.challenge,
                    "method": pair.method,
                }))
            }
            "getPKCE" => {
                let auth = self.auth.lock().expect("auth state");
                Ok(auth
                    .pkce
                    .as_ref()
                    .map(|p| {
                        json!({"verifier": p.verifier, "challenge": p.challenge, "method": p.method})
                    })
                    .unwrap_or(Value::Null))
            }
            "openAuthUrl" => {
                let auth_url = arg_str(args, "url")?;
                oauth::validate_auth_url(auth_url)?;
                let mut auth = self.auth.lock().expect("auth state");
                auth.pending_auth_url = Some(auth_url.to_string());
                logbuf::info(&self.log_tag(), "auth URL parked for the host to open");
                Ok(Value::Bool(true))
            }
            "getAuthCode" => {
                let auth = self.auth.lock().expect("auth state");
                Ok(auth
                    .auth_code
                    .clone()
                    .map(Value::String)
                    .unwrap_or(Value::Null))
            }
            "setAuthCode" => {
                let code = arg_str(args, "code")?;
                self.auth.lock().expect("auth state").auth_code = Some(code.to_string());
                Ok(Value::Bool(true))
            }
            "clearAuth" => {
                self.clear_auth();
                Ok(Value::Bool(true))
            }
            "isAuthenticated" => {
                let auth = self.auth.lock().expect("auth state");
                Ok(Value::Bool(auth.is_authenticated()))
            }
            "getTokens" => {
                let auth = self.auth.lock().expect("auth state");
                Ok(auth
                    .tokens
                    .as_ref()
                    .map(|t| serde_json::to_value(t).unwrap_or(Value::Null))
                    .unwrap_or(Value::Null))
            }
            "exchangeCodeWithPKCE" => {
                let req: TokenExchangeRequest = serde_json::from_value(args.clone())
                    .map_err(|e| EngineError::Extension(format!("invalid exchange arguments: {e}")))?;
                let verifier = {
                    let auth = self.auth.lock().expect("auth state");
                    auth.pkce.as_ref().map(|p| p.verifier.clone()).unwrap_or_default()
                };
                let manifest = self.manifest.clone();
                let tokens = self.block_on(async move {
                    oauth::exchange_code_with_pkce(&manifest, &req, &verifier).await
                })?;
                let out = serde_json::to_value(&tokens)?;
                self.auth.lock().expect("auth state").tokens = Some(tokens);
                Ok(out)
            }
            other => Err(EngineError::Extension(format!("unknown auth method: {other}"))),
        }
    }

    fn call_file(&self, name: &str, args: &Value) -> Result<Value, EngineError> {
        let path = paths::validate_path(&self.data_dir, arg_str(args, "path")?)?;
        match name {
            "exists" => Ok(Value::Bool(path.exists())),
            "getSize" => Ok(std::fs::metadata(&path)
                .map(|m| Value::from(m.len()))
                .unwrap_or(Value::from(0u64))),
            "read" => {
                let data = std::fs::read(&path)?;
                Ok(Value::String(String::from_utf8_lossy(&data).into_owned()))
            }
            "write" => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&path, arg_str_or(args, "content", ""))?;
                Ok(Value::Bool(true))
            }
            "delete" => {
                if path.exists() {
                    std::fs::remove_file(&path)?;
                }
                Ok(Value::Bool(true))
            }
            "copy" | "move" => {
                let dest = paths::validate_path(&self.data_dir, arg_str(args, "dest")?)?;
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                if name == "copy" {
                    std::fs::copy(&path, &dest)?;
                } else {
                    std::fs::rename(&path, &dest)?;
                }
                Ok(Value::Bool(true))
            }
            "download" => {
                let req = GuestHttpRequest {
                    url: arg_str(args, "url")?.to_string(),
                    ..Default::default()
                };
                let manifest = self.manifest.clone();
                let ext_name = self.ext_name.clone();
                let resp = self
                    .block_on(async move { netguard::guest_request(&manifest, &ext_name, &req).await })?;
                if resp.status >= 400 {
                    return Err(EngineError::Extension(format!(
                        "download failed: HTTP {}",
                        resp.status
                    )));
                }
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&path, resp.body.as_bytes())?;
                Ok(json!({"path": path.to_string_lossy(), "size": resp.body.len()}))
            }
            other => Err(EngineError::Extension(format!("unknown file method: {other}"))),
        }
    }

    fn call_ffmpeg(&self, name: &str, args: &Value) -> Result<Value, EngineError> {
        match name {
            "execute" | "getInfo" | "convert" => {
                let proxy = media_proxy_slot().lock().expect("media proxy slot").clone();
                match proxy {
                    Some(p) => p.execute(name, args),
                    None => Err(EngineError::Extension(
                        "no media proxy registered by the host".to_string(),
                    )),
                }
            }
            other => Err(EngineError::Extension(format!("unknown ffmpeg method: {other}"))),
        }
    }

    fn call_matching(&self, name: &str, args: &Value) -> Result<Value, EngineError> {
        match name {
            "compareStrings" => {
                let a = arg_str(args, "a")?;
                let b = arg_str(args, "b")?;
                Ok(json!(matching::compare_strings(a, b)))
            }
            "compareDuration" => {
                let a = args.get("a").and_then(Value::as_f64).unwrap_or(0.0);
                let b = args.get("b").and_then(Value::as_f64).unwrap_or(0.0);
                let tolerance = args
                    .get("tolerance")
                    .and_then(Value::as_f64)
                    .unwrap_or(3.0);
                Ok(json!(matching::compare_duration(a, b, tolerance)))
            }
            "normalizeString" => {
                let value = arg_str(args, "value")?;
                Ok(json!(matching::normalize_loose_title(value)))
            }
            other => Err(EngineError::Extension(format!("unknown matching method: {other}"))),
        }
    }

    fn call_utils(&self, name: &str, args: &Value) -> Result<Value, EngineError> {
        let data = || arg_str(args, "data");
        match name {
            "base64Encode" => Ok(json!(B64.encode(data()?))),
            "base64Decode" => {
                let decoded = B64
                    .decode(data()?.trim())
                    .map_err(|_| EngineError::Extension("invalid base64".to_string()))?;
                Ok(json!(String::from_utf8_lossy(&decoded).into_owned()))
            }
            "md5" => Ok(json!(hex(Md5::digest(data()?.as_bytes()).as_slice()))),
            "sha256" => Ok(json!(hex(Sha256::digest(data()?.as_bytes()).as_slice()))),
            "hmacSHA1" => {
                let mut mac = Hmac::<Sha1>::new_from_slice(arg_str(args, "key")?.as_bytes())
                    .map_err(|_| EngineError::Extension("invalid hmac key".to_string()))?;
                mac.update(data()?.as_bytes());
                Ok(json!(hex(mac.finalize().into_bytes().as_slice())))
            }
            "hmacSHA256" | "hmacSHA256Base64" => {
                let mut mac = Hmac::<Sha256>::new_from_slice(arg_str(args, "key")?.as_bytes())
                    .map_err(|_| EngineError::Extension("invalid hmac key".to_string()))?;
                mac.update(data()?.as_bytes());
                let digest = mac.finalize().into_bytes();
                if name == "hmacSHA256Base64" {
                    Ok(json!(B64.encode(digest)))
                } else {
                    Ok(json!(hex(digest.as_slice())))
                }
            }
            "parseJSON" => serde_json::from_str(data()?)
                .map_err(|e| EngineError::Extension(format!("invalid JSON: {e}"))),
            "stringifyJSON" => {
                let value = args.get("value").cloned().unwrap_or(Value::Null);
                Ok(json!(serde_json::to_string(&value)?))
            }
            "generateKey" => Ok(json!(credentials::generate_key())),
            "encrypt" => {
                let key = decode_key(arg_str(args, "key")?)?;
                Ok(json!(credentials::encrypt(&key, data()?.as_bytes())?))
            }
            "decrypt" => {
                let key = decode_key(arg_str(args, "key")?)?;
                let plain = credentials::decrypt(&key, data()?)?;
                Ok(json!(String::from_utf8_lossy(&plain).into_owned()))
            }
            other => Err(EngineError::Extension(format!("unknown utils method: {other}"))),
        }
    }
}

fn decode_key(key_b64: &str) -> Result<[u8; 32], EngineError> {
    let raw = B64
        .decode(key_b64.trim())
        .map_err(|_| EngineError::Extension("key is not valid base64".to_string()))?;
    raw.try_into()
        .map_err(|_| EngineError::Extension("key must be 32 bytes".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge(dir: &std::path::Path, rt: tokio::runtime::Handle) -> HostBridge {
        let manifest = ExtensionManifest::parse(
            br#"{"name":"bridge-test","version":"1.0.0","author":"a","description":"d",
                 "type":["download_provider"],
                 "permissions":{"network":["api.example.com"],"storage":true}}"#,
        )
        .unwrap();
        HostBridge::new(manifest, dir.to_path_buf(), "proc-secret", rt)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn storage_and_credentials_capabilities() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge(dir.path(), tokio::runtime::Handle::current());

        bridge
            .call("storage.set", &json!({"key": "k", "value": {"n": 1}}))
            .unwrap();
        assert_eq!(
            bridge.call("storage.get", &json!({"key": "k"})).unwrap(),
            json!({"n": 1})
        );
        bridge.call("storage.remove", &json!({"key": "k"})).unwrap();
        assert_eq!(
            bridge.call("storage.get", &json!({"key": "k"})).unwrap(),
            Value::Null
        );

        bridge
            .call("credentials.store", &json!({"key": "tok", "value": "secret"}))
            .unwrap();
        assert_eq!(
            bridge.call("credentials.has", &json!({"key": "tok"})).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            bridge.call("credentials.get", &json!({"key": "tok"})).unwrap(),
            json!("secret")
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn file_capability_is_sandboxed() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge(dir.path(), tokio::runtime::Handle::current());

        bridge
            .call("file.write", &json!({"path": "notes/a.txt", "content": "hi"}))
            .unwrap();
        assert_eq!(
            bridge.call("file.read", &json!({"path": "notes/a.txt"})).unwrap(),
            json!("hi")
        );
        assert_eq!(
            bridge.call("file.getSize", &json!({"path": "notes/a.txt"})).unwrap(),
            json!(2)
        );

        let err = bridge
            .call("file.read", &json!({"path": "../../etc/passwd"}))
            .unwrap_err();
        assert!(err.to_string().contains("escapes the sandbox"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn utils_digests() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge(dir.path(), tokio::runtime::Handle::current());

        assert_eq!(
            bridge.call("utils.md5", &json!({"data": "abc"})).unwrap(),
            json!("900150983cd24fb0d6963f7d28e17f72")
        );
        assert_eq!(
            bridge.call("utils.sha256", &json!({"data": "abc"})).unwrap(),
            json!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
        assert_eq!(
            bridge.call("utils.base64Encode", &json!({"data": "hi"})).unwrap(),
            json!("aGk=")
        );
        assert_eq!(
            bridge.call("utils.base64Decode", &json!({"data": "aGk="})).unwrap(),
            json!("hi")
        );

        let key = bridge.call("utils.generateKey", &json!({})).unwrap();
        let blob = bridge
            .call("utils.encrypt", &json!({"key": key, "data": "plain"}))
            .unwrap();
        assert_eq!(
            bridge
                .call("utils.decrypt", &json!({"key": key, "data": blob}))
                .unwrap(),
            json!("plain")
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn auth_pkce_flow() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge(dir.path(), tokio::runtime::Handle::current());

        let pkce = bridge.call("auth.generatePKCE", &json!({})).unwrap();
        assert_eq!(pkce["method"], "S256");
        assert_eq!(bridge.call("auth.getPKCE", &json!({})).unwrap(), pkce);

        bridge
            .call("auth.openAuthUrl", &json!({"url": "https://auth.example.com/authorize"}))
            .unwrap();
        assert_eq!(
            bridge.take_pending_auth_url().unwrap(),
            "https://auth.example.com/authorize"
        );
        assert!(bridge.take_pending_auth_url().is_none());

        assert!(bridge
            .call("auth.openAuthUrl", &json!({"url": "http://insecure.example.com/"}))
            .is_err());

        bridge.set_auth_code("the-code");
        assert_eq!(
            bridge.call("auth.getAuthCode", &json!({})).unwrap(),
            json!("the-code")
        );
        assert_eq!(
            bridge.call("auth.isAuthenticated", &json!({})).unwrap(),
            Value::Bool(false)
        );

        bridge.call("auth.clearAuth", &json!({})).unwrap();
        assert_eq!(bridge.call("auth.getAuthCode", &json!({})).unwrap(), Value::Null);
    }

    // Two workers: the bridge parks the calling worker while the request
    // future runs on another.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn http_capability_rejects_unlisted_domains() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge(dir.path(), tokio::runtime::Handle::current());

        let err = bridge
            .call("http.get", &json!({"url": "https://evil.com/x"}))
            .unwrap_err();
        assert!(err.to_string().contains("network permissions"));
    }
}
