//! Sandboxed user-script plug-in surface: manifest-validated packages, a
//! capability-gated guest environment and strict upgrade-only lifecycle.
//! The interpreter itself is a host collaborator behind [`ScriptEngine`].

mod credentials;
mod engine;
pub mod manifest;
mod manager;
mod netguard;
mod oauth;
mod paths;
mod storage;

pub use credentials::CredentialStore;
pub use engine::{
    set_engine_factory, set_media_proxy, HostBridge, MediaProxy, ScriptEngine,
    ScriptEngineFactory,
};
pub use manager::{manager, ExtensionInfo, ExtensionManager, PendingAuth, UpgradeCheck};
pub use manifest::{compare_versions, ExtensionManifest, ExtensionType};
pub use netguard::{is_private_host, validate_guest_url, GuestHttpRequest, GuestHttpResponse};
pub use oauth::{generate_pkce, validate_auth_url, OAuthTokens, PkcePair};
pub use paths::validate_path;
pub use storage::JsonStore;
