//! OAuth state machine for the plug-in `auth.*` capability. PKCE with an
//! S256 challenge; the host opens the parked auth URL externally and feeds
//! the resulting code back in.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::OsRng;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64URL;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::EngineError;
use crate::extensions::manifest::ExtensionManifest;
use crate::extensions::netguard;

const VERIFIER_LEN: usize = 64; // within the RFC 7636 43..=128 window
const VERIFIER_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
    pub method: String,
}

pub fn generate_pkce() -> PkcePair {
    // Verifier bytes come from the OS CSPRNG; the verifier is a secret.
    let mut seed = [0u8; VERIFIER_LEN];
    OsRng.fill_bytes(&mut seed);
    let verifier: String = seed
        .iter()
        .map(|b| VERIFIER_ALPHABET[*b as usize % VERIFIER_ALPHABET.len()] as char)
        .collect();
    let challenge = B64URL.encode(Sha256::digest(verifier.as_bytes()));
    PkcePair {
        verifier,
        challenge,
        method: "S256".to_string(),
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub refresh_token: String,
    /// Unix seconds; 0 means no declared expiry.
    #[serde(default)]
    pub expires_at: u64,
}

impl OAuthTokens {
    pub fn is_expired(&self) -> bool {
        if self.expires_at == 0 {
            return false;
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        now >= self.expires_at
    }
}

/// Transient per-plug-in auth state; lives until unload or process exit.
#[derive(Debug, Clone, Default)]
pub struct AuthState {
    pub pkce: Option<PkcePair>,
    pub pending_auth_url: Option<String>,
    pub auth_code: Option<String>,
    pub tokens: Option<OAuthTokens>,
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        self.tokens
            .as_ref()
            .map(|t| !t.access_token.is_empty() && !t.is_expired())
            .unwrap_or(false)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Validate a URL the host will be asked to open in an external browser:
/// HTTPS only, no embedded credentials, never a loopback/private target.
pub fn validate_auth_url(raw_url: &str) -> Result<url::Url, EngineError> {
    let parsed = url::Url::parse(raw_url.trim())
        .map_err(|e| EngineError::Extension(format!("invalid auth URL: {e}")))?;
    if parsed.scheme() != "https" {
        return Err(EngineError::Extension(
            "auth URLs must use https".to_string(),
        ));
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(EngineError::Extension(
            "auth URLs must not embed credentials".to_string(),
        ));
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| EngineError::Extension("auth URL has no host".to_string()))?;
    if netguard::is_private_host(host) {
        return Err(EngineError::Extension(format!(
            "auth URLs must not point at private addresses: {host}"
        )));
    }
    Ok(parsed)
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenExchangeRequest {
    pub token_url: String,
    pub client_id: String,
    pub code: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default)]
    pub extra_params: std::collections::HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    expires_in: u64,
}

/// Authorization-code + PKCE exchange. The token endpoint must sit inside
/// the manifest's network allow-list like any other guest request.
pub async fn exchange_code_with_pkce(
    manifest: &ExtensionManifest,
    req: &TokenExchangeRequest,
    verifier: &str,
) -> Result<OAuthTokens, EngineError> {
    let token_url = netguard::validate_guest_url(manifest, &req.token_url)?;
    if verifier.is_empty() {
        return Err(EngineError::Extension(
            "no PKCE verifier; call generatePKCE first".to_string(),
        ));
    }

    let mut form: Vec<(&str, &str)> = vec![
        ("grant_type", "authorization_code"),
        ("client_id", &req.client_id),
        ("code", &req.code),
        ("code_verifier", verifier),
    ];
    if !req.redirect_uri.is_empty() {
        form.push(("redirect_uri", &req.redirect_uri));
    }
    for (k, v) in &req.extra_params {
        form.push((k.as_str(), v.as_str()));
    }

    let resp = reqwest::Client::new()
        .post(token_url)
        .form(&form)
        .timeout(Duration::from_secs(30))
        .send()
        .await
        .map_err(|e| EngineError::Extension(format!("token exchange failed: {e}")))?;
    if !resp.status().is_success() {
        return Err(EngineError::Extension(format!(
            "token exchange failed: HTTP {}",
            resp.status().as_u16()
        )));
    }

    let body: TokenResponse = resp
        .json()
        .await
        .map_err(|e| EngineError::Extension(format!("invalid token response: {e}")))?;
    if body.access_token.is_empty() {
        return Err(EngineError::Extension(
            "token response carried no access_token".to_string(),
        ));
    }

    let expires_at = if body.expires_in > 0 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            + body.expires_in
    } else {
        0
    };
    Ok(OAuthTokens {
        access_token: body.access_token,
        refresh_token: body.refresh_token,
        expires_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkce_shape_and_challenge() {
        let pair = generate_pkce();
        assert_eq!(pair.verifier.len(), VERIFIER_LEN);
        assert!(pair
            .verifier
            .bytes()
            .all(|b| VERIFIER_ALPHABET.contains(&b)));
        assert_eq!(pair.method, "S256");
        assert_eq!(
            pair.challenge,
            B64URL.encode(Sha256::digest(pair.verifier.as_bytes()))
        );
        // URL-safe, unpadded.
        assert!(!pair.challenge.contains('='));
        assert!(!pair.challenge.contains('+'));
    }

    #[test]
    fn auth_url_validation() {
        assert!(validate_auth_url("https://accounts.example.com/authorize?x=1").is_ok());
        assert!(validate_auth_url("http://accounts.example.com/authorize").is_err());
        assert!(validate_auth_url("https://user:pw@accounts.example.com/").is_err());
        assert!(validate_auth_url("https://127.0.0.1/authorize").is_err());
        assert!(validate_auth_url("https://router.local/authorize").is_err());
        assert!(validate_auth_url("nonsense").is_err());
    }

    #[test]
    fn auth_state_lifecycle() {
        let mut state = AuthState::default();
        assert!(!state.is_authenticated());

        state.tokens = Some(OAuthTokens {
            access_token: "tok".to_string(),
            refresh_token: String::new(),
            expires_at: 0,
        });
        assert!(state.is_authenticated());

        // Expired in the past.
        state.tokens = Some(OAuthTokens {
            access_token: "tok".to_string(),
            refresh_token: String::new(),
            expires_at: 1,
        });
        assert!(!state.is_authenticated());

        state.clear();
        assert!(state.tokens.is_none());
        assert!(state.pkce.is_none());
    }

    #[tokio::test]
    async fn exchange_requires_allow_listed_endpoint() {
        let manifest = ExtensionManifest::parse(
            br#"{"name":"x","version":"1","author":"a","description":"d",
                 "type":["download_provider"],
                 "permissions":{"network":["auth.example.com"]}}"#,
        )
        .unwrap();
        let req = TokenExchangeRequest {
            token_url: "https://evil.com/token".to_string(),
            client_id: "cid".to_string(),
            code: "code".to_string(),
            redirect_uri: String::new(),
            extra_params: Default::default(),
        };
        assert!(exchange_code_with_pkce(&manifest, &req, "verifier")
            .await
            .is_err());
    }
}
