//! Credentials-at-rest for plug-ins: AES-256-GCM with a per-plug-in key
//! derived from the host-supplied process secret. Also the raw
//! encrypt/decrypt primitives exposed to guests through `utils.*`.

use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::error::EngineError;

const NONCE_LEN: usize = 12;
const CREDENTIALS_DIR: &str = "credentials";

/// 256-bit key from the process secret and the plug-in name. Two plug-ins
/// never share a key even under the same secret.
pub fn derive_key(process_secret: &str, ext_name: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(process_secret.as_bytes());
    hasher.update(b":");
    hasher.update(ext_name.as_bytes());
    hasher.finalize().into()
}

/// Random nonce prepended to the ciphertext, base64 over the whole blob.
/// Nonce and key bytes come from the OS CSPRNG; a repeated GCM nonce breaks
/// both confidentiality and authentication.
pub fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<String, EngineError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| EngineError::Extension("encryption failed".to_string()))?;
    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(nonce.as_slice());
    blob.extend_from_slice(&ciphertext);
    Ok(B64.encode(blob))
}

pub fn decrypt(key: &[u8; 32], blob_b64: &str) -> Result<Vec<u8>, EngineError> {
    let blob = B64
        .decode(blob_b64.trim())
        .map_err(|_| EngineError::Extension("ciphertext is not valid base64".to_string()))?;
    if blob.len() <= NONCE_LEN {
        return Err(EngineError::Extension("ciphertext too short".to_string()));
    }
    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| EngineError::Extension("decryption failed".to_string()))
}

/// 256-bit random key for the guest `utils.generateKey` capability.
pub fn generate_key() -> String {
    B64.encode(Aes256Gcm::generate_key(&mut OsRng))
}

/// Encrypted key/value files under `<data_dir>/credentials/`. File names are
/// hashed so credential keys never appear on disk in the clear.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
    key: [u8; 32],
}

impl CredentialStore {
    pub fn new(data_dir: &Path, process_secret: &str, ext_name: &str) -> Self {
        Self {
            dir: data_dir.join(CREDENTIALS_DIR),
            key: derive_key(process_secret, ext_name),
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        let mut name = String::with_capacity(32);
        for byte in digest.as_slice().iter().take(16) {
            name.push_str(&format!("{byte:02x}"));
        }
        self.dir.join(format!("{name}.cred"))
    }

    pub fn store(&self, key: &str, value: &str) -> Result<(), EngineError> {
        if key.trim().is_empty() {
            return Err(EngineError::Extension("credential key is required".to_string()));
        }
        std::fs::create_dir_all(&self.dir)?;
        let blob = encrypt(&self.key, value.as_bytes())?;
        std::fs::write(self.entry_path(key), blob)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, EngineError> {
        let path = self.entry_path(key);
        let Ok(blob) = std::fs::read_to_string(&path) else {
            return Ok(None);
        };
        let plain = decrypt(&self.key, &blob)?;
        String::from_utf8(plain)
            .map(Some)
            .map_err(|_| EngineError::Extension("stored credential is not valid UTF-8".to_string()))
    }

    pub fn has(&self, key: &str) -> bool {
        self.entry_path(key).exists()
    }

    pub fn remove(&self, key: &str) -> Result<(), EngineError> {
        let path = self.entry_path(key);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_and_tamper_detection() {
        let key = derive_key("secret", "demo");
        let blob = encrypt(&key, b"token-value").unwrap();
        assert_eq!(decrypt(&key, &blob).unwrap(), b"token-value");

        // Same plaintext, fresh nonce: different blob.
        let blob2 = encrypt(&key, b"token-value").unwrap();
        assert_ne!(blob, blob2);

        // Flipping a ciphertext byte breaks the GCM tag.
        let mut raw = B64.decode(&blob).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        assert!(decrypt(&key, &B64.encode(raw)).is_err());

        // A different plug-in's key cannot read it.
        let other = derive_key("secret", "other");
        assert!(decrypt(&other, &blob).is_err());
    }

    #[test]
    fn store_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path(), "secret", "demo");

        assert!(!store.has("api_key"));
        assert!(store.get("api_key").unwrap().is_none());

        store.store("api_key", "sk-12345").unwrap();
        assert!(store.has("api_key"));
        assert_eq!(store.get("api_key").unwrap().unwrap(), "sk-12345");

        // Nothing on disk contains the plaintext or the key name.
        for entry in std::fs::read_dir(dir.path().join("credentials")).unwrap() {
            let entry = entry.unwrap();
            let content = std::fs::read_to_string(entry.path()).unwrap();
            assert!(!content.contains("sk-12345"));
            assert!(!entry.file_name().to_string_lossy().contains("api_key"));
        }

        store.remove("api_key").unwrap();
        assert!(!store.has("api_key"));
    }

    #[test]
    fn generated_keys_decode_to_32_bytes() {
        let key = generate_key();
        assert_eq!(B64.decode(key).unwrap().len(), 32);
    }
}
