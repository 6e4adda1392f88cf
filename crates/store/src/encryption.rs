//! Encryption for sensitive settings (API keys, tokens).
//!
//! AES-256-GCM with a random per-value nonce prepended to the
//! ciphertext, base64-encoded as one token. The key is generated on
//! first boot and stored next to the database with owner-only read
//! permissions.

use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;

use crate::error::{Result, StoreError};

const KEY_FILE: &str = ".hearth_key";
const NONCE_LEN: usize = 12;

/// Symmetric cipher for settings values.
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    /// Load the key from `<base_dir>/.hearth_key`, generating it on
    /// first boot.
    pub fn load_or_generate(base_dir: &Path) -> Result<Self> {
        let path = key_path(base_dir);

        let key_bytes: Vec<u8> = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| StoreError::Permanent(format!("read key file: {e}")))?;
            B64.decode(raw.trim())
                .map_err(|e| StoreError::Permanent(format!("key file is not valid base64: {e}")))?
        } else {
            let key = Aes256Gcm::generate_key(OsRng);
            let encoded = B64.encode(key);
            std::fs::write(&path, &encoded)
                .map_err(|e| StoreError::Permanent(format!("write key file: {e}")))?;
            restrict_permissions(&path)?;
            tracing::info!(path = %path.display(), "generated new encryption key");
            key.to_vec()
        };

        if key_bytes.len() != 32 {
            return Err(StoreError::Permanent(format!(
                "key file must hold 32 bytes, found {}",
                key_bytes.len()
            )));
        }

        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Encrypt a string into a base64 token (nonce || ciphertext).
    pub fn encrypt(&self, value: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, value.as_bytes())
            .map_err(|e| StoreError::Permanent(format!("encrypt: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(B64.encode(out))
    }

    /// Decrypt a base64 token produced by [`Self::encrypt`].
    pub fn decrypt(&self, token: &str) -> Result<String> {
        let raw = B64
            .decode(token)
            .map_err(|e| StoreError::Permanent(format!("token is not valid base64: {e}")))?;
        if raw.len() < NONCE_LEN {
            return Err(StoreError::Permanent("token too short".into()));
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| StoreError::Permanent("decryption failed (wrong key?)".into()))?;

        String::from_utf8(plaintext)
            .map_err(|e| StoreError::Permanent(format!("decrypted value is not UTF-8: {e}")))
    }
}

fn key_path(base_dir: &Path) -> PathBuf {
    base_dir.join(KEY_FILE)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| StoreError::Permanent(format!("chmod key file: {e}")))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
