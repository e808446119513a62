//! AES-256-GCM sealing for the token cache
//!
//! Values are sealed with a fresh random nonce each time and stored as
//! base64 `nonce||ciphertext`.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use std::path::Path;
use tracing::info;
use zeroize::Zeroize;

use crate::error::{Result, RunnerError};

const NONCE_LEN: usize = 12;

/// Cache encryption key, wiped from memory on drop
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// New random key from the OS RNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Decode a base64 32-byte key
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let mut decoded = BASE64
            .decode(encoded.trim())
            .map_err(|_| RunnerError::Storage("cache key is not valid base64".to_string()))?;

        if decoded.len() != 32 {
            decoded.zeroize();
            return Err(RunnerError::Storage(
                "cache key must be exactly 32 bytes".to_string(),
            ));
        }

        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self(bytes))
    }

    /// Key from `var`, if set
    pub fn from_env(var: &str) -> Result<Option<Self>> {
        match std::env::var(var) {
            Ok(encoded) => Self::from_base64(&encoded).map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Reads the key file at `path`, creating it (mode 0600) when missing
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let encoded = std::fs::read_to_string(path)?;
            return Self::from_base64(&encoded);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let key = Self::generate();
        write_private(path, BASE64.encode(key.0).as_bytes())?;
        info!("Generated new token cache key at {}", path.display());
        Ok(key)
    }

    pub(super) fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new((&self.0).into())
    }
}

/// Seal `plaintext` under `cipher`
pub(super) fn encrypt(cipher: &Aes256Gcm, plaintext: &[u8]) -> Result<String> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| RunnerError::Storage("token cache encryption failed".to_string()))?;

    let mut combined = nonce_bytes.to_vec();
    combined.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(&combined))
}

/// Open a value sealed by `encrypt`
pub(super) fn decrypt(cipher: &Aes256Gcm, sealed: &str) -> Result<Vec<u8>> {
    let combined = BASE64
        .decode(sealed.trim())
        .map_err(|_| RunnerError::Storage("token cache is not valid base64".to_string()))?;

    if combined.len() < NONCE_LEN {
        return Err(RunnerError::Storage("token cache is truncated".to_string()));
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);

    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| RunnerError::Storage("token cache failed authentication".to_string()))
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)?;
    Ok(())
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    std::fs::write(path, contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_and_open() {
        let cipher = EncryptionKey::generate().cipher();
        let sealed = encrypt(&cipher, b"token-value").unwrap();
        assert_eq!(decrypt(&cipher, &sealed).unwrap(), b"token-value");
    }

    #[test]
    fn test_nonce_makes_ciphertexts_differ() {
        let cipher = EncryptionKey::generate().cipher();
        let a = encrypt(&cipher, b"same").unwrap();
        let b = encrypt(&cipher, b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = encrypt(&EncryptionKey::generate().cipher(), b"secret").unwrap();
        assert!(decrypt(&EncryptionKey::generate().cipher(), &sealed).is_err());
    }

    #[test]
    fn test_from_base64_rejects_short_keys() {
        assert!(EncryptionKey::from_base64(&BASE64.encode([1u8; 16])).is_err());
        assert!(EncryptionKey::from_base64("***").is_err());
        assert!(EncryptionKey::from_base64(&BASE64.encode([1u8; 32])).is_ok());
    }

    #[test]
    fn test_load_or_create_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("token.key");

        let first = EncryptionKey::load_or_create(&path).unwrap();
        let second = EncryptionKey::load_or_create(&path).unwrap();

        let sealed = encrypt(&first.cipher(), b"v").unwrap();
        assert_eq!(decrypt(&second.cipher(), &sealed).unwrap(), b"v");
    }
}
