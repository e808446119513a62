//! Encrypted on-disk token cache
//!
//! Lets a restarted daemon reuse its registration token instead of
//! registering from scratch.

use aes_gcm::Aes256Gcm;
use corral_core::domain::token::RegistrationToken;
use std::path::{Path, PathBuf};
use zeroize::Zeroize;

use super::cipher::{self, EncryptionKey};
use crate::error::Result;

pub struct TokenCache {
    path: PathBuf,
    cipher: Aes256Gcm,
}

impl TokenCache {
    pub fn new(path: impl Into<PathBuf>, key: &EncryptionKey) -> Self {
        Self {
            path: path.into(),
            cipher: key.cipher(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the cached token; `None` when nothing was cached yet
    pub fn load(&self) -> Result<Option<RegistrationToken>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let sealed = std::fs::read_to_string(&self.path)?;
        let mut plaintext = cipher::decrypt(&self.cipher, &sealed)?;
        let token = serde_json::from_slice(&plaintext);
        plaintext.zeroize();

        Ok(Some(token?))
    }

    /// Replaces the cached token atomically
    pub fn store(&self, token: &RegistrationToken) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut plaintext = serde_json::to_vec(token)?;
        let sealed = cipher::encrypt(&self.cipher, &plaintext);
        plaintext.zeroize();

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, sealed?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
