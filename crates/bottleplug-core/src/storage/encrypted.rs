use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;

use super::{KeyValueStore, StorageError};

/// File header identifying the format version
const MAGIC: &[u8; 4] = b"BPS1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Key/value storage sealed with a passphrase.
///
/// Layout on disk: `MAGIC | salt | nonce | ciphertext`. The key is derived
/// with Argon2id from the passphrase and the per-file salt; every write uses
/// a fresh nonce.
pub struct EncryptedFileStore {
    path: PathBuf,
    salt: [u8; SALT_LEN],
    key: [u8; KEY_LEN],
    entries: Mutex<BTreeMap<String, String>>,
}

impl std::fmt::Debug for EncryptedFileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFileStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn derive_key(passphrase: &str, salt: &[u8]) -> Result<[u8; KEY_LEN], StorageError> {
    let mut key = [0u8; KEY_LEN];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| StorageError::Crypto(format!("key derivation failed: {}", e)))?;
    Ok(key)
}

impl EncryptedFileStore {
    pub fn open(path: impl Into<PathBuf>, passphrase: &str) -> Result<Self, StorageError> {
        let path = path.into();

        if !path.exists() {
            let mut salt = [0u8; SALT_LEN];
            OsRng.fill_bytes(&mut salt);
            let key = derive_key(passphrase, &salt)?;
            return Ok(Self {
                path,
                salt,
                key,
                entries: Mutex::new(BTreeMap::new()),
            });
        }

        let raw = std::fs::read(&path)?;
        let header_len = MAGIC.len() + SALT_LEN + NONCE_LEN;
        if raw.len() < header_len || &raw[..MAGIC.len()] != MAGIC {
            return Err(StorageError::Crypto("unrecognized storage file format".to_string()));
        }

        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&raw[MAGIC.len()..MAGIC.len() + SALT_LEN]);
        let nonce = &raw[MAGIC.len() + SALT_LEN..header_len];
        let key = derive_key(passphrase, &salt)?;

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), &raw[header_len..])
            .map_err(|_| StorageError::Crypto("wrong passphrase or corrupted file".to_string()))?;
        let entries: BTreeMap<String, String> = serde_json::from_slice(&plaintext)?;
        debug!(path = %path.display(), count = entries.len(), "Opened encrypted store");

        Ok(Self {
            path,
            salt,
            key,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let plaintext = serde_json::to_vec(entries)?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|e| StorageError::Crypto(format!("encryption failed: {}", e)))?;

        let mut out = Vec::with_capacity(MAGIC.len() + SALT_LEN + NONCE_LEN + ciphertext.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, out)?;
        Ok(())
    }
}

impl KeyValueStore for EncryptedFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = entries.clone();
        next.insert(key.to_string(), value.to_string());
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.remove_many(&[key])
    }

    /// One write for the whole batch; memory changes only once the write succeeds
    fn remove_many(&self, keys: &[&str]) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if !keys.iter().any(|key| entries.contains_key(*key)) {
            return Ok(());
        }
        let mut next = entries.clone();
        for key in keys {
            next.remove(*key);
        }
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }
}
