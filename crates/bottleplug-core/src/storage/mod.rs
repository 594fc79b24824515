//! Persistent key/value storage for tokens and session markers.
//!
//! Keys are plain strings; structured values are stored as JSON text.
//! Backends:
//! - `MemoryStore`: process-local, also used for session-scoped slots
//! - `FileStore`: JSON file on disk
//! - `EncryptedFileStore`: JSON file sealed with ChaCha20-Poly1305
//! - `KeychainStore`: OS keychain via keyring

pub mod encrypted;
pub mod file;
pub mod keychain;
pub mod memory;

pub use encrypted::EncryptedFileStore;
pub use file::FileStore;
pub use keychain::KeychainStore;
pub use memory::MemoryStore;

use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage contents are malformed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Keychain error: {0}")]
    Keychain(#[from] keyring::Error),

    #[error("Encryption error: {0}")]
    Crypto(String),
}

/// String key/value storage shared by the session manager and navigator.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Attempts every key even when one fails; the first error is returned
    fn remove_many(&self, keys: &[&str]) -> Result<(), StorageError> {
        let mut first_error = None;
        for key in keys {
            if let Err(e) = self.remove(key) {
                warn!(key, error = %e, "Failed to remove storage key");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Store whose `remove` fails for one key
    struct StickyKeyStore {
        inner: MemoryStore,
        sticky: &'static str,
    }

    impl KeyValueStore for StickyKeyStore {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StorageError> {
            if key == self.sticky {
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "locked",
                )));
            }
            self.inner.remove(key)
        }
    }

    #[test]
    fn test_remove_many_continues_past_failure() {
        let store = StickyKeyStore {
            inner: MemoryStore::new(),
            sticky: "a",
        };
        for key in ["a", "b", "c"] {
            store.set(key, "x").unwrap();
        }

        let result = store.remove_many(&["a", "b", "c"]);
        assert!(matches!(result, Err(StorageError::Io(_))));
        assert_eq!(store.get("a").unwrap().as_deref(), Some("x"));
        assert_eq!(store.get("b").unwrap(), None);
        assert_eq!(store.get("c").unwrap(), None);
    }
}
