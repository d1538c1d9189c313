// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Secure Storage Module
//!
//! Keychain access for the storage password.
//! Uses OS keychains (macOS Keychain, Linux Secret Service, Windows Credential Manager)
//! through the `keyring` crate when the `secure-storage` feature is enabled.
//! [`MemoryKeyStorage`] is the in-process implementation used by tests and
//! hosts that inject the password themselves.

use std::collections::HashMap;

use parking_lot::Mutex;

#[cfg(feature = "secure-storage")]
use crate::config::StorageConfig;
use crate::storage::StorageError;

/// Trait for secure storage of cryptographic keys.
///
/// Implementations must report a temporarily inaccessible keychain (for
/// example, locked after a reboot) as [`StorageError::KeychainLocked`] so
/// callers can tell it apart from a missing key.
pub trait SecureStorage: Send + Sync {
    /// Saves a key to secure storage.
    fn save_key(&self, name: &str, key: &[u8]) -> Result<(), StorageError>;

    /// Loads a key from secure storage.
    /// Returns None if the key doesn't exist.
    fn load_key(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Deletes a key from secure storage.
    fn delete_key(&self, name: &str) -> Result<(), StorageError>;

    /// Checks if a key exists in secure storage.
    fn has_key(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.load_key(name)?.is_some())
    }
}

/// Platform keyring implementation using the `keyring` crate.
/// Available when the `secure-storage` feature is enabled.
#[cfg(feature = "secure-storage")]
pub struct PlatformKeyring {
    service: String,
}

#[cfg(feature = "secure-storage")]
impl PlatformKeyring {
    /// Creates a new platform keyring accessor.
    ///
    /// # Arguments
    /// * `service` - The service name to use for keychain entries (e.g., "sigil")
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Accessor for the keychain service named in `config`.
    pub fn for_config(config: &StorageConfig) -> Self {
        Self::new(config.keychain_service.clone())
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn entry(&self, name: &str) -> Result<keyring::Entry, StorageError> {
        keyring::Entry::new(&self.service, name).map_err(map_keyring_error)
    }
}

#[cfg(feature = "secure-storage")]
fn map_keyring_error(e: keyring::Error) -> StorageError {
    match e {
        keyring::Error::NoStorageAccess(inner) => StorageError::KeychainLocked(inner.to_string()),
        other => StorageError::Keychain(other.to_string()),
    }
}

#[cfg(feature = "secure-storage")]
impl SecureStorage for PlatformKeyring {
    fn save_key(&self, name: &str, key: &[u8]) -> Result<(), StorageError> {
        self.entry(name)?.set_secret(key).map_err(map_keyring_error)
    }

    fn load_key(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match self.entry(name)?.get_secret() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(map_keyring_error(e)),
        }
    }

    fn delete_key(&self, name: &str) -> Result<(), StorageError> {
        match self.entry(name)?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()), // Already deleted
            Err(e) => Err(map_keyring_error(e)),
        }
    }
}

/// In-memory key storage.
///
/// Can be switched into a locked state to simulate a keychain that is
/// unavailable after a device restart.
#[derive(Default)]
pub struct MemoryKeyStorage {
    keys: Mutex<HashMap<String, Vec<u8>>>,
    locked: Mutex<bool>,
}

impl MemoryKeyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks or unlocks the simulated keychain.
    pub fn set_locked(&self, locked: bool) {
        *self.locked.lock() = locked;
    }

    fn check_unlocked(&self) -> Result<(), StorageError> {
        if *self.locked.lock() {
            return Err(StorageError::KeychainLocked(
                "keychain is locked until first unlock".to_string(),
            ));
        }
        Ok(())
    }
}

impl SecureStorage for MemoryKeyStorage {
    fn save_key(&self, name: &str, key: &[u8]) -> Result<(), StorageError> {
        self.check_unlocked()?;
        self.keys.lock().insert(name.to_string(), key.to_vec());
        Ok(())
    }

    fn load_key(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.check_unlocked()?;
        Ok(self.keys.lock().get(name).cloned())
    }

    fn delete_key(&self, name: &str) -> Result<(), StorageError> {
        self.check_unlocked()?;
        self.keys.lock().remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_save_load() {
        let storage = MemoryKeyStorage::new();
        let key = vec![1, 2, 3, 4, 5];

        storage.save_key("test_key", &key).unwrap();
        let loaded = storage.load_key("test_key").unwrap();

        assert_eq!(loaded, Some(key));
    }

    #[test]
    fn test_memory_storage_key_not_found() {
        let storage = MemoryKeyStorage::new();
        let loaded = storage.load_key("nonexistent").unwrap();
        assert_eq!(loaded, None);
    }

    #[test]
    fn test_memory_storage_delete() {
        let storage = MemoryKeyStorage::new();

        storage.save_key("test_key", &[1, 2, 3]).unwrap();
        assert!(storage.has_key("test_key").unwrap());

        storage.delete_key("test_key").unwrap();
        assert!(!storage.has_key("test_key").unwrap());
    }

    #[test]
    fn test_locked_storage_is_distinguishable() {
        let storage = MemoryKeyStorage::new();
        storage.save_key("test_key", &[1]).unwrap();

        storage.set_locked(true);
        let err = storage.load_key("test_key").unwrap_err();
        assert!(matches!(err, StorageError::KeychainLocked(_)));
        assert!(err.requires_restart());

        storage.set_locked(false);
        assert_eq!(storage.load_key("test_key").unwrap(), Some(vec![1]));
    }

    #[cfg(feature = "secure-storage")]
    mod keyring_tests {
        use super::*;

        // These tests interact with the actual system keychain.
        // Run manually with a desktop session active.

        #[test]
        #[ignore = "Requires system keychain (desktop session)"]
        fn test_platform_keyring_save_load() {
            let storage = PlatformKeyring::new("sigil-test-unit");
            let key = vec![0x42; 32];

            let _ = storage.delete_key("test_key_1");

            storage.save_key("test_key_1", &key).unwrap();
            assert_eq!(storage.load_key("test_key_1").unwrap(), Some(key));

            storage.delete_key("test_key_1").unwrap();
        }

        #[test]
        fn test_platform_keyring_uses_configured_service() {
            let config = StorageConfig::default().with_keychain_service("sigil-test-config");
            assert_eq!(PlatformKeyring::for_config(&config).service(), "sigil-test-config");
        }

        #[test]
        #[ignore = "Requires system keychain (desktop session)"]
        fn test_platform_keyring_not_found() {
            let storage = PlatformKeyring::new("sigil-test-unit");
            assert_eq!(storage.load_key("nonexistent_key_xyz").unwrap(), None);
        }
    }
}
