// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Storage password lifecycle.
//!
//! A single random 32-byte password protects every database. It lives in
//! the keychain; per-database keys are derived from it.

use tracing::{error, info};

use crate::config::StorageConfig;
use crate::crypto::{derive_subkey, SymmetricKey};

use super::{SecureStorage, StorageError, StorageKind};

/// Keychain entry holding the storage password.
pub const STORAGE_PASSWORD_KEY: &str = "storage_password";

/// The storage password, loaded from or created in the keychain.
#[derive(Clone, Debug)]
pub struct StoragePassword {
    key: SymmetricKey,
}

impl StoragePassword {
    /// Wraps a password the host obtained by other means.
    pub fn from_key(key: SymmetricKey) -> Self {
        StoragePassword { key }
    }

    /// Loads the password from the keychain, creating it on first launch.
    ///
    /// Fails with [`StorageError::PasswordInaccessible`] when:
    /// - the keychain is locked (device restarted and not yet unlocked),
    /// - the keychain returned an error,
    /// - the password is missing while databases already exist on disk
    ///   (they could never be decrypted with a new password).
    pub fn load_or_create(
        keychain: &dyn SecureStorage,
        config: &StorageConfig,
    ) -> Result<Self, StorageError> {
        match keychain.load_key(STORAGE_PASSWORD_KEY) {
            Ok(Some(bytes)) => {
                let key = SymmetricKey::from_slice(&bytes).ok_or_else(|| {
                    error!(len = bytes.len(), "stored database password is malformed");
                    StorageError::PasswordInaccessible("stored password is malformed".into())
                })?;
                Ok(StoragePassword { key })
            }
            Ok(None) => {
                if any_database_exists(config) {
                    error!("database password missing but database files exist");
                    return Err(StorageError::PasswordInaccessible(
                        "password missing for existing databases".into(),
                    ));
                }
                let key = SymmetricKey::generate();
                keychain
                    .save_key(STORAGE_PASSWORD_KEY, key.as_bytes())
                    .map_err(|e| {
                        error!(error = %e, "failed to store new database password");
                        StorageError::PasswordInaccessible(e.to_string())
                    })?;
                info!("created new database password");
                Ok(StoragePassword { key })
            }
            Err(e) => {
                error!(error = %e, "database password could not be retrieved");
                Err(StorageError::PasswordInaccessible(e.to_string()))
            }
        }
    }

    /// Returns false if the keychain is locked or the password could not be
    /// read. A password that simply does not exist yet counts as accessible.
    pub fn is_accessible(keychain: &dyn SecureStorage) -> bool {
        keychain.load_key(STORAGE_PASSWORD_KEY).is_ok()
    }

    /// Removes the password from the keychain.
    pub fn delete(keychain: &dyn SecureStorage) -> Result<(), StorageError> {
        keychain.delete_key(STORAGE_PASSWORD_KEY)
    }

    /// Derives the key material of one database.
    pub(crate) fn database_key(&self, kind: StorageKind) -> Result<SymmetricKey, StorageError> {
        Ok(derive_subkey(&self.key, kind.key_domain())?)
    }
}

fn any_database_exists(config: &StorageConfig) -> bool {
    StorageKind::ALL
        .iter()
        .any(|kind| config.database_paths(*kind).any_exists())
}
