// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Storage error types.

use thiserror::Error;

/// Storage error types.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Migration error: {0}")]
    Migration(String),

    /// The keychain refused access, e.g. the device restarted and has not
    /// been unlocked yet.
    #[error("Keychain locked: {0}")]
    KeychainLocked(String),

    #[error("Keychain error: {0}")]
    Keychain(String),

    /// The storage password cannot be retrieved. The process must not
    /// continue past setup; the user has to unlock or restart the device.
    #[error("Database password inaccessible: {0}")]
    PasswordInaccessible(String),

    /// The connection was closed (client count reached zero, or the storage
    /// was reset) and must be re-acquired.
    #[error("Database connection closed")]
    ConnectionClosed,

    /// An extension-backed view was queried before storage became ready.
    #[error("Storage not ready: {0}")]
    NotReady(String),

    #[error("Extension not registered: {0}")]
    ExtensionNotRegistered(String),

    #[error("Write attempted in a read transaction")]
    ReadOnlyTransaction,
}

impl StorageError {
    /// Returns true for errors that must stop process startup.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StorageError::PasswordInaccessible(_))
    }

    /// Returns true when the user should be told to unlock or restart the
    /// device rather than shown a generic failure.
    pub fn requires_restart(&self) -> bool {
        matches!(
            self,
            StorageError::PasswordInaccessible(_) | StorageError::KeychainLocked(_)
        )
    }
}

impl From<crate::crypto::EncryptionError> for StorageError {
    fn from(e: crate::crypto::EncryptionError) -> Self {
        StorageError::Encryption(e.to_string())
    }
}

impl From<crate::crypto::KdfError> for StorageError {
    fn from(e: crate::crypto::KdfError) -> Self {
        StorageError::Encryption(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}
