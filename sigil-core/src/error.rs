// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Crate Error Types
//!
//! Unified error type for hosts that drive several components.

use thiserror::Error;

use crate::crypto::EncryptionError;
use crate::identity::IdentityError;
use crate::outbox::OutboxError;
use crate::storage::StorageError;

/// Unified error type for Sigil operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Storage operation failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Identity operation failed or was rejected.
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Outbox operation failed.
    #[error("outbox error: {0}")]
    Outbox(#[from] OutboxError),

    /// Cryptographic operation failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] EncryptionError),
}

impl CoreError {
    /// True when the host must stop and ask the user to unlock or restart
    /// the device.
    pub fn requires_restart(&self) -> bool {
        match self {
            CoreError::Storage(e) => e.requires_restart(),
            CoreError::Identity(IdentityError::Storage(e)) => e.requires_restart(),
            CoreError::Outbox(OutboxError::Storage(e)) => e.requires_restart(),
            _ => false,
        }
    }
}

/// Result type for Sigil operations.
pub type CoreResult<T> = Result<T, CoreError>;
