// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Identity Management Module
//!
//! The local X25519 identity key pair and the identity keys of remote
//! recipients together with their verification state. Everything lives in
//! the session database so the extension process sees the same state.

mod keys;
mod manager;
mod record;
mod store;
mod verification;

pub use keys::{IdentityKey, IdentityKeyPair, KEY_TYPE_PREFIX};
pub use manager::IdentityManager;
pub use record::{RecipientIdentity, VerificationState};
pub use store::{Direction, IdentityKeyStore};
pub use verification::{
    KeyVerification, MockKeyVerification, VerificationSyncMessage, VerifiedSyncMessage,
};

use thiserror::Error;

use crate::storage::StorageError;

/// Number of bytes in an identity key, excluding the key-type byte.
pub const IDENTITY_KEY_LENGTH: usize = 32;

/// Session database collection of [`RecipientIdentity`] records.
pub const RECIPIENT_IDENTITIES: &str = "recipient_identities";
/// Session database collection holding the local key pair.
pub const LOCAL_IDENTITY: &str = "local_identity";
/// Session database collection of outgoing verification sync messages.
pub const PENDING_VERIFICATION_SYNCS: &str = "pending_verification_syncs";

/// Identity-related errors.
///
/// Every rejected change leaves the stored state untouched.
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Identity key must be 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Stored identity key pair is inconsistent")]
    CorruptKeyPair,

    #[error("No identity known for recipient")]
    UnknownRecipient,

    #[error("Identity key does not match the key on record")]
    KeyMismatch,

    #[error("Identity key was not confirmed out of band")]
    NotConfirmedOutOfBand,

    #[error("Verification state was set by the user and cannot be changed automatically")]
    UserDecisionLocked,

    #[error("No local identity key")]
    MissingLocalIdentity,
}
