// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! The identity store capability offered to the session layer.

use super::{IdentityError, IdentityKey, IdentityKeyPair};

/// Direction of the message a trust decision is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sending,
    Receiving,
}

/// Identity key storage the session layer depends on.
pub trait IdentityKeyStore: Send + Sync {
    /// The local identity key pair, if one was generated.
    fn identity_key_pair(&self) -> Result<Option<IdentityKeyPair>, IdentityError>;

    /// The local registration id, created on first use.
    fn local_registration_id(&self) -> Result<u32, IdentityError>;

    /// Records the key seen for `recipient_id`. Returns true if it replaced
    /// a different key.
    fn save_remote_identity(
        &self,
        identity_key: &IdentityKey,
        recipient_id: &str,
    ) -> Result<bool, IdentityError>;

    /// Whether a session with `recipient_id` using `identity_key` may be
    /// used in `direction`.
    fn is_trusted_identity_key(
        &self,
        identity_key: &IdentityKey,
        recipient_id: &str,
        direction: Direction,
    ) -> Result<bool, IdentityError>;
}
