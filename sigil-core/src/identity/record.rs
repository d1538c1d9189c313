// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Per-recipient identity records.

use serde::{Deserialize, Serialize};

use super::IdentityKey;

/// Trust the local user placed in a recipient's identity key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationState {
    /// Not verified; the key is trusted on first use.
    #[default]
    Default,
    /// Confirmed out of band.
    Verified,
    /// Was verified, but the key has changed since.
    NoLongerVerified,
}

impl VerificationState {
    /// State carried over to a replacement key. A verification never
    /// transfers to a new key.
    pub fn after_key_change(self) -> VerificationState {
        match self {
            VerificationState::Default => VerificationState::Default,
            VerificationState::Verified | VerificationState::NoLongerVerified => {
                VerificationState::NoLongerVerified
            }
        }
    }
}

/// The identity key known for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientIdentity {
    pub recipient_id: String,
    pub identity_key: IdentityKey,
    /// Milliseconds since the Unix epoch when this key was first seen.
    pub created_at: u64,
    /// True if no earlier key was known for the recipient.
    pub is_first_known_key: bool,
    pub verification_state: VerificationState,
    /// True if the current state was set by the user; automatic changes
    /// may not override it.
    pub user_confirmed: bool,
}

impl RecipientIdentity {
    pub(crate) fn first_seen(recipient_id: &str, identity_key: IdentityKey, now: u64) -> Self {
        RecipientIdentity {
            recipient_id: recipient_id.to_string(),
            identity_key,
            created_at: now,
            is_first_known_key: true,
            verification_state: VerificationState::Default,
            user_confirmed: false,
        }
    }

    /// The record replacing this one after the recipient's key changed.
    pub(crate) fn rotated(&self, identity_key: IdentityKey, now: u64) -> Self {
        RecipientIdentity {
            recipient_id: self.recipient_id.clone(),
            identity_key,
            created_at: now,
            is_first_known_key: false,
            verification_state: self.verification_state.after_key_change(),
            user_confirmed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_never_keeps_verified() {
        use VerificationState::*;
        assert_eq!(Default.after_key_change(), Default);
        assert_eq!(Verified.after_key_change(), NoLongerVerified);
        assert_eq!(NoLongerVerified.after_key_change(), NoLongerVerified);
    }

    #[test]
    fn test_rotated_record() {
        let key = IdentityKey::from_bytes([1; 32]);
        let mut record = RecipientIdentity::first_seen("+1555", key, 5);
        record.verification_state = VerificationState::Verified;
        record.user_confirmed = true;

        let rotated = record.rotated(IdentityKey::from_bytes([2; 32]), 9);
        assert_eq!(rotated.verification_state, VerificationState::NoLongerVerified);
        assert!(!rotated.is_first_known_key);
        assert!(!rotated.user_confirmed);
        assert_eq!(rotated.created_at, 9);
    }
}
