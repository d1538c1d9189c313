// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Out-of-band key verification and the sync messages that carry
//! verification decisions between linked devices.

use std::collections::HashSet;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{IdentityKey, VerificationState};

/// Confirms that key material was checked out of band, for example by
/// comparing safety numbers in person.
pub trait KeyVerification: Send + Sync {
    fn is_confirmed_out_of_band(&self, recipient_id: &str, identity_key: &IdentityKey) -> bool;
}

/// Mock verifier for testing.
///
/// Confirms exactly the (recipient, key) pairs it was told about.
#[derive(Default)]
pub struct MockKeyVerification {
    confirmed: Mutex<HashSet<(String, [u8; 32])>>,
    confirm_all: bool,
}

impl MockKeyVerification {
    pub fn new() -> Self {
        Self::default()
    }

    /// A verifier that confirms every key.
    pub fn confirming_all() -> Self {
        MockKeyVerification {
            confirm_all: true,
            ..Self::default()
        }
    }

    pub fn confirm(&self, recipient_id: &str, identity_key: &IdentityKey) {
        self.confirmed
            .lock()
            .insert((recipient_id.to_string(), *identity_key.as_bytes()));
    }
}

impl KeyVerification for MockKeyVerification {
    fn is_confirmed_out_of_band(&self, recipient_id: &str, identity_key: &IdentityKey) -> bool {
        self.confirm_all
            || self
                .confirmed
                .lock()
                .contains(&(recipient_id.to_string(), *identity_key.as_bytes()))
    }
}

/// A verification decision received from a linked device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedSyncMessage {
    pub destination: String,
    /// May carry the key-type prefix.
    pub identity_key: Vec<u8>,
    pub state: VerificationState,
}

/// A local verification decision waiting to be sent to linked devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationSyncMessage {
    pub recipient_id: String,
    pub identity_key: IdentityKey,
    pub state: VerificationState,
    pub created_at: u64,
}
