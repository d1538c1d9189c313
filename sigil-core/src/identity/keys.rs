// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Identity keys.

use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::constant_time_eq;

use super::{IdentityError, IDENTITY_KEY_LENGTH};

/// Key-type byte some peers put in front of a serialized identity key.
pub const KEY_TYPE_PREFIX: u8 = 0x05;

/// A public identity key.
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct IdentityKey([u8; IDENTITY_KEY_LENGTH]);

impl IdentityKey {
    pub fn from_bytes(bytes: [u8; IDENTITY_KEY_LENGTH]) -> Self {
        IdentityKey(bytes)
    }

    /// Parses a key, dropping the key-type prefix if present.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, IdentityError> {
        let raw = match bytes.len() {
            IDENTITY_KEY_LENGTH => bytes,
            n if n == IDENTITY_KEY_LENGTH + 1 && bytes[0] == KEY_TYPE_PREFIX => &bytes[1..],
            n => return Err(IdentityError::InvalidKeyLength(n)),
        };
        let mut key = [0u8; IDENTITY_KEY_LENGTH];
        key.copy_from_slice(raw);
        Ok(IdentityKey(key))
    }

    pub fn as_bytes(&self) -> &[u8; IDENTITY_KEY_LENGTH] {
        &self.0
    }

    /// Short hex form for logs.
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl PartialEq for IdentityKey {
    fn eq(&self, other: &Self) -> bool {
        constant_time_eq(&self.0, &other.0)
    }
}

impl Eq for IdentityKey {}

impl std::fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IdentityKey({}..)", self.fingerprint())
    }
}

/// The local identity key pair.
#[derive(Clone)]
pub struct IdentityKeyPair {
    secret: StaticSecret,
    public: IdentityKey,
}

impl IdentityKeyPair {
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(OsRng))
    }

    pub(crate) fn from_secret_bytes(bytes: [u8; IDENTITY_KEY_LENGTH]) -> Self {
        Self::from_secret(StaticSecret::from(bytes))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = IdentityKey(*PublicKey::from(&secret).as_bytes());
        IdentityKeyPair { secret, public }
    }

    pub fn public_key(&self) -> IdentityKey {
        self.public
    }

    pub(crate) fn to_stored(&self) -> StoredKeyPair {
        StoredKeyPair {
            private_key: self.secret.to_bytes().to_vec(),
            public_key: self.public.as_bytes().to_vec(),
        }
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Serialized key pair as kept in the session database.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub(crate) struct StoredKeyPair {
    private_key: Vec<u8>,
    public_key: Vec<u8>,
}

impl StoredKeyPair {
    pub(crate) fn into_key_pair(self) -> Result<IdentityKeyPair, IdentityError> {
        if self.private_key.len() != IDENTITY_KEY_LENGTH {
            return Err(IdentityError::InvalidKeyLength(self.private_key.len()));
        }
        let mut secret = [0u8; IDENTITY_KEY_LENGTH];
        secret.copy_from_slice(&self.private_key);
        let pair = IdentityKeyPair::from_secret_bytes(secret);
        secret.zeroize();

        if pair.public.as_bytes()[..] != self.public_key[..] {
            return Err(IdentityError::CorruptKeyPair);
        }
        Ok(pair)
    }
}
