// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Key Derivation and Keyed Hashing
//!
//! HKDF-SHA256 subkey derivation and HMAC-SHA256 lookup tags, both on
//! top of `ring`.

use ring::{hkdf, hmac};
use thiserror::Error;
use zeroize::Zeroize;

use super::SymmetricKey;

/// KDF error types.
#[derive(Error, Debug)]
pub enum KdfError {
    #[error("HKDF expansion failed")]
    ExpansionFailed,
}

/// Output length marker for `ring::hkdf`.
struct KeyLength(usize);

impl hkdf::KeyType for KeyLength {
    fn len(&self) -> usize {
        self.0
    }
}

/// Derives a 32-byte subkey from `master` with HKDF-SHA256.
///
/// `info` provides domain separation; the same master and info always
/// yield the same subkey.
pub fn derive_subkey(master: &SymmetricKey, info: &[u8]) -> Result<SymmetricKey, KdfError> {
    let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, &[]);
    let prk = salt.extract(master.as_bytes());
    let info = [info];
    let okm = prk
        .expand(&info, KeyLength(32))
        .map_err(|_| KdfError::ExpansionFailed)?;

    let mut bytes = [0u8; 32];
    okm.fill(&mut bytes).map_err(|_| KdfError::ExpansionFailed)?;
    let key = SymmetricKey::from_bytes(bytes);
    bytes.zeroize();
    Ok(key)
}

/// Keyed HMAC-SHA256 used to build deterministic lookup tags.
pub struct LookupTagger {
    key: hmac::Key,
}

impl LookupTagger {
    /// Creates a tagger keyed with `key`.
    pub fn new(key: &SymmetricKey) -> Self {
        LookupTagger {
            key: hmac::Key::new(hmac::HMAC_SHA256, key.as_bytes()),
        }
    }

    /// Returns the 32-byte tag for `data`.
    pub fn tag(&self, data: &[u8]) -> Vec<u8> {
        hmac::sign(&self.key, data).as_ref().to_vec()
    }
}

impl std::fmt::Debug for LookupTagger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookupTagger").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subkeys_are_deterministic_and_separated() {
        let master = SymmetricKey::from_bytes([7u8; 32]);

        let a1 = derive_subkey(&master, b"sigil/primary").unwrap();
        let a2 = derive_subkey(&master, b"sigil/primary").unwrap();
        let b = derive_subkey(&master, b"sigil/session").unwrap();

        assert_eq!(a1, a2);
        assert_ne!(a1, b);
        assert_ne!(a1.as_bytes(), master.as_bytes());
    }

    #[test]
    fn test_lookup_tags() {
        let tagger = LookupTagger::new(&SymmetricKey::from_bytes([1u8; 32]));
        let other = LookupTagger::new(&SymmetricKey::from_bytes([2u8; 32]));

        assert_eq!(tagger.tag(b"+15551234567"), tagger.tag(b"+15551234567"));
        assert_ne!(tagger.tag(b"+15551234567"), tagger.tag(b"+15551234568"));
        assert_ne!(tagger.tag(b"+15551234567"), other.tag(b"+15551234567"));
        assert_eq!(tagger.tag(b"x").len(), 32);
    }
}
