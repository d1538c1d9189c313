// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Per-database record encryption.

use crate::crypto::{decrypt, derive_subkey, encrypt, LookupTagger, SymmetricKey};

use super::StorageError;

/// Encrypts record keys and values and produces deterministic lookup tags
/// so that no plaintext key is ever written to disk.
#[derive(Debug)]
pub(crate) struct RecordCipher {
    value_key: SymmetricKey,
    tagger: LookupTagger,
}

impl RecordCipher {
    pub(crate) fn new(database_key: &SymmetricKey) -> Result<Self, StorageError> {
        let value_key = derive_subkey(database_key, b"records/value")?;
        let tag_key = derive_subkey(database_key, b"records/tag")?;
        Ok(RecordCipher {
            value_key,
            tagger: LookupTagger::new(&tag_key),
        })
    }

    /// Tag locating `key` within `collection`.
    pub(crate) fn key_tag(&self, collection: &str, key: &str) -> Vec<u8> {
        self.tagger.tag(&framed(collection, key))
    }

    /// Tag locating index entries whose value is `value`.
    pub(crate) fn index_tag(&self, extension: &str, value: &str) -> Vec<u8> {
        self.tagger.tag(&framed(extension, value))
    }

    pub(crate) fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, StorageError> {
        Ok(encrypt(&self.value_key, plaintext)?)
    }

    pub(crate) fn open(&self, ciphertext: &[u8]) -> Result<Vec<u8>, StorageError> {
        Ok(decrypt(&self.value_key, ciphertext)?)
    }

    pub(crate) fn open_string(&self, ciphertext: &[u8]) -> Result<String, StorageError> {
        String::from_utf8(self.open(ciphertext)?)
            .map_err(|e| StorageError::Serialization(format!("record key is not UTF-8: {}", e)))
    }
}

/// Length-prefixed concatenation so ("ab", "c") and ("a", "bc") differ.
fn framed(scope: &str, value: &str) -> Vec<u8> {
    let mut data = Vec::with_capacity(8 + scope.len() + value.len());
    data.extend_from_slice(&(scope.len() as u64).to_be_bytes());
    data.extend_from_slice(scope.as_bytes());
    data.extend_from_slice(value.as_bytes());
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_are_scoped() {
        let cipher = RecordCipher::new(&SymmetricKey::generate()).unwrap();
        assert_ne!(cipher.key_tag("ab", "c"), cipher.key_tag("a", "bc"));
        assert_ne!(
            cipher.key_tag("threads", "x"),
            cipher.key_tag("interactions", "x")
        );
        assert_eq!(cipher.key_tag("threads", "x"), cipher.key_tag("threads", "x"));
    }

    #[test]
    fn test_seal_open() {
        let cipher = RecordCipher::new(&SymmetricKey::generate()).unwrap();
        let sealed = cipher.seal(b"+15551234567").unwrap();
        assert_ne!(sealed, b"+15551234567");
        assert_eq!(cipher.open_string(&sealed).unwrap(), "+15551234567");
    }
}
