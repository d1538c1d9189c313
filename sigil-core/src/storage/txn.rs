// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Scoped Transactions
//!
//! A [`Txn`] is only reachable inside the closure passed to
//! `Storage::read` / `Storage::write`; it commits (write) or rolls back
//! before the call returns.

use std::sync::Arc;

use rusqlite::{params, OptionalExtension, Transaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error};

use super::cipher::RecordCipher;
use super::extension::Extension;
use super::{unix_millis, StorageError, StorageKind};

/// A transaction over the encrypted record store of one database.
pub struct Txn<'a> {
    tx: Transaction<'a>,
    cipher: &'a RecordCipher,
    extensions: Vec<(String, Arc<dyn Extension>)>,
    kind: StorageKind,
    ready: bool,
    writable: bool,
}

impl<'a> Txn<'a> {
    pub(crate) fn new(
        tx: Transaction<'a>,
        cipher: &'a RecordCipher,
        extensions: Vec<(String, Arc<dyn Extension>)>,
        kind: StorageKind,
        ready: bool,
        writable: bool,
    ) -> Self {
        Txn {
            tx,
            cipher,
            extensions,
            kind,
            ready,
            writable,
        }
    }

    pub(crate) fn commit(self) -> Result<(), StorageError> {
        self.tx.commit()?;
        Ok(())
    }

    /// The database this transaction runs against.
    pub fn storage_type(&self) -> StorageKind {
        self.kind
    }

    fn ensure_writable(&self) -> Result<(), StorageError> {
        if self.writable {
            Ok(())
        } else {
            error!(kind = %self.kind, "write attempted in a read transaction");
            Err(StorageError::ReadOnlyTransaction)
        }
    }

    // === Records ===

    /// Loads and deserializes one record.
    pub fn get<T: DeserializeOwned>(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<T>, StorageError> {
        let tag = self.cipher.key_tag(collection, key);
        let sealed: Option<Vec<u8>> = self
            .tx
            .query_row(
                "SELECT value_encrypted FROM records WHERE collection = ?1 AND key_tag = ?2",
                params![collection, tag],
                |row| row.get(0),
            )
            .optional()?;

        match sealed {
            Some(sealed) => {
                let plaintext = self.cipher.open(&sealed)?;
                Ok(Some(serde_json::from_slice(&plaintext)?))
            }
            None => Ok(None),
        }
    }

    /// Returns true if `key` exists in `collection`.
    pub fn contains(&self, collection: &str, key: &str) -> Result<bool, StorageError> {
        let tag = self.cipher.key_tag(collection, key);
        let exists: bool = self.tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM records WHERE collection = ?1 AND key_tag = ?2)",
            params![collection, tag],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Inserts or replaces a record and updates every registered extension.
    pub fn set<T: Serialize>(
        &self,
        collection: &str,
        key: &str,
        value: &T,
    ) -> Result<(), StorageError> {
        self.ensure_writable()?;
        let json = serde_json::to_value(value)?;
        let plaintext = serde_json::to_vec(&json)?;

        self.tx.execute(
            "INSERT OR REPLACE INTO records
                (collection, key_tag, key_encrypted, value_encrypted, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                collection,
                self.cipher.key_tag(collection, key),
                self.cipher.seal(key.as_bytes())?,
                self.cipher.seal(&plaintext)?,
                unix_millis() as i64,
            ],
        )?;
        debug!(kind = %self.kind, collection, "record written");

        for (name, extension) in &self.extensions {
            extension.record_written(self, name, collection, key, &json)?;
        }
        Ok(())
    }

    /// Removes a record. Returns false if it did not exist.
    pub fn remove(&self, collection: &str, key: &str) -> Result<bool, StorageError> {
        self.ensure_writable()?;
        let removed = self.tx.execute(
            "DELETE FROM records WHERE collection = ?1 AND key_tag = ?2",
            params![collection, self.cipher.key_tag(collection, key)],
        )?;
        if removed == 0 {
            return Ok(false);
        }
        debug!(kind = %self.kind, collection, "record removed");

        for (name, extension) in &self.extensions {
            extension.record_removed(self, name, collection, key)?;
        }
        Ok(true)
    }

    /// Removes every record of a collection. Returns the number removed.
    pub fn remove_all(&self, collection: &str) -> Result<usize, StorageError> {
        self.ensure_writable()?;
        let keys = self.keys(collection)?;
        for key in &keys {
            self.remove(collection, key)?;
        }
        Ok(keys.len())
    }

    /// Decrypted keys of a collection, in no particular order.
    pub fn keys(&self, collection: &str) -> Result<Vec<String>, StorageError> {
        let mut stmt = self
            .tx
            .prepare("SELECT key_encrypted FROM records WHERE collection = ?1")?;
        let sealed: Vec<Vec<u8>> = stmt
            .query_map(params![collection], |row| row.get(0))?
            .collect::<Result<_, _>>()?;

        sealed
            .iter()
            .map(|key| self.cipher.open_string(key))
            .collect()
    }

    /// Every record of a collection, deserialized.
    pub fn all<T: DeserializeOwned>(
        &self,
        collection: &str,
    ) -> Result<Vec<(String, T)>, StorageError> {
        self.all_values(collection)?
            .into_iter()
            .map(|(key, value)| Ok((key, serde_json::from_value(value)?)))
            .collect()
    }

    /// Every record of a collection, each decoded on its own.
    ///
    /// A record whose value cannot be opened or deserialized yields an error
    /// in its slot; the rest of the collection is still returned.
    pub fn all_each<T: DeserializeOwned>(
        &self,
        collection: &str,
    ) -> Result<Vec<(String, Result<T, StorageError>)>, StorageError> {
        self.sealed_rows(collection)?
            .iter()
            .map(|(key, value)| {
                let key = self.cipher.open_string(key)?;
                let decoded = self
                    .cipher
                    .open(value)
                    .and_then(|plaintext| Ok(serde_json::from_slice(&plaintext)?));
                Ok((key, decoded))
            })
            .collect()
    }

    /// Every record of a collection as untyped JSON.
    pub fn all_values(
        &self,
        collection: &str,
    ) -> Result<Vec<(String, serde_json::Value)>, StorageError> {
        self.sealed_rows(collection)?
            .iter()
            .map(|(key, value)| {
                let key = self.cipher.open_string(key)?;
                let value = serde_json::from_slice(&self.cipher.open(value)?)?;
                Ok((key, value))
            })
            .collect()
    }

    fn sealed_rows(&self, collection: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let mut stmt = self.tx.prepare(
            "SELECT key_encrypted, value_encrypted FROM records WHERE collection = ?1",
        )?;
        let rows = stmt
            .query_map(params![collection], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }

    /// Number of records in a collection.
    pub fn count(&self, collection: &str) -> Result<usize, StorageError> {
        let count: i64 = self.tx.query_row(
            "SELECT COUNT(*) FROM records WHERE collection = ?1",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // === Secondary indexes ===

    /// Keys of the records whose indexed value equals `value`.
    ///
    /// Querying before storage is ready, or through an extension that was
    /// never registered, is a programming error and is reported as such.
    pub fn index_lookup(
        &self,
        extension: &str,
        value: &str,
    ) -> Result<Vec<(String, String)>, StorageError> {
        if !self.ready {
            error!(extension, "extension view queried before storage is ready");
            return Err(StorageError::NotReady(extension.to_string()));
        }
        if !self.extensions.iter().any(|(name, _)| name == extension) {
            error!(extension, kind = %self.kind, "extension view is not registered");
            return Err(StorageError::ExtensionNotRegistered(extension.to_string()));
        }

        let mut stmt = self.tx.prepare(
            "SELECT r.collection, r.key_encrypted
             FROM extension_index i
             JOIN records r ON r.collection = i.collection AND r.key_tag = i.key_tag
             WHERE i.extension = ?1 AND i.value_tag = ?2",
        )?;
        let rows: Vec<(String, Vec<u8>)> = stmt
            .query_map(
                params![extension, self.cipher.index_tag(extension, value)],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?
            .collect::<Result<_, _>>()?;

        rows.into_iter()
            .map(|(collection, key)| Ok((collection, self.cipher.open_string(&key)?)))
            .collect()
    }

    /// Points `extension`'s entry for (`collection`, `key`) at `value`.
    pub fn index_put(
        &self,
        extension: &str,
        collection: &str,
        key: &str,
        value: &str,
    ) -> Result<(), StorageError> {
        self.ensure_writable()?;
        self.tx.execute(
            "INSERT OR REPLACE INTO extension_index (extension, collection, key_tag, value_tag)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                extension,
                collection,
                self.cipher.key_tag(collection, key),
                self.cipher.index_tag(extension, value),
            ],
        )?;
        Ok(())
    }

    /// Drops `extension`'s entry for (`collection`, `key`).
    pub fn index_remove(
        &self,
        extension: &str,
        collection: &str,
        key: &str,
    ) -> Result<(), StorageError> {
        self.ensure_writable()?;
        self.tx.execute(
            "DELETE FROM extension_index
             WHERE extension = ?1 AND collection = ?2 AND key_tag = ?3",
            params![extension, collection, self.cipher.key_tag(collection, key)],
        )?;
        Ok(())
    }

    /// Drops every entry of `extension`.
    pub fn index_clear(&self, extension: &str) -> Result<(), StorageError> {
        self.ensure_writable()?;
        self.tx.execute(
            "DELETE FROM extension_index WHERE extension = ?1",
            params![extension],
        )?;
        Ok(())
    }

    pub(crate) fn record_extension(&self, name: &str, version: u32) -> Result<(), StorageError> {
        self.ensure_writable()?;
        self.tx.execute(
            "INSERT OR REPLACE INTO extensions (name, version, registered_at) VALUES (?1, ?2, ?3)",
            params![name, version, unix_millis() as i64],
        )?;
        Ok(())
    }
}
