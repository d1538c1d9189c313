// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Storage Extensions
//!
//! An extension is a derived view kept in step with the records of a
//! database. Registration populates it from existing records; afterwards
//! every write and removal inside a transaction is forwarded to it.
//!
//! Every process that writes a collection must register the extensions
//! that index it, otherwise rows written by that process are not indexed
//! until the next registration rebuilds the view.

use std::sync::Arc;

use serde_json::Value;

use super::{StorageError, Txn};

/// A view maintained alongside the records of one database.
pub trait Extension: Send + Sync {
    /// Stored next to the extension's name when it is registered.
    fn version(&self) -> u32 {
        1
    }

    /// Builds the view from the records already present.
    fn populate(&self, txn: &Txn<'_>, name: &str) -> Result<(), StorageError>;

    /// Called after a record was inserted or replaced.
    fn record_written(
        &self,
        _txn: &Txn<'_>,
        _name: &str,
        _collection: &str,
        _key: &str,
        _value: &Value,
    ) -> Result<(), StorageError> {
        Ok(())
    }

    /// Called after a record was removed.
    fn record_removed(
        &self,
        _txn: &Txn<'_>,
        _name: &str,
        _collection: &str,
        _key: &str,
    ) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Something extensions can be registered with: a plain [`Storage`] or a
/// [`SharedStorage`] that must hold a client while registering.
///
/// [`Storage`]: super::Storage
/// [`SharedStorage`]: super::SharedStorage
pub trait ExtensionHost {
    /// The extension registered under `name`, if any.
    fn registered_extension(&self, name: &str) -> Option<Arc<dyn Extension>>;

    /// Registers and populates an extension, blocking the caller.
    /// Returns false on a duplicate name or if populating failed.
    fn register_extension(&self, name: &str, extension: Arc<dyn Extension>) -> bool;

    /// Registers on a worker thread. `completion` runs exactly once, on
    /// that thread, with the registration result.
    fn async_register_extension<F>(&self, name: &str, extension: Arc<dyn Extension>, completion: F)
    where
        F: FnOnce(bool) + Send + 'static;
}

/// Indexes the records of one collection by a top-level field.
///
/// String and number fields are indexed; records where the field is
/// missing or has another type are left out.
#[derive(Debug, Clone)]
pub struct SecondaryIndex {
    collection: String,
    field: String,
}

impl SecondaryIndex {
    pub fn new(collection: impl Into<String>, field: impl Into<String>) -> Self {
        SecondaryIndex {
            collection: collection.into(),
            field: field.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn indexed_value(&self, record: &Value) -> Option<String> {
        match record.get(&self.field)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl Extension for SecondaryIndex {
    fn populate(&self, txn: &Txn<'_>, name: &str) -> Result<(), StorageError> {
        txn.index_clear(name)?;
        for (key, record) in txn.all_values(&self.collection)? {
            if let Some(value) = self.indexed_value(&record) {
                txn.index_put(name, &self.collection, &key, &value)?;
            }
        }
        Ok(())
    }

    fn record_written(
        &self,
        txn: &Txn<'_>,
        name: &str,
        collection: &str,
        key: &str,
        record: &Value,
    ) -> Result<(), StorageError> {
        if collection != self.collection {
            return Ok(());
        }
        match self.indexed_value(record) {
            Some(value) => txn.index_put(name, collection, key, &value),
            None => txn.index_remove(name, collection, key),
        }
    }

    fn record_removed(
        &self,
        txn: &Txn<'_>,
        name: &str,
        collection: &str,
        key: &str,
    ) -> Result<(), StorageError> {
        if collection != self.collection {
            return Ok(());
        }
        txn.index_remove(name, collection, key)
    }
}
