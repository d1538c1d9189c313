// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Outbox database: messages the extension process hands to the main app.
//! Queue operations live in [`crate::outbox`].

use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use crate::config::StorageConfig;

use super::{
    Extension, ExtensionHost, SharedStorage, StorageError, StorageKind, StoragePassword,
    StorageReadiness,
};

/// The outbox database.
#[derive(Clone)]
pub struct OutboxStorage {
    shared: SharedStorage,
}

impl OutboxStorage {
    pub fn new(
        config: &StorageConfig,
        password: &StoragePassword,
        readiness: &Arc<StorageReadiness>,
    ) -> Result<Self, StorageError> {
        Ok(OutboxStorage {
            shared: SharedStorage::new(config, StorageKind::Outbox, password, readiness)?,
        })
    }

    pub fn database_file_shm_path(&self) -> &Path {
        self.shared.database_paths().shm()
    }

    pub fn database_file_wal_path(&self) -> &Path {
        self.shared.database_paths().wal()
    }
}

impl ExtensionHost for OutboxStorage {
    fn registered_extension(&self, name: &str) -> Option<Arc<dyn Extension>> {
        self.shared.registered_extension(name)
    }

    fn register_extension(&self, name: &str, extension: Arc<dyn Extension>) -> bool {
        self.shared.register_extension(name, extension)
    }

    fn async_register_extension<F>(&self, name: &str, extension: Arc<dyn Extension>, completion: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        self.shared.async_register_extension(name, extension, completion)
    }
}

impl Deref for OutboxStorage {
    type Target = SharedStorage;

    fn deref(&self) -> &SharedStorage {
        &self.shared
    }
}
