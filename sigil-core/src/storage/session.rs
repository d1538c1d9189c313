// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Session database: identity keys and session state, shared with the
//! extension process.

use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use crate::config::StorageConfig;

use super::{SharedStorage, StorageError, StorageKind, StoragePassword, StorageReadiness};

/// The session database.
#[derive(Clone)]
pub struct SessionStorage {
    shared: SharedStorage,
}

impl SessionStorage {
    pub fn new(
        config: &StorageConfig,
        password: &StoragePassword,
        readiness: &Arc<StorageReadiness>,
    ) -> Result<Self, StorageError> {
        Ok(SessionStorage {
            shared: SharedStorage::new(config, StorageKind::Session, password, readiness)?,
        })
    }

    pub fn database_file_shm_path(&self) -> &Path {
        self.shared.database_paths().shm()
    }

    pub fn database_file_wal_path(&self) -> &Path {
        self.shared.database_paths().wal()
    }
}

impl Deref for SessionStorage {
    type Target = SharedStorage;

    fn deref(&self) -> &SharedStorage {
        &self.shared
    }
}
