// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Storage Configuration
//!
//! Where each database lives and how the storage layer talks to the
//! keychain. Private databases go under `data_dir`; databases that the app
//! extension must reach go under `shared_dir` (the app-group container).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::storage::{DatabasePaths, StorageKind};

/// Default keychain service name.
pub const DEFAULT_KEYCHAIN_SERVICE: &str = "sigil";

/// Default SQLite busy timeout (cross-process lock contention).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// App-private directory (primary database).
    pub data_dir: PathBuf,
    /// App-group directory shared with the extension process.
    pub shared_dir: PathBuf,
    /// Keychain service under which the storage password is kept.
    pub keychain_service: String,
    /// How long a connection waits on a lock held by another process.
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            data_dir: PathBuf::from("sigil-data"),
            shared_dir: PathBuf::from("sigil-shared"),
            keychain_service: DEFAULT_KEYCHAIN_SERVICE.to_string(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl StorageConfig {
    /// Lays out both directories under a single root (tests, desktop hosts).
    pub fn in_dir<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref();
        StorageConfig {
            data_dir: root.join("private"),
            shared_dir: root.join("shared"),
            ..StorageConfig::default()
        }
    }

    pub fn with_data_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_shared_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.shared_dir = dir.into();
        self
    }

    pub fn with_keychain_service(mut self, service: impl Into<String>) -> Self {
        self.keychain_service = service.into();
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Busy timeout as a `Duration`.
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Directory holding the database of the given kind.
    pub fn directory_for(&self, kind: StorageKind) -> &Path {
        match kind {
            StorageKind::Unknown | StorageKind::Primary => &self.data_dir,
            StorageKind::Session | StorageKind::Outbox | StorageKind::PrimaryCopy => {
                &self.shared_dir
            }
        }
    }

    /// The three files (main, SHM, WAL) of the database of the given kind.
    pub fn database_paths(&self, kind: StorageKind) -> DatabasePaths {
        DatabasePaths::new(self.directory_for(kind).join(kind.file_name()))
    }
}
