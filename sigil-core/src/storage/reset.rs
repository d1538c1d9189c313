// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Full Storage Reset
//!
//! Deletes every database file of every storage kind together with the
//! storage password. Storages opened before the reset must not be used
//! afterwards; `StorageEnvironment::reset_all_storage` closes them first.

use tracing::{info, warn};

use crate::config::StorageConfig;

use super::{SecureStorage, StorageError, StorageKind, StoragePassword};

/// Deletes all storage files and the storage password.
///
/// Every file is attempted even when an earlier deletion failed; the first
/// failure is returned.
pub fn reset_all_storage(
    config: &StorageConfig,
    keychain: &dyn SecureStorage,
) -> Result<(), StorageError> {
    let mut first_error = None;

    for kind in StorageKind::ALL {
        let paths = config.database_paths(kind);
        if let Err(e) = paths.delete_all() {
            warn!(%kind, error = %e, "failed to delete storage files");
            first_error.get_or_insert(e);
        }
        // Left behind by an interrupted snapshot export.
        let _ = std::fs::remove_file(paths.main().with_extension("snapshot"));
    }

    if let Err(e) = StoragePassword::delete(keychain) {
        warn!(error = %e, "failed to delete storage password");
        first_error.get_or_insert(e);
    }

    match first_error {
        Some(e) => Err(e),
        None => {
            info!("all storage reset");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryKeyStorage, STORAGE_PASSWORD_KEY};
    use tempfile::TempDir;

    #[test]
    fn test_reset_removes_every_file_and_password() {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig::in_dir(dir.path());
        let keychain = MemoryKeyStorage::new();
        keychain.save_key(STORAGE_PASSWORD_KEY, &[1u8; 32]).unwrap();

        for kind in StorageKind::ALL {
            let paths = config.database_paths(kind);
            std::fs::create_dir_all(paths.main().parent().unwrap()).unwrap();
            for path in paths.all() {
                std::fs::write(path, b"x").unwrap();
            }
        }

        reset_all_storage(&config, &keychain).unwrap();

        for kind in StorageKind::ALL {
            assert!(!config.database_paths(kind).any_exists(), "{} left files", kind);
        }
        assert!(!keychain.has_key(STORAGE_PASSWORD_KEY).unwrap());
    }
}
