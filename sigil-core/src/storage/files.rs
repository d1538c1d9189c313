// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Database kinds and their on-disk file sets.
//!
//! Every logical database is three files: the main file plus the SQLite
//! shared-memory index (`-shm`) and write-ahead log (`-wal`). They are
//! deleted, protected and replaced together.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::StorageError;

/// Which logical database a storage instance manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageKind {
    Unknown,
    /// The main app's database.
    Primary,
    /// Session and identity state, shared with the extension.
    Session,
    /// Messages handed from the extension to the main app.
    Outbox,
    /// A slightly stale copy of the primary database maintained by the main
    /// app; the extension uses it as its primary.
    PrimaryCopy,
}

impl StorageKind {
    /// Every kind that owns files on disk.
    pub const ALL: [StorageKind; 5] = [
        StorageKind::Unknown,
        StorageKind::Primary,
        StorageKind::Session,
        StorageKind::Outbox,
        StorageKind::PrimaryCopy,
    ];

    /// File name of the main database file.
    pub fn file_name(self) -> &'static str {
        match self {
            StorageKind::Unknown => "unknown.sqlite",
            StorageKind::Primary => "primary.sqlite",
            StorageKind::Session => "session.sqlite",
            StorageKind::Outbox => "outbox.sqlite",
            StorageKind::PrimaryCopy => "primary-copy.sqlite",
        }
    }

    /// HKDF info used to derive this database's keys from the storage
    /// password. The primary copy shares the primary's keys because it is
    /// a byte-level snapshot of it.
    pub(crate) fn key_domain(self) -> &'static [u8] {
        match self {
            StorageKind::Unknown => b"sigil/storage/unknown",
            StorageKind::Primary | StorageKind::PrimaryCopy => b"sigil/storage/primary",
            StorageKind::Session => b"sigil/storage/session",
            StorageKind::Outbox => b"sigil/storage/outbox",
        }
    }
}

impl std::fmt::Display for StorageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StorageKind::Unknown => "unknown",
            StorageKind::Primary => "primary",
            StorageKind::Session => "session",
            StorageKind::Outbox => "outbox",
            StorageKind::PrimaryCopy => "primary-copy",
        };
        f.write_str(name)
    }
}

/// The main, SHM and WAL paths of one database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabasePaths {
    main: PathBuf,
    shm: PathBuf,
    wal: PathBuf,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

impl DatabasePaths {
    pub fn new(main: PathBuf) -> Self {
        DatabasePaths {
            shm: with_suffix(&main, "-shm"),
            wal: with_suffix(&main, "-wal"),
            main,
        }
    }

    pub fn main(&self) -> &Path {
        &self.main
    }

    pub fn shm(&self) -> &Path {
        &self.shm
    }

    pub fn wal(&self) -> &Path {
        &self.wal
    }

    pub fn all(&self) -> [&Path; 3] {
        [&self.main, &self.shm, &self.wal]
    }

    /// True if any of the three files is present.
    pub fn any_exists(&self) -> bool {
        self.all().iter().any(|p| p.exists())
    }

    /// Size of the main file, or 0 when it does not exist.
    pub fn main_file_size(&self) -> u64 {
        std::fs::metadata(&self.main).map(|m| m.len()).unwrap_or(0)
    }

    /// Deletes all three files.
    ///
    /// Every file is attempted even if an earlier removal failed; the first
    /// failure is returned. Missing files are not an error.
    pub fn delete_all(&self) -> Result<(), StorageError> {
        let mut first_error = None;
        for path in self.all() {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "deleted database file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to delete database file");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(StorageError::Io(e)),
            None => Ok(()),
        }
    }

    /// Restricts every existing file to owner read/write. Idempotent.
    pub fn protect(&self) -> Result<(), StorageError> {
        for path in self.all() {
            if path.exists() {
                protect_file(path)?;
            }
        }
        Ok(())
    }

    /// Replaces this file set with a freshly written snapshot file.
    ///
    /// The stale SHM/WAL companions are removed first so the snapshot is
    /// never paired with another database's log, then the snapshot is
    /// renamed over the main file in a single step.
    pub fn install_snapshot(&self, snapshot: &Path) -> Result<(), StorageError> {
        for path in [&self.shm, &self.wal] {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::Io(e)),
            }
        }
        std::fs::rename(snapshot, &self.main)?;
        self.protect()
    }
}

#[cfg(unix)]
fn protect_file(path: &Path) -> Result<(), StorageError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn protect_file(_path: &Path) -> Result<(), StorageError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_companion_paths() {
        let paths = DatabasePaths::new(PathBuf::from("/data/outbox.sqlite"));
        assert_eq!(paths.shm(), Path::new("/data/outbox.sqlite-shm"));
        assert_eq!(paths.wal(), Path::new("/data/outbox.sqlite-wal"));
    }

    #[test]
    fn test_delete_all_removes_every_file() {
        let dir = TempDir::new().unwrap();
        let paths = DatabasePaths::new(dir.path().join("db.sqlite"));
        for path in paths.all() {
            std::fs::write(path, b"x").unwrap();
        }

        paths.delete_all().unwrap();

        assert!(!paths.any_exists());
        // Deleting again is fine.
        paths.delete_all().unwrap();
    }

    #[test]
    fn test_missing_file_size_is_zero() {
        let dir = TempDir::new().unwrap();
        let paths = DatabasePaths::new(dir.path().join("missing.sqlite"));
        assert_eq!(paths.main_file_size(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_protect_is_idempotent() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let paths = DatabasePaths::new(dir.path().join("db.sqlite"));
        std::fs::write(paths.main(), b"x").unwrap();

        paths.protect().unwrap();
        paths.protect().unwrap();

        let mode = std::fs::metadata(paths.main()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
