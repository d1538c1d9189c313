// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Persistent Storage Module
//!
//! Encrypted SQLite databases, one per [`StorageKind`]. Records are JSON
//! values grouped by collection; keys and values are encrypted with keys
//! derived from the storage password, and keys are located through keyed
//! lookup tags. Extensions maintain derived views such as secondary
//! indexes.

mod cipher;
mod error;
mod extension;
mod files;
pub mod migration;
mod outbox;
mod password;
mod readiness;
mod reset;
pub mod secure;
mod session;
mod shared;
mod txn;

pub use error::StorageError;
pub use extension::{Extension, ExtensionHost, SecondaryIndex};
pub use files::{DatabasePaths, StorageKind};
pub use outbox::OutboxStorage;
pub use password::{StoragePassword, STORAGE_PASSWORD_KEY};
pub use readiness::StorageReadiness;
pub use reset::reset_all_storage;
pub use secure::{MemoryKeyStorage, SecureStorage};
pub use session::SessionStorage;
pub use shared::{SharedConnection, SharedStorage, StorageClient};
pub use txn::Txn;

#[cfg(feature = "secure-storage")]
pub use secure::PlatformKeyring;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, MutexGuard, RwLock};
use rusqlite::{params, Connection, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::StorageConfig;

use cipher::RecordCipher;
use migration::MigrationRunner;

/// Milliseconds since the Unix epoch.
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Outcome of [`Storage::copy_collection`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyReport {
    /// Records written to the destination.
    pub copied: usize,
    /// Records left alone because the destination already had the key.
    pub skipped: usize,
}

enum ConnectionSlot {
    Closed,
    Open(Connection),
    /// Reset deleted the files; the storage can never reopen.
    Destroyed,
}

#[derive(Debug, Default)]
struct RegistrationState {
    pending_async: usize,
    finished: bool,
    reported: bool,
}

struct StorageInner {
    kind: StorageKind,
    paths: DatabasePaths,
    busy_timeout: Duration,
    cipher: RecordCipher,
    conn: Mutex<ConnectionSlot>,
    extensions: RwLock<HashMap<String, Arc<dyn Extension>>>,
    /// Serializes extension registration (schema writes).
    schema_lock: Mutex<()>,
    registration: Mutex<RegistrationState>,
    readiness: Arc<StorageReadiness>,
}

/// One encrypted database.
///
/// Cloning yields another handle to the same database. Every method may be
/// called from any thread; transactions on one handle are serialized.
#[derive(Clone)]
pub struct Storage {
    inner: Arc<StorageInner>,
}

impl Storage {
    /// Opens (creating if needed) the database of `kind`.
    pub fn open(
        config: &StorageConfig,
        kind: StorageKind,
        password: &StoragePassword,
        readiness: &Arc<StorageReadiness>,
    ) -> Result<Self, StorageError> {
        let storage = Self::new_closed(config, kind, password, readiness)?;
        storage.connect()?;
        Ok(storage)
    }

    /// Creates the handle without touching the file. Shared storages open
    /// the file when their first client arrives.
    pub(crate) fn new_closed(
        config: &StorageConfig,
        kind: StorageKind,
        password: &StoragePassword,
        readiness: &Arc<StorageReadiness>,
    ) -> Result<Self, StorageError> {
        let cipher = RecordCipher::new(&password.database_key(kind)?)?;
        readiness.track(kind);

        Ok(Storage {
            inner: Arc::new(StorageInner {
                kind,
                paths: config.database_paths(kind),
                busy_timeout: config.busy_timeout(),
                cipher,
                conn: Mutex::new(ConnectionSlot::Closed),
                extensions: RwLock::new(HashMap::new()),
                schema_lock: Mutex::new(()),
                registration: Mutex::new(RegistrationState::default()),
                readiness: Arc::clone(readiness),
            }),
        })
    }

    // === Connection lifecycle ===

    pub(crate) fn connect(&self) -> Result<(), StorageError> {
        let mut slot = self.inner.conn.lock();
        match &*slot {
            ConnectionSlot::Open(_) => return Ok(()),
            ConnectionSlot::Destroyed => return Err(StorageError::ConnectionClosed),
            ConnectionSlot::Closed => {}
        }

        let path = self.inner.paths.main();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(self.inner.busy_timeout)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            warn!(kind = %self.inner.kind, %mode, "database is not in WAL mode");
        }
        MigrationRunner::run(&conn, &migration::all_migrations())?;
        self.inner.paths.protect()?;

        *slot = ConnectionSlot::Open(conn);
        info!(kind = %self.inner.kind, path = %path.display(), "database opened");
        Ok(())
    }

    pub(crate) fn disconnect(&self) {
        let mut slot = self.inner.conn.lock();
        if matches!(*slot, ConnectionSlot::Open(_)) {
            close_slot(&mut slot, ConnectionSlot::Closed, self.inner.kind);
        }
    }

    /// Closes the database for good. Used before its files are deleted.
    pub(crate) fn shutdown(&self) {
        let mut slot = self.inner.conn.lock();
        close_slot(&mut slot, ConnectionSlot::Destroyed, self.inner.kind);
    }

    /// True while the file is open.
    pub fn is_open(&self) -> bool {
        matches!(*self.inner.conn.lock(), ConnectionSlot::Open(_))
    }

    // === Transactions ===

    /// Runs `f` in a read transaction.
    pub fn read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Txn<'_>) -> Result<T, E>,
        E: From<StorageError>,
    {
        self.transact(false, f)
    }

    /// Runs `f` in a write transaction, committed only if `f` succeeds.
    pub fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Txn<'_>) -> Result<T, E>,
        E: From<StorageError>,
    {
        self.transact(true, f)
    }

    fn transact<T, E, F>(&self, writable: bool, f: F) -> Result<T, E>
    where
        F: FnOnce(&Txn<'_>) -> Result<T, E>,
        E: From<StorageError>,
    {
        let mut slot = self.inner.conn.lock();
        let conn = match &mut *slot {
            ConnectionSlot::Open(conn) => conn,
            _ => return Err(StorageError::ConnectionClosed.into()),
        };

        let behavior = if writable {
            TransactionBehavior::Immediate
        } else {
            TransactionBehavior::Deferred
        };
        let tx = conn
            .transaction_with_behavior(behavior)
            .map_err(StorageError::from)?;
        let txn = Txn::new(
            tx,
            &self.inner.cipher,
            self.extension_snapshot(),
            self.inner.kind,
            self.inner.readiness.is_ready(),
            writable,
        );

        // Dropping an uncommitted transaction rolls it back.
        let value = f(&txn)?;
        if writable {
            txn.commit()?;
        }
        Ok(value)
    }

    fn extension_snapshot(&self) -> Vec<(String, Arc<dyn Extension>)> {
        self.inner
            .extensions
            .read()
            .iter()
            .map(|(name, ext)| (name.clone(), Arc::clone(ext)))
            .collect()
    }

    // === Extensions ===

    /// The extension registered under `name`, if any.
    pub fn registered_extension(&self, name: &str) -> Option<Arc<dyn Extension>> {
        self.inner.extensions.read().get(name).cloned()
    }

    /// Registers and populates an extension, blocking the caller.
    ///
    /// Returns false if `name` is already taken or populating failed; in
    /// both cases nothing changes.
    pub fn register_extension(&self, name: &str, extension: Arc<dyn Extension>) -> bool {
        let _schema = self.inner.schema_lock.lock();
        if self.inner.extensions.read().contains_key(name) {
            warn!(name, kind = %self.inner.kind, "extension is already registered");
            return false;
        }

        // The extension joins the live set inside the populating
        // transaction so no concurrent write can slip between the two.
        let result = self.write(|txn| {
            extension.populate(txn, name)?;
            txn.record_extension(name, extension.version())?;
            self.inner
                .extensions
                .write()
                .insert(name.to_string(), Arc::clone(&extension));
            Ok::<_, StorageError>(())
        });

        match result {
            Ok(()) => {
                info!(name, kind = %self.inner.kind, "registered extension");
                true
            }
            Err(e) => {
                self.inner.extensions.write().remove(name);
                error!(name, kind = %self.inner.kind, error = %e, "extension registration failed");
                false
            }
        }
    }

    /// Registers on a worker thread. `completion` runs exactly once, on
    /// that thread, after the registration is accounted for.
    pub fn async_register_extension<F>(
        &self,
        name: &str,
        extension: Arc<dyn Extension>,
        completion: F,
    ) where
        F: FnOnce(bool) + Send + 'static,
    {
        self.inner.registration.lock().pending_async += 1;

        type Completion = Box<dyn FnOnce(bool) + Send>;
        let completion: Arc<Mutex<Option<Completion>>> =
            Arc::new(Mutex::new(Some(Box::new(completion))));

        let storage = self.clone();
        let worker_name = name.to_string();
        let worker_completion = Arc::clone(&completion);
        let spawned = thread::Builder::new()
            .name(format!("sigil-register-{}", name))
            .spawn(move || {
                let ok = storage.register_extension(&worker_name, extension);
                storage.end_async_registration();
                if let Some(done) = worker_completion.lock().take() {
                    done(ok);
                }
            });

        if let Err(e) = spawned {
            error!(name, error = %e, "could not start registration worker");
            self.end_async_registration();
            if let Some(done) = completion.lock().take() {
                done(false);
            }
        }
    }

    fn end_async_registration(&self) {
        let mut state = self.inner.registration.lock();
        state.pending_async = state.pending_async.saturating_sub(1);
        self.report_if_complete(state);
    }

    /// Marks the end of this storage's registration phase. Readiness is
    /// reported once every asynchronous registration has also finished.
    pub fn finish_registrations(&self) {
        let mut state = self.inner.registration.lock();
        state.finished = true;
        self.report_if_complete(state);
    }

    fn report_if_complete(&self, mut state: MutexGuard<'_, RegistrationState>) {
        if !state.finished || state.pending_async > 0 || state.reported {
            return;
        }
        state.reported = true;
        drop(state);
        debug!(kind = %self.inner.kind, "all extension registrations complete");
        self.inner.readiness.storage_completed(self.inner.kind);
    }

    // === Metadata ===

    pub fn storage_type(&self) -> StorageKind {
        self.inner.kind
    }

    pub fn database_paths(&self) -> &DatabasePaths {
        &self.inner.paths
    }

    pub fn database_file_path(&self) -> &Path {
        self.inner.paths.main()
    }

    /// Size of the main database file; 0 if it does not exist.
    pub fn database_file_size(&self) -> u64 {
        self.inner.paths.main_file_size()
    }

    /// Process-wide readiness this storage reports to.
    pub fn readiness(&self) -> &Arc<StorageReadiness> {
        &self.inner.readiness
    }

    // === Bulk operations ===

    /// Copies every record of `collection` from `from` into this storage.
    ///
    /// Keys are preserved. A key already present here is left untouched,
    /// which makes repeated calls harmless.
    pub fn copy_collection<T>(
        &self,
        collection: &str,
        from: &Storage,
    ) -> Result<CopyReport, StorageError>
    where
        T: Serialize + DeserializeOwned,
    {
        let records: Vec<(String, T)> = from.read(|txn| txn.all(collection))?;

        let report = self.write(|txn| {
            let mut report = CopyReport::default();
            for (key, value) in &records {
                if txn.contains(collection, key)? {
                    report.skipped += 1;
                } else {
                    txn.set(collection, key, value)?;
                    report.copied += 1;
                }
            }
            Ok::<_, StorageError>(report)
        })?;

        info!(
            collection,
            from = %from.storage_type(),
            to = %self.inner.kind,
            copied = report.copied,
            skipped = report.skipped,
            "copied collection"
        );
        Ok(report)
    }

    /// Writes a consistent snapshot of this database over `dest`.
    pub fn export_snapshot(&self, dest: &DatabasePaths) -> Result<(), StorageError> {
        let slot = self.inner.conn.lock();
        let conn = match &*slot {
            ConnectionSlot::Open(conn) => conn,
            _ => return Err(StorageError::ConnectionClosed),
        };

        if let Some(dir) = dest.main().parent() {
            std::fs::create_dir_all(dir)?;
        }
        let snapshot = dest.main().with_extension("snapshot");
        match std::fs::remove_file(&snapshot) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        conn.execute(
            "VACUUM INTO ?1",
            params![snapshot.to_string_lossy().into_owned()],
        )?;
        drop(slot);

        if let Err(e) = dest.install_snapshot(&snapshot) {
            let _ = std::fs::remove_file(&snapshot);
            return Err(e);
        }
        info!(from = %self.inner.kind, path = %dest.main().display(), "installed snapshot");
        Ok(())
    }
}

impl ExtensionHost for Storage {
    fn registered_extension(&self, name: &str) -> Option<Arc<dyn Extension>> {
        Storage::registered_extension(self, name)
    }

    fn register_extension(&self, name: &str, extension: Arc<dyn Extension>) -> bool {
        Storage::register_extension(self, name, extension)
    }

    fn async_register_extension<F>(&self, name: &str, extension: Arc<dyn Extension>, completion: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        Storage::async_register_extension(self, name, extension, completion)
    }
}

fn close_slot(slot: &mut ConnectionSlot, next: ConnectionSlot, kind: StorageKind) {
    if let ConnectionSlot::Open(conn) = std::mem::replace(slot, next) {
        match conn.close() {
            Ok(()) => info!(%kind, "database closed"),
            Err((_, e)) => warn!(%kind, error = %e, "database did not close cleanly"),
        }
    }
}
