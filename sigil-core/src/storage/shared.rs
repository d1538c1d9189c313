// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Shared Storage
//!
//! A database that other processes open too. The file stays open only while
//! at least one [`StorageClient`] is alive; when the last one goes away the
//! connection is closed so the process holds no lock on it while suspended.
//!
//! Connections handed out through [`SharedStorage::db_connection`] remember
//! the client generation they were issued in and refuse to run once the
//! file has been closed, even if it was reopened since.

use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::StorageConfig;

use super::{
    CopyReport, DatabasePaths, Extension, ExtensionHost, Storage, StorageError, StorageKind,
    StoragePassword, StorageReadiness, Txn,
};

#[derive(Debug, Default)]
struct ClientState {
    count: usize,
    generation: u64,
}

struct SharedCore {
    storage: Storage,
    clients: RwLock<ClientState>,
}

impl SharedCore {
    fn add_client(self: &Arc<Self>) -> Result<StorageClient, StorageError> {
        let mut state = self.clients.write();
        if state.count == 0 {
            self.storage.connect()?;
        }
        state.count += 1;
        debug!(kind = %self.storage.storage_type(), clients = state.count, "client added");
        Ok(StorageClient {
            core: Arc::clone(self),
            released: false,
        })
    }

    fn remove_client(&self) {
        let mut state = self.clients.write();
        match state.count {
            0 => error!(kind = %self.storage.storage_type(), "client removed twice"),
            1 => {
                state.count = 0;
                state.generation += 1;
                self.storage.disconnect();
                info!(kind = %self.storage.storage_type(), "last client left, file closed");
            }
            _ => {
                state.count -= 1;
                debug!(
                    kind = %self.storage.storage_type(),
                    clients = state.count,
                    "client removed"
                );
            }
        }
    }
}

/// A storage whose file is opened and closed by client reference counting.
///
/// Cloning yields another handle to the same storage and client count.
#[derive(Clone)]
pub struct SharedStorage {
    core: Arc<SharedCore>,
    /// The host process's own client, dropped while in the background.
    foreground: Arc<Mutex<Option<StorageClient>>>,
}

impl SharedStorage {
    /// Creates the storage with the file closed and no clients.
    pub fn new(
        config: &StorageConfig,
        kind: StorageKind,
        password: &StoragePassword,
        readiness: &Arc<StorageReadiness>,
    ) -> Result<Self, StorageError> {
        let storage = Storage::new_closed(config, kind, password, readiness)?;
        Ok(SharedStorage {
            core: Arc::new(SharedCore {
                storage,
                clients: RwLock::new(ClientState::default()),
            }),
            foreground: Arc::new(Mutex::new(None)),
        })
    }

    /// The underlying storage. Its transactions fail with
    /// [`StorageError::ConnectionClosed`] while no client is alive.
    pub fn storage(&self) -> &Storage {
        &self.core.storage
    }

    /// Registers a client, opening the file if it was closed.
    ///
    /// The count is unchanged if opening fails.
    pub fn add_client(&self) -> Result<StorageClient, StorageError> {
        self.core.add_client()
    }

    /// Releases a client. Same as dropping it.
    pub fn remove_client(&self, client: StorageClient) {
        client.remove();
    }

    pub fn client_count(&self) -> usize {
        self.core.clients.read().count
    }

    /// A handle valid until the client count next returns to zero.
    pub fn db_connection(&self) -> Result<SharedConnection, StorageError> {
        let state = self.core.clients.read();
        if state.count == 0 {
            error!(
                kind = %self.core.storage.storage_type(),
                "connection requested without a client"
            );
            return Err(StorageError::ConnectionClosed);
        }
        Ok(SharedConnection {
            core: Arc::clone(&self.core),
            generation: state.generation,
        })
    }

    /// Copies a legacy collection out of `from` into this database.
    /// Keys already present here are kept as they are.
    pub fn copy_collection<T>(
        &self,
        collection: &str,
        from: &Storage,
    ) -> Result<CopyReport, StorageError>
    where
        T: Serialize + DeserializeOwned,
    {
        let _client = self.add_client()?;
        self.core.storage.copy_collection::<T>(collection, from)
    }

    /// Applies owner-only permissions to every backing file.
    pub fn protect_files(&self) -> Result<(), StorageError> {
        self.core.storage.database_paths().protect()
    }

    /// Takes the host's own client back after a suspension.
    pub fn enter_foreground(&self) -> Result<(), StorageError> {
        let mut foreground = self.foreground.lock();
        if foreground.is_none() {
            *foreground = Some(self.add_client()?);
        }
        Ok(())
    }

    /// Drops the host's own client so the file can close while suspended.
    pub fn enter_background(&self) {
        let client = self.foreground.lock().take();
        drop(client);
    }

    pub fn storage_type(&self) -> StorageKind {
        self.core.storage.storage_type()
    }

    pub fn database_paths(&self) -> &DatabasePaths {
        self.core.storage.database_paths()
    }

    pub fn database_file_path(&self) -> &Path {
        self.core.storage.database_file_path()
    }

    pub fn database_file_size(&self) -> u64 {
        self.core.storage.database_file_size()
    }

    pub fn finish_registrations(&self) {
        self.core.storage.finish_registrations()
    }

    pub(crate) fn shutdown(&self) {
        self.foreground.lock().take();
        self.core.storage.shutdown();
    }
}

impl ExtensionHost for SharedStorage {
    fn registered_extension(&self, name: &str) -> Option<Arc<dyn Extension>> {
        self.core.storage.registered_extension(name)
    }

    fn register_extension(&self, name: &str, extension: Arc<dyn Extension>) -> bool {
        match self.add_client() {
            Ok(_client) => self.core.storage.register_extension(name, extension),
            Err(e) => {
                error!(name, error = %e, "could not open storage to register extension");
                false
            }
        }
    }

    fn async_register_extension<F>(&self, name: &str, extension: Arc<dyn Extension>, completion: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        match self.add_client() {
            Ok(client) => self
                .core
                .storage
                .async_register_extension(name, extension, move |ok| {
                    drop(client);
                    completion(ok);
                }),
            Err(e) => {
                error!(name, error = %e, "could not open storage to register extension");
                completion(false);
            }
        }
    }
}

/// Keeps a shared storage's file open while alive.
///
/// Released on drop or through [`StorageClient::remove`]; released exactly
/// once either way.
pub struct StorageClient {
    core: Arc<SharedCore>,
    released: bool,
}

impl StorageClient {
    /// A connection handle issued under this client.
    pub fn connection(&self) -> SharedConnection {
        SharedConnection {
            core: Arc::clone(&self.core),
            generation: self.core.clients.read().generation,
        }
    }

    /// Releases the client now.
    pub fn remove(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.core.remove_client();
        }
    }
}

impl Drop for StorageClient {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for StorageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageClient")
            .field("kind", &self.core.storage.storage_type())
            .field("released", &self.released)
            .finish()
    }
}

/// Connection handle tied to one client generation.
///
/// Do not add or remove clients of the same storage from inside its
/// transactions.
#[derive(Clone)]
pub struct SharedConnection {
    core: Arc<SharedCore>,
    generation: u64,
}

impl SharedConnection {
    /// True while the generation this handle was issued in is still open.
    pub fn is_valid(&self) -> bool {
        let state = self.core.clients.read();
        state.count > 0 && state.generation == self.generation
    }

    pub fn read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Txn<'_>) -> Result<T, E>,
        E: From<StorageError>,
    {
        // Held for the whole transaction so the file cannot close under it.
        let state = self.core.clients.read();
        if state.count == 0 || state.generation != self.generation {
            return Err(StorageError::ConnectionClosed.into());
        }
        self.core.storage.read(f)
    }

    pub fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Txn<'_>) -> Result<T, E>,
        E: From<StorageError>,
    {
        let state = self.core.clients.read();
        if state.count == 0 || state.generation != self.generation {
            return Err(StorageError::ConnectionClosed.into());
        }
        self.core.storage.write(f)
    }
}
