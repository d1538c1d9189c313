// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Storage Environment
//!
//! Builds and owns every storage, the identity manager and the outbox
//! processor of one process. Hosts create it once at launch with
//! [`StorageEnvironment::setup`] and pass it (or parts of it) to whatever
//! needs storage.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::config::StorageConfig;
use crate::error::CoreResult;
use crate::identity::{IdentityManager, KeyVerification};
use crate::notifications::NotificationCenter;
use crate::outbox::OutboxProcessor;
use crate::storage::{
    self, OutboxStorage, SecureStorage, SessionStorage, Storage, StorageError, StorageKind,
    StoragePassword, StorageReadiness,
};

/// The storage stack of one process.
pub struct StorageEnvironment {
    config: StorageConfig,
    keychain: Arc<dyn SecureStorage>,
    notifications: NotificationCenter,
    readiness: Arc<StorageReadiness>,
    primary: Storage,
    session: SessionStorage,
    outbox: OutboxStorage,
    identity_manager: Arc<IdentityManager>,
    outbox_processor: OutboxProcessor,
}

impl StorageEnvironment {
    /// Sets up storage. Blocks the caller.
    ///
    /// Order: load (or create) the storage password, run
    /// `safe_blocking_migrations` before any database is opened, open every
    /// database, start extension registration, migrate legacy identity
    /// state. Fails with [`StorageError::PasswordInaccessible`] when the
    /// keychain cannot provide the password; the host must not continue.
    pub fn setup<M>(
        config: StorageConfig,
        keychain: Arc<dyn SecureStorage>,
        verifier: Arc<dyn KeyVerification>,
        safe_blocking_migrations: M,
    ) -> CoreResult<Self>
    where
        M: FnOnce(&StorageConfig) -> Result<(), StorageError>,
    {
        let password = StoragePassword::load_or_create(keychain.as_ref(), &config)?;

        safe_blocking_migrations(&config).map_err(|e| {
            error!(error = %e, "blocking storage migrations failed");
            e
        })?;

        let notifications = NotificationCenter::new();
        let readiness = StorageReadiness::new(notifications.clone());

        let primary = Storage::open(&config, StorageKind::Primary, &password, &readiness)?;
        let session = SessionStorage::new(&config, &password, &readiness)?;
        session.enter_foreground()?;
        let outbox = OutboxStorage::new(&config, &password, &readiness)?;
        outbox.enter_foreground()?;

        OutboxProcessor::async_register_primary_database_extensions(&primary);
        OutboxProcessor::async_register_outbox_database_extensions(&outbox);
        primary.finish_registrations();
        session.finish_registrations();
        outbox.finish_registrations();

        let identity_manager = Arc::new(IdentityManager::new(
            session.clone(),
            verifier,
            notifications.clone(),
        ));
        identity_manager.migrate_from_storage_if_necessary(&primary)?;

        let outbox_processor = OutboxProcessor::new(primary.clone(), outbox.clone());

        info!(data_dir = %config.data_dir.display(), "storage set up");
        Ok(StorageEnvironment {
            config,
            keychain,
            notifications,
            readiness,
            primary,
            session,
            outbox,
            identity_manager,
            outbox_processor,
        })
    }

    /// [`StorageEnvironment::setup`] with the OS keychain, under the
    /// service named in `config`.
    #[cfg(feature = "secure-storage")]
    pub fn setup_with_platform_keyring<M>(
        config: StorageConfig,
        verifier: Arc<dyn KeyVerification>,
        safe_blocking_migrations: M,
    ) -> CoreResult<Self>
    where
        M: FnOnce(&StorageConfig) -> Result<(), StorageError>,
    {
        let keychain = Arc::new(storage::secure::PlatformKeyring::for_config(&config));
        Self::setup(config, keychain, verifier, safe_blocking_migrations)
    }

    /// Whether the storage password can be read right now, without
    /// creating anything.
    pub fn is_database_password_accessible(keychain: &dyn SecureStorage) -> bool {
        StoragePassword::is_accessible(keychain)
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn notifications(&self) -> &NotificationCenter {
        &self.notifications
    }

    /// True once every storage finished registering its extensions.
    pub fn is_storage_ready(&self) -> bool {
        self.readiness.is_ready()
    }

    pub fn wait_until_ready(&self, timeout: Duration) -> bool {
        self.readiness.wait_until_ready(timeout)
    }

    pub fn primary(&self) -> &Storage {
        &self.primary
    }

    pub fn session(&self) -> &SessionStorage {
        &self.session
    }

    pub fn outbox(&self) -> &OutboxStorage {
        &self.outbox
    }

    pub fn identity_manager(&self) -> &Arc<IdentityManager> {
        &self.identity_manager
    }

    pub fn outbox_processor(&self) -> &OutboxProcessor {
        &self.outbox_processor
    }

    /// Lets the shared databases close while the app is suspended.
    pub fn application_did_enter_background(&self) {
        self.session.enter_background();
        self.outbox.enter_background();
    }

    pub fn application_will_enter_foreground(&self) -> Result<(), StorageError> {
        self.session.enter_foreground()?;
        self.outbox.enter_foreground()
    }

    /// Replaces the primary copy used by the extension process with a
    /// snapshot of the primary database.
    pub fn refresh_primary_copy(&self) -> Result<(), StorageError> {
        self.primary
            .export_snapshot(&self.config.database_paths(StorageKind::PrimaryCopy))
    }

    /// Closes every database and deletes all storage files and the storage
    /// password.
    pub fn reset_all_storage(self) -> Result<(), StorageError> {
        info!("resetting all storage");
        self.primary.shutdown();
        self.session.shutdown();
        self.outbox.shutdown();
        storage::reset_all_storage(&self.config, self.keychain.as_ref())
    }
}
