// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Test Fixtures
//!
//! A complete storage environment in a temporary directory, backed by an
//! in-memory keychain and a mock key verifier.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use sigil_core::identity::IdentityKeyPair;
use sigil_core::outbox::{OutboxItem, OutboxMessage, ThreadRecord, THREADS};
use sigil_core::storage::MemoryKeyStorage;
use sigil_core::{
    IdentityKey, MockKeyVerification, StorageConfig, StorageEnvironment, StorageError,
};

/// How long tests wait for extension registration to finish.
pub const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// A storage environment that lives as long as its temp directory.
pub struct TestEnv {
    pub dir: TempDir,
    pub keychain: Arc<MemoryKeyStorage>,
    pub verifier: Arc<MockKeyVerification>,
    pub env: StorageEnvironment,
}

impl TestEnv {
    /// Sets up a fresh environment and waits until storage is ready.
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let keychain = Arc::new(MemoryKeyStorage::new());
        Self::in_dir(dir, keychain)
    }

    /// Sets up an environment over existing files and keychain contents.
    pub fn in_dir(dir: TempDir, keychain: Arc<MemoryKeyStorage>) -> Self {
        sigil_core::logging::init_for_tests();
        let verifier = Arc::new(MockKeyVerification::new());
        let env = StorageEnvironment::setup(
            StorageConfig::in_dir(dir.path()),
            keychain.clone(),
            verifier.clone(),
            |_| Ok::<_, StorageError>(()),
        )
        .unwrap();
        assert!(env.wait_until_ready(READY_TIMEOUT), "storage never became ready");
        TestEnv {
            dir,
            keychain,
            verifier,
            env,
        }
    }

    /// Closes the environment and returns what is needed to reopen it.
    pub fn close(self) -> (TempDir, Arc<MemoryKeyStorage>) {
        let TestEnv { dir, keychain, .. } = self;
        (dir, keychain)
    }

    /// Creates a group thread in the primary database.
    pub fn create_group_thread(&self, group_id: &[u8]) {
        let thread = ThreadRecord::group(group_id, 0);
        self.env
            .primary()
            .write(|txn| txn.set(THREADS, &thread.id, &thread))
            .unwrap();
    }

    /// Enqueues a message for a 1:1 recipient and returns the item.
    pub fn enqueue_for_recipient(
        &self,
        sync_id: uuid::Uuid,
        recipient_id: &str,
        body: &str,
    ) -> OutboxItem {
        let message = OutboxMessage::new(body, 1_000);
        let item = OutboxItem::for_recipient(sync_id, message.id.clone(), recipient_id).unwrap();
        self.env.outbox().enqueue(&item, &message).unwrap();
        item
    }

    /// Enqueues a message for a group and returns the item.
    pub fn enqueue_for_group(
        &self,
        sync_id: uuid::Uuid,
        group_id: &[u8],
        body: &str,
    ) -> OutboxItem {
        let message = OutboxMessage::new(body, 1_000);
        let item = OutboxItem::for_group(sync_id, message.id.clone(), group_id.to_vec()).unwrap();
        self.env.outbox().enqueue(&item, &message).unwrap();
        item
    }
}

/// A random remote identity key.
pub fn remote_key() -> IdentityKey {
    IdentityKeyPair::generate().public_key()
}
