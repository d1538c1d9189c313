// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Sigil Core Library
//!
//! Encrypted local storage, identity trust state and outbox hand-off for a
//! messaging client whose main app and extension share the device's
//! storage. All cryptographic primitives come from audited crates (`ring`,
//! `chacha20poly1305`, `x25519-dalek`).

pub mod config;
pub mod crypto;
pub mod environment;
pub mod error;
pub mod identity;
pub mod logging;
pub mod notifications;
pub mod outbox;
pub mod storage;

pub use config::StorageConfig;
pub use crypto::{decrypt, encrypt, SymmetricKey};
pub use environment::StorageEnvironment;
pub use error::{CoreError, CoreResult};
pub use identity::{
    Direction, IdentityError, IdentityKey, IdentityKeyPair, IdentityKeyStore, IdentityManager,
    KeyVerification, MockKeyVerification, RecipientIdentity, VerificationState,
    VerifiedSyncMessage, IDENTITY_KEY_LENGTH,
};
pub use notifications::{Notification, NotificationCenter, NotificationHandler, SubscriptionId};
pub use outbox::{
    OutboxError, OutboxItem, OutboxItemState, OutboxMessage, OutboxProcessor, ReconcileReport,
};
pub use storage::{
    reset_all_storage, CopyReport, OutboxStorage, SecureStorage, SessionStorage, SharedStorage,
    Storage, StorageClient, StorageError, StorageKind, StorageReadiness,
};
