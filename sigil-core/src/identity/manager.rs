// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Identity Manager
//!
//! Every operation runs in a single session-database transaction, so a
//! rejected change never leaves partial state behind. Notifications are
//! posted only after the transaction committed.

use std::sync::Arc;

use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use crate::notifications::{Notification, NotificationCenter};
use crate::storage::{unix_millis, SessionStorage, Storage, Txn};

use super::keys::StoredKeyPair;
use super::{
    Direction, IdentityError, IdentityKey, IdentityKeyPair, IdentityKeyStore, KeyVerification,
    RecipientIdentity, VerificationState, VerificationSyncMessage, VerifiedSyncMessage,
    LOCAL_IDENTITY, PENDING_VERIFICATION_SYNCS, RECIPIENT_IDENTITIES,
};

const KEY_PAIR: &str = "key_pair";
const REGISTRATION_ID: &str = "registration_id";

const IDENTITY_MIGRATIONS: &str = "identity_migrations";
const LEGACY_MIGRATION: &str = "legacy_storage";

/// Registration ids are 14-bit, never 0.
const MAX_REGISTRATION_ID: u32 = 16380;

/// Who asked for a verification change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeOrigin {
    User,
    Automatic,
    LinkedDevice,
}

/// Owns identity state in the session database. Safe to share between
/// threads.
pub struct IdentityManager {
    session: SessionStorage,
    verifier: Arc<dyn KeyVerification>,
    notifications: NotificationCenter,
}

impl IdentityManager {
    pub fn new(
        session: SessionStorage,
        verifier: Arc<dyn KeyVerification>,
        notifications: NotificationCenter,
    ) -> Self {
        IdentityManager {
            session,
            verifier,
            notifications,
        }
    }

    fn read<T, F>(&self, f: F) -> Result<T, IdentityError>
    where
        F: FnOnce(&Txn<'_>) -> Result<T, IdentityError>,
    {
        let client = self.session.add_client()?;
        client.connection().read(f)
    }

    fn write<T, F>(&self, f: F) -> Result<T, IdentityError>
    where
        F: FnOnce(&Txn<'_>) -> Result<T, IdentityError>,
    {
        let client = self.session.add_client()?;
        client.connection().write(f)
    }

    fn notify(&self, recipient_id: Option<&str>) {
        self.notifications.post(Notification::IdentityStateChanged {
            recipient_id: recipient_id.map(str::to_string),
        });
    }

    // === Local identity ===

    /// Creates a new local identity key pair, replacing any existing one.
    pub fn generate_new_identity_key(&self) -> Result<IdentityKey, IdentityError> {
        let pair = IdentityKeyPair::generate();
        self.write(|txn| {
            txn.set(LOCAL_IDENTITY, KEY_PAIR, &pair.to_stored())?;
            Ok(())
        })?;
        info!(fingerprint = %pair.public_key().fingerprint(), "generated new identity key");
        self.notify(None);
        Ok(pair.public_key())
    }

    /// The local public identity key.
    pub fn local_identity_key(&self) -> Result<IdentityKey, IdentityError> {
        self.identity_key_pair()?
            .map(|pair| pair.public_key())
            .ok_or(IdentityError::MissingLocalIdentity)
    }

    // === Remote identities ===

    pub fn identity_key_for_recipient_id(
        &self,
        recipient_id: &str,
    ) -> Result<Option<IdentityKey>, IdentityError> {
        Ok(self
            .recipient_identity_for_recipient_id(recipient_id)?
            .map(|record| record.identity_key))
    }

    pub fn recipient_identity_for_recipient_id(
        &self,
        recipient_id: &str,
    ) -> Result<Option<RecipientIdentity>, IdentityError> {
        self.read(|txn| Ok(txn.get(RECIPIENT_IDENTITIES, recipient_id)?))
    }

    /// `Default` when no identity is known.
    pub fn verification_state_for_recipient_id(
        &self,
        recipient_id: &str,
    ) -> Result<VerificationState, IdentityError> {
        Ok(self
            .recipient_identity_for_recipient_id(recipient_id)?
            .map(|record| record.verification_state)
            .unwrap_or_default())
    }

    /// Changes the verification state of `recipient_id`'s current key.
    ///
    /// Rejected without any change when the recipient is unknown, when
    /// `identity_key` is not the key on record, when an automatic change
    /// would override a state the user set, or when `Verified` is requested
    /// for a key that was not confirmed out of band. A user-initiated change
    /// is queued for linked devices.
    pub fn set_verification_state(
        &self,
        state: VerificationState,
        identity_key: &IdentityKey,
        recipient_id: &str,
        is_user_initiated: bool,
    ) -> Result<(), IdentityError> {
        let origin = if is_user_initiated {
            ChangeOrigin::User
        } else {
            ChangeOrigin::Automatic
        };
        self.apply_verification_state(state, identity_key, recipient_id, origin)
    }

    fn apply_verification_state(
        &self,
        state: VerificationState,
        identity_key: &IdentityKey,
        recipient_id: &str,
        origin: ChangeOrigin,
    ) -> Result<(), IdentityError> {
        let changed = self.write(|txn| {
            let mut record: RecipientIdentity = txn
                .get(RECIPIENT_IDENTITIES, recipient_id)?
                .ok_or(IdentityError::UnknownRecipient)?;

            if record.identity_key != *identity_key {
                return Err(IdentityError::KeyMismatch);
            }
            match origin {
                ChangeOrigin::Automatic => {
                    if record.verification_state == state {
                        return Ok(false);
                    }
                    if record.user_confirmed {
                        return Err(IdentityError::UserDecisionLocked);
                    }
                }
                ChangeOrigin::LinkedDevice => {
                    if record.verification_state == state && record.user_confirmed {
                        return Ok(false);
                    }
                }
                ChangeOrigin::User => {}
            }
            // A linked device confirmed the key out of band itself.
            if state == VerificationState::Verified
                && origin != ChangeOrigin::LinkedDevice
                && !self
                    .verifier
                    .is_confirmed_out_of_band(recipient_id, identity_key)
            {
                return Err(IdentityError::NotConfirmedOutOfBand);
            }

            record.verification_state = state;
            record.user_confirmed = origin != ChangeOrigin::Automatic;
            txn.set(RECIPIENT_IDENTITIES, recipient_id, &record)?;

            if origin == ChangeOrigin::User {
                let message = VerificationSyncMessage {
                    recipient_id: recipient_id.to_string(),
                    identity_key: *identity_key,
                    state,
                    created_at: unix_millis(),
                };
                txn.set(
                    PENDING_VERIFICATION_SYNCS,
                    &Uuid::new_v4().to_string(),
                    &message,
                )?;
            }
            Ok(true)
        });

        match changed {
            Ok(true) => {
                info!(?state, ?origin, "verification state changed");
                self.notify(Some(recipient_id));
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => {
                warn!(?state, ?origin, error = %e, "verification change rejected");
                Err(e)
            }
        }
    }

    /// The recipient's identity if sending to them must wait for the user
    /// to accept a changed key; `None` when sending is fine.
    pub fn untrusted_identity_for_sending_to_recipient_id(
        &self,
        recipient_id: &str,
    ) -> Result<Option<RecipientIdentity>, IdentityError> {
        Ok(self
            .recipient_identity_for_recipient_id(recipient_id)?
            .filter(|record| record.verification_state == VerificationState::NoLongerVerified))
    }

    /// Applies a verification decision the user made on a linked device.
    ///
    /// Fails closed like a local change when the recipient is unknown or
    /// the key is not the one on record. Otherwise it is applied as a user
    /// decision, `Verified` included, and is not queued back to linked
    /// devices.
    pub fn process_incoming_sync_message(
        &self,
        message: &VerifiedSyncMessage,
    ) -> Result<(), IdentityError> {
        let identity_key = IdentityKey::from_slice(&message.identity_key)?;
        self.apply_verification_state(
            message.state,
            &identity_key,
            &message.destination,
            ChangeOrigin::LinkedDevice,
        )
    }

    /// Removes and returns queued outgoing verification sync messages,
    /// oldest first.
    pub fn take_pending_verification_syncs(
        &self,
    ) -> Result<Vec<VerificationSyncMessage>, IdentityError> {
        let mut messages: Vec<VerificationSyncMessage> = self.write(|txn| {
            let pending = txn.all::<VerificationSyncMessage>(PENDING_VERIFICATION_SYNCS)?;
            txn.remove_all(PENDING_VERIFICATION_SYNCS)?;
            Ok(pending.into_iter().map(|(_, message)| message).collect())
        })?;
        messages.sort_by_key(|message| message.created_at);
        Ok(messages)
    }

    /// Copies identity state written by an older version into the session
    /// database. Runs once; returns false if it had already run.
    pub fn migrate_from_storage_if_necessary(
        &self,
        legacy: &Storage,
    ) -> Result<bool, IdentityError> {
        let done: Option<bool> =
            self.read(|txn| Ok(txn.get(IDENTITY_MIGRATIONS, LEGACY_MIGRATION)?))?;
        if done == Some(true) {
            return Ok(false);
        }

        let identities = self
            .session
            .copy_collection::<RecipientIdentity>(RECIPIENT_IDENTITIES, legacy)?;
        let local = self
            .session
            .copy_collection::<serde_json::Value>(LOCAL_IDENTITY, legacy)?;

        self.write(|txn| {
            txn.set(IDENTITY_MIGRATIONS, LEGACY_MIGRATION, &true)?;
            Ok(())
        })?;
        info!(
            identities_copied = identities.copied,
            identities_skipped = identities.skipped,
            local_copied = local.copied,
            "migrated identity state from legacy storage"
        );
        Ok(true)
    }
}

impl IdentityKeyStore for IdentityManager {
    fn identity_key_pair(&self) -> Result<Option<IdentityKeyPair>, IdentityError> {
        let stored: Option<StoredKeyPair> =
            self.read(|txn| Ok(txn.get(LOCAL_IDENTITY, KEY_PAIR)?))?;
        stored.map(StoredKeyPair::into_key_pair).transpose()
    }

    fn local_registration_id(&self) -> Result<u32, IdentityError> {
        self.write(|txn| {
            if let Some(id) = txn.get::<u32>(LOCAL_IDENTITY, REGISTRATION_ID)? {
                return Ok(id);
            }
            let id = rand::thread_rng().gen_range(1..=MAX_REGISTRATION_ID);
            txn.set(LOCAL_IDENTITY, REGISTRATION_ID, &id)?;
            Ok(id)
        })
    }

    fn save_remote_identity(
        &self,
        identity_key: &IdentityKey,
        recipient_id: &str,
    ) -> Result<bool, IdentityError> {
        let now = unix_millis();
        let outcome = self.write(|txn| {
            let existing: Option<RecipientIdentity> = txn.get(RECIPIENT_IDENTITIES, recipient_id)?;
            let record = match existing {
                None => RecipientIdentity::first_seen(recipient_id, *identity_key, now),
                Some(existing) if existing.identity_key == *identity_key => return Ok(None),
                Some(existing) => existing.rotated(*identity_key, now),
            };
            txn.set(RECIPIENT_IDENTITIES, recipient_id, &record)?;
            Ok(Some(!record.is_first_known_key))
        })?;

        match outcome {
            None => Ok(false),
            Some(replaced) => {
                if replaced {
                    warn!(
                        fingerprint = %identity_key.fingerprint(),
                        "recipient identity key changed"
                    );
                } else {
                    info!(
                        fingerprint = %identity_key.fingerprint(),
                        "saved first identity key for recipient"
                    );
                }
                self.notify(Some(recipient_id));
                Ok(replaced)
            }
        }
    }

    fn is_trusted_identity_key(
        &self,
        identity_key: &IdentityKey,
        recipient_id: &str,
        direction: Direction,
    ) -> Result<bool, IdentityError> {
        if direction == Direction::Receiving {
            return Ok(true);
        }
        match self.recipient_identity_for_recipient_id(recipient_id)? {
            // Trusted on first use.
            None => Ok(true),
            Some(record) if record.identity_key != *identity_key => {
                warn!("identity key for sending differs from the key on record");
                Ok(false)
            }
            Some(record) => Ok(record.verification_state != VerificationState::NoLongerVerified),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::crypto::SymmetricKey;
    use crate::identity::MockKeyVerification;
    use crate::storage::{StoragePassword, StorageReadiness};
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> IdentityManager {
        let config = StorageConfig::in_dir(dir.path());
        let password = StoragePassword::from_key(SymmetricKey::generate());
        let notifications = NotificationCenter::new();
        let readiness = StorageReadiness::new(notifications.clone());
        let session = SessionStorage::new(&config, &password, &readiness).unwrap();
        IdentityManager::new(
            session,
            Arc::new(MockKeyVerification::confirming_all()),
            notifications,
        )
    }

    #[test]
    fn test_local_identity_round_trip() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        assert!(matches!(
            manager.local_identity_key(),
            Err(IdentityError::MissingLocalIdentity)
        ));

        let public = manager.generate_new_identity_key().unwrap();
        assert_eq!(manager.local_identity_key().unwrap(), public);

        let replaced = manager.generate_new_identity_key().unwrap();
        assert_ne!(replaced, public);
    }

    #[test]
    fn test_registration_id_is_stable() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let id = manager.local_registration_id().unwrap();
        assert!((1..=MAX_REGISTRATION_ID).contains(&id));
        assert_eq!(manager.local_registration_id().unwrap(), id);
    }

    #[test]
    fn test_automatic_change_cannot_override_user() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let key = IdentityKey::from_bytes([3; 32]);
        manager.save_remote_identity(&key, "+1555").unwrap();

        manager
            .set_verification_state(VerificationState::Verified, &key, "+1555", true)
            .unwrap();
        let result =
            manager.set_verification_state(VerificationState::Default, &key, "+1555", false);

        assert!(matches!(result, Err(IdentityError::UserDecisionLocked)));
        assert_eq!(
            manager.verification_state_for_recipient_id("+1555").unwrap(),
            VerificationState::Verified
        );
    }

    #[test]
    fn test_user_change_queues_sync_message() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let key = IdentityKey::from_bytes([4; 32]);
        manager.save_remote_identity(&key, "+1555").unwrap();

        manager
            .set_verification_state(VerificationState::Verified, &key, "+1555", true)
            .unwrap();

        let pending = manager.take_pending_verification_syncs().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].state, VerificationState::Verified);
        assert!(manager.take_pending_verification_syncs().unwrap().is_empty());
    }
}
