// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Identity Manager Integration Tests
//!
//! Verification state changes, trust decisions, linked-device sync and
//! legacy migration, exercised through a complete storage environment.

mod common;

use std::sync::mpsc;
use std::time::Duration;

use common::fixtures::{remote_key, TestEnv};
use common::strategies::{key_bytes_strategy, recipient_id_strategy, verification_state_strategy};
use proptest::prelude::*;

use sigil_core::identity::{KEY_TYPE_PREFIX, LOCAL_IDENTITY, RECIPIENT_IDENTITIES};
use sigil_core::{
    Direction, IdentityError, IdentityKey, IdentityKeyStore, Notification, RecipientIdentity,
    StorageConfig, StorageKind, VerificationState, VerifiedSyncMessage,
};

// ============================================================
// Trust On First Use
// ============================================================

/// Scenario: an unknown recipient is fine to send to; after the user marks
/// the learned key as no longer verified, sending must wait.
#[test]
fn test_untrusted_identity_for_unknown_then_flagged_recipient() {
    let t = TestEnv::new();
    let manager = t.env.identity_manager();
    let recipient = "+15551234567";

    assert!(manager
        .untrusted_identity_for_sending_to_recipient_id(recipient)
        .unwrap()
        .is_none());

    let key = remote_key();
    assert!(!manager.save_remote_identity(&key, recipient).unwrap());
    manager
        .set_verification_state(VerificationState::NoLongerVerified, &key, recipient, true)
        .unwrap();

    let untrusted = manager
        .untrusted_identity_for_sending_to_recipient_id(recipient)
        .unwrap()
        .expect("flagged identity must block sending");
    assert_eq!(untrusted.recipient_id, recipient);
    assert_eq!(untrusted.identity_key, key);
    assert_eq!(untrusted.verification_state, VerificationState::NoLongerVerified);
}

#[test]
fn test_key_change_demotes_verified_identity() {
    let t = TestEnv::new();
    let manager = t.env.identity_manager();
    let recipient = "+15550000001";

    let first = remote_key();
    manager.save_remote_identity(&first, recipient).unwrap();
    t.verifier.confirm(recipient, &first);
    manager
        .set_verification_state(VerificationState::Verified, &first, recipient, true)
        .unwrap();

    let second = remote_key();
    assert!(manager.save_remote_identity(&second, recipient).unwrap());

    let record = manager
        .recipient_identity_for_recipient_id(recipient)
        .unwrap()
        .unwrap();
    assert_eq!(record.identity_key, second);
    assert!(!record.is_first_known_key);
    assert_eq!(record.verification_state, VerificationState::NoLongerVerified);

    assert!(!manager
        .is_trusted_identity_key(&second, recipient, Direction::Sending)
        .unwrap());
    assert!(manager
        .is_trusted_identity_key(&second, recipient, Direction::Receiving)
        .unwrap());

    // The user accepts the new key.
    manager
        .set_verification_state(VerificationState::Default, &second, recipient, true)
        .unwrap();
    assert!(manager
        .is_trusted_identity_key(&second, recipient, Direction::Sending)
        .unwrap());
}

#[test]
fn test_sending_with_unrecorded_key_is_untrusted() {
    let t = TestEnv::new();
    let manager = t.env.identity_manager();
    let recipient = "+15550000002";

    manager.save_remote_identity(&remote_key(), recipient).unwrap();
    assert!(!manager
        .is_trusted_identity_key(&remote_key(), recipient, Direction::Sending)
        .unwrap());
    assert!(manager
        .is_trusted_identity_key(&remote_key(), "+15550009999", Direction::Sending)
        .unwrap());
}

// ============================================================
// Verification State Rules
// ============================================================

#[test]
fn test_verified_requires_out_of_band_confirmation() {
    let t = TestEnv::new();
    let manager = t.env.identity_manager();
    let recipient = "+15550000003";
    let key = remote_key();
    manager.save_remote_identity(&key, recipient).unwrap();

    let result =
        manager.set_verification_state(VerificationState::Verified, &key, recipient, true);
    assert!(matches!(result, Err(IdentityError::NotConfirmedOutOfBand)));
    assert_eq!(
        manager.verification_state_for_recipient_id(recipient).unwrap(),
        VerificationState::Default
    );

    t.verifier.confirm(recipient, &key);
    manager
        .set_verification_state(VerificationState::Verified, &key, recipient, true)
        .unwrap();
    assert_eq!(
        manager.verification_state_for_recipient_id(recipient).unwrap(),
        VerificationState::Verified
    );
}

#[test]
fn test_automatic_change_cannot_override_user_decision() {
    let t = TestEnv::new();
    let manager = t.env.identity_manager();
    let recipient = "+15550000004";
    let key = remote_key();
    manager.save_remote_identity(&key, recipient).unwrap();

    manager
        .set_verification_state(VerificationState::NoLongerVerified, &key, recipient, true)
        .unwrap();
    let result =
        manager.set_verification_state(VerificationState::Default, &key, recipient, false);
    assert!(matches!(result, Err(IdentityError::UserDecisionLocked)));
    assert_eq!(
        manager.verification_state_for_recipient_id(recipient).unwrap(),
        VerificationState::NoLongerVerified
    );
}

#[test]
fn test_unknown_recipient_is_rejected() {
    let t = TestEnv::new();
    let result = t.env.identity_manager().set_verification_state(
        VerificationState::Default,
        &remote_key(),
        "+15550000005",
        true,
    );
    assert!(matches!(result, Err(IdentityError::UnknownRecipient)));
}

// ============================================================
// Linked Device Sync
// ============================================================

#[test]
fn test_user_changes_are_queued_for_linked_devices() {
    let t = TestEnv::new();
    let manager = t.env.identity_manager();
    let recipient = "+15550000006";
    let key = remote_key();
    manager.save_remote_identity(&key, recipient).unwrap();

    manager
        .set_verification_state(VerificationState::NoLongerVerified, &key, recipient, true)
        .unwrap();
    manager
        .set_verification_state(VerificationState::Default, &key, recipient, true)
        .unwrap();

    let pending = manager.take_pending_verification_syncs().unwrap();
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|m| m.recipient_id == recipient && m.identity_key == key));
    assert!(manager.take_pending_verification_syncs().unwrap().is_empty());
}

#[test]
fn test_incoming_sync_message_applies_state() {
    let t = TestEnv::new();
    let manager = t.env.identity_manager();
    let recipient = "+15550000007";
    let key = remote_key();
    manager.save_remote_identity(&key, recipient).unwrap();

    let mut prefixed = vec![KEY_TYPE_PREFIX];
    prefixed.extend_from_slice(key.as_bytes());
    manager
        .process_incoming_sync_message(&VerifiedSyncMessage {
            destination: recipient.to_string(),
            identity_key: prefixed,
            state: VerificationState::NoLongerVerified,
        })
        .unwrap();

    assert_eq!(
        manager.verification_state_for_recipient_id(recipient).unwrap(),
        VerificationState::NoLongerVerified
    );
    // Changes received from another device are not echoed back.
    assert!(manager.take_pending_verification_syncs().unwrap().is_empty());
}

#[test]
fn test_incoming_sync_message_with_wrong_key_fails_closed() {
    let t = TestEnv::new();
    let manager = t.env.identity_manager();
    let recipient = "+15550000008";
    let key = remote_key();
    manager.save_remote_identity(&key, recipient).unwrap();

    let result = manager.process_incoming_sync_message(&VerifiedSyncMessage {
        destination: recipient.to_string(),
        identity_key: remote_key().as_bytes().to_vec(),
        state: VerificationState::NoLongerVerified,
    });
    assert!(matches!(result, Err(IdentityError::KeyMismatch)));

    let result = manager.process_incoming_sync_message(&VerifiedSyncMessage {
        destination: recipient.to_string(),
        identity_key: vec![1, 2, 3],
        state: VerificationState::NoLongerVerified,
    });
    assert!(matches!(result, Err(IdentityError::InvalidKeyLength(_))));

    assert_eq!(
        manager.verification_state_for_recipient_id(recipient).unwrap(),
        VerificationState::Default
    );
}

/// Scenario: the user verified a key on a linked device; this device has no
/// out-of-band confirmation of its own but still takes the decision.
#[test]
fn test_incoming_sync_message_applies_verified_for_matching_key() {
    let t = TestEnv::new();
    let manager = t.env.identity_manager();
    let recipient = "+15550000010";
    let key = remote_key();
    manager.save_remote_identity(&key, recipient).unwrap();

    manager
        .process_incoming_sync_message(&VerifiedSyncMessage {
            destination: recipient.to_string(),
            identity_key: key.as_bytes().to_vec(),
            state: VerificationState::Verified,
        })
        .unwrap();

    let record = manager
        .recipient_identity_for_recipient_id(recipient)
        .unwrap()
        .unwrap();
    assert_eq!(record.verification_state, VerificationState::Verified);
    assert!(record.user_confirmed);
    assert!(manager.take_pending_verification_syncs().unwrap().is_empty());

    // An automatic change cannot undo the synced decision.
    let result =
        manager.set_verification_state(VerificationState::Default, &key, recipient, false);
    assert!(matches!(result, Err(IdentityError::UserDecisionLocked)));
}

#[test]
fn test_incoming_verified_for_other_key_fails_closed() {
    let t = TestEnv::new();
    let manager = t.env.identity_manager();
    let recipient = "+15550000011";
    manager.save_remote_identity(&remote_key(), recipient).unwrap();

    let result = manager.process_incoming_sync_message(&VerifiedSyncMessage {
        destination: recipient.to_string(),
        identity_key: remote_key().as_bytes().to_vec(),
        state: VerificationState::Verified,
    });
    assert!(matches!(result, Err(IdentityError::KeyMismatch)));

    let result = manager.process_incoming_sync_message(&VerifiedSyncMessage {
        destination: "+15550000012".to_string(),
        identity_key: remote_key().as_bytes().to_vec(),
        state: VerificationState::Verified,
    });
    assert!(matches!(result, Err(IdentityError::UnknownRecipient)));

    assert_eq!(
        manager.verification_state_for_recipient_id(recipient).unwrap(),
        VerificationState::Default
    );
}

/// Scenario: a decision made on a linked device replaces one made locally.
#[test]
fn test_incoming_sync_message_overrides_local_user_decision() {
    let t = TestEnv::new();
    let manager = t.env.identity_manager();
    let recipient = "+15550000013";
    let key = remote_key();
    manager.save_remote_identity(&key, recipient).unwrap();
    manager
        .set_verification_state(VerificationState::NoLongerVerified, &key, recipient, true)
        .unwrap();
    manager.take_pending_verification_syncs().unwrap();

    manager
        .process_incoming_sync_message(&VerifiedSyncMessage {
            destination: recipient.to_string(),
            identity_key: key.as_bytes().to_vec(),
            state: VerificationState::Default,
        })
        .unwrap();

    assert_eq!(
        manager.verification_state_for_recipient_id(recipient).unwrap(),
        VerificationState::Default
    );
    assert!(manager.take_pending_verification_syncs().unwrap().is_empty());
}

// ============================================================
// Local Identity
// ============================================================

#[test]
fn test_local_identity_and_registration_id_persist() {
    let t = TestEnv::new();
    let key = t.env.identity_manager().generate_new_identity_key().unwrap();
    let registration_id = t.env.identity_manager().local_registration_id().unwrap();
    assert!((1..=16380).contains(&registration_id));

    let (dir, keychain) = t.close();
    let t = TestEnv::in_dir(dir, keychain);
    let manager = t.env.identity_manager();

    assert_eq!(manager.local_identity_key().unwrap(), key);
    assert_eq!(manager.local_registration_id().unwrap(), registration_id);
    let pair = manager.identity_key_pair().unwrap().unwrap();
    assert_eq!(pair.public_key(), key);
}

#[test]
fn test_identity_changes_are_notified() {
    let t = TestEnv::new();
    let manager = t.env.identity_manager();
    let (tx, rx) = mpsc::channel();
    t.env.notifications().subscribe_fn(move |n| {
        if let Notification::IdentityStateChanged { .. } = n {
            let _ = tx.send(n.clone());
        }
    });

    manager.save_remote_identity(&remote_key(), "+15550000009").unwrap();

    let received = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(
        received,
        Notification::IdentityStateChanged {
            recipient_id: Some("+15550000009".to_string())
        }
    );
}

// ============================================================
// Legacy Migration
// ============================================================

/// Scenario: identity state left in the primary database by an older
/// version moves into the session database exactly once.
#[test]
fn test_migration_from_primary_runs_once() {
    let t = TestEnv::new();
    let manager = t.env.identity_manager();

    // The environment already ran the migration at setup.
    assert!(!manager
        .migrate_from_storage_if_necessary(t.env.primary())
        .unwrap());

    let legacy_key = remote_key();
    let legacy: RecipientIdentity = {
        manager.save_remote_identity(&legacy_key, "+15550000010").unwrap();
        manager
            .recipient_identity_for_recipient_id("+15550000010")
            .unwrap()
            .unwrap()
    };
    t.env
        .primary()
        .write(|txn| txn.set(RECIPIENT_IDENTITIES, "+15550000011", &legacy))
        .unwrap();

    // Still marked done; the record stays behind.
    assert!(!manager
        .migrate_from_storage_if_necessary(t.env.primary())
        .unwrap());
    assert!(manager
        .recipient_identity_for_recipient_id("+15550000011")
        .unwrap()
        .is_none());
}

#[test]
fn test_migration_copies_legacy_records_on_first_launch() {
    let t = TestEnv::new();
    let legacy_key = remote_key();
    let legacy = {
        t.env
            .identity_manager()
            .save_remote_identity(&legacy_key, "+15550000012")
            .unwrap();
        t.env
            .identity_manager()
            .recipient_identity_for_recipient_id("+15550000012")
            .unwrap()
            .unwrap()
    };
    t.env
        .primary()
        .write(|txn| {
            txn.set(RECIPIENT_IDENTITIES, "+15550000013", &legacy)?;
            txn.set(LOCAL_IDENTITY, "unrelated", &1u32)
        })
        .unwrap();

    // Simulate a first launch of the new version: session state gone.
    let (dir, keychain) = t.close();
    let config = StorageConfig::in_dir(dir.path());
    config
        .database_paths(StorageKind::Session)
        .delete_all()
        .unwrap();

    let t = TestEnv::in_dir(dir, keychain);
    let migrated = t
        .env
        .identity_manager()
        .recipient_identity_for_recipient_id("+15550000013")
        .unwrap()
        .unwrap();
    assert_eq!(migrated.identity_key, legacy_key);
}

/// Scenario: the manager opens the session database per call, so it
/// keeps working while the app is in the background.
#[test]
fn test_manager_works_in_background() {
    let t = TestEnv::new();
    t.env.application_did_enter_background();

    let manager = t.env.identity_manager();
    let key = remote_key();
    manager.save_remote_identity(&key, "+15550000014").unwrap();
    assert_eq!(
        manager.identity_key_for_recipient_id("+15550000014").unwrap(),
        Some(key)
    );
    assert_eq!(t.env.session().client_count(), 0);
}

// ============================================================
// Property: mismatched keys never change state
// ============================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: a state change with a key other than the stored one fails
    /// and leaves the record untouched.
    #[test]
    fn prop_mismatched_key_leaves_state_unchanged(
        recipient in recipient_id_strategy(),
        stored in key_bytes_strategy(),
        offered in key_bytes_strategy(),
        state in verification_state_strategy(),
        user_initiated in any::<bool>(),
    ) {
        prop_assume!(stored != offered);
        let t = TestEnv::new();
        let manager = t.env.identity_manager();
        let stored = IdentityKey::from_bytes(stored);
        let offered = IdentityKey::from_bytes(offered);

        manager.save_remote_identity(&stored, &recipient).unwrap();
        let before = manager.recipient_identity_for_recipient_id(&recipient).unwrap();

        let result = manager.set_verification_state(state, &offered, &recipient, user_initiated);
        prop_assert!(matches!(result, Err(IdentityError::KeyMismatch)));

        let after = manager.recipient_identity_for_recipient_id(&recipient).unwrap();
        prop_assert_eq!(before, after);
        prop_assert!(manager.take_pending_verification_syncs().unwrap().is_empty());
    }
}
