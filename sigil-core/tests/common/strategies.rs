// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Proptest Strategies
//!
//! Reusable proptest strategies for property-based testing.

use proptest::prelude::*;

use sigil_core::VerificationState;

/// Strategy for generating E.164 recipient ids.
pub fn recipient_id_strategy() -> impl Strategy<Value = String> {
    "[1-9][0-9]{9,13}".prop_map(|n| format!("+{}", n))
}

/// Strategy for generating raw 32-byte identity keys.
pub fn key_bytes_strategy() -> impl Strategy<Value = [u8; 32]> {
    any::<[u8; 32]>()
}

/// Strategy for generating group ids.
pub fn group_id_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..32)
}

/// Strategy for generating verification states.
pub fn verification_state_strategy() -> impl Strategy<Value = VerificationState> {
    prop_oneof![
        Just(VerificationState::Default),
        Just(VerificationState::Verified),
        Just(VerificationState::NoLongerVerified),
    ]
}

/// Strategy for generating message bodies.
pub fn body_strategy() -> impl Strategy<Value = String> {
    ".{0,200}"
}
