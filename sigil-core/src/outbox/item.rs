// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Outbox items and their lifecycle.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::unix_millis;

use super::OutboxError;

/// Where an outbox message goes.
///
/// A 1:1 thread is created on demand; a group thread must already exist in
/// the primary database, otherwise the item is discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboxTarget {
    Recipient(String),
    Group(Vec<u8>),
}

/// One hand-off of a sent message from the extension to the main app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxItem {
    id: String,
    sync_id: Uuid,
    outbox_message_id: String,
    timestamp: u64,
    target: OutboxTarget,
}

impl OutboxItem {
    /// Creates an item. Exactly one of `recipient_id` and `group_id` must be
    /// given, and it must not be empty.
    pub fn new(
        sync_id: Uuid,
        outbox_message_id: impl Into<String>,
        recipient_id: Option<String>,
        group_id: Option<Vec<u8>>,
    ) -> Result<Self, OutboxError> {
        let target = match (recipient_id, group_id) {
            (Some(_), Some(_)) => {
                return Err(OutboxError::InvalidTarget(
                    "both recipient and group given".into(),
                ))
            }
            (None, None) => {
                return Err(OutboxError::InvalidTarget(
                    "neither recipient nor group given".into(),
                ))
            }
            (Some(recipient), None) if recipient.is_empty() => {
                return Err(OutboxError::InvalidTarget("empty recipient id".into()))
            }
            (None, Some(group)) if group.is_empty() => {
                return Err(OutboxError::InvalidTarget("empty group id".into()))
            }
            (Some(recipient), None) => OutboxTarget::Recipient(recipient),
            (None, Some(group)) => OutboxTarget::Group(group),
        };

        let outbox_message_id = outbox_message_id.into();
        if outbox_message_id.is_empty() {
            return Err(OutboxError::InvalidItem("empty outbox message id".into()));
        }

        Ok(OutboxItem {
            id: Uuid::new_v4().to_string(),
            sync_id,
            outbox_message_id,
            timestamp: unix_millis(),
            target,
        })
    }

    pub fn for_recipient(
        sync_id: Uuid,
        outbox_message_id: impl Into<String>,
        recipient_id: impl Into<String>,
    ) -> Result<Self, OutboxError> {
        Self::new(sync_id, outbox_message_id, Some(recipient_id.into()), None)
    }

    pub fn for_group(
        sync_id: Uuid,
        outbox_message_id: impl Into<String>,
        group_id: Vec<u8>,
    ) -> Result<Self, OutboxError> {
        Self::new(sync_id, outbox_message_id, None, Some(group_id))
    }

    /// Key of this item in the outbox database. Unique per write.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sync_id(&self) -> Uuid {
        self.sync_id
    }

    pub fn outbox_message_id(&self) -> &str {
        &self.outbox_message_id
    }

    /// Milliseconds since the Unix epoch when the item was created.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn target(&self) -> &OutboxTarget {
        &self.target
    }

    pub fn recipient_id(&self) -> Option<&str> {
        match &self.target {
            OutboxTarget::Recipient(id) => Some(id),
            OutboxTarget::Group(_) => None,
        }
    }

    pub fn group_id(&self) -> Option<&[u8]> {
        match &self.target {
            OutboxTarget::Group(id) => Some(id),
            OutboxTarget::Recipient(_) => None,
        }
    }
}

/// Lifecycle of an item during reconciliation.
///
/// `Created -> Reconciled -> Deleted` or `Created -> Discarded -> Deleted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboxItemState {
    Created,
    /// Merged into the primary database.
    Reconciled,
    /// Dropped without merging: duplicate sync id or missing target.
    Discarded,
    /// Removed from the outbox database.
    Deleted,
}

impl OutboxItemState {
    pub fn can_transition_to(self, next: OutboxItemState) -> bool {
        use OutboxItemState::*;
        matches!(
            (self, next),
            (Created, Reconciled)
                | (Created, Discarded)
                | (Reconciled, Deleted)
                | (Discarded, Deleted)
        )
    }

    pub fn transition(self, next: OutboxItemState) -> Result<OutboxItemState, OutboxError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(OutboxError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}
