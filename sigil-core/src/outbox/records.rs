// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Records the outbox reads from and writes into.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::OutboxItem;

/// A sent message as saved by the extension in the outbox database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: String,
    pub body: String,
    /// Milliseconds since the Unix epoch when the message was sent.
    pub sent_at: u64,
}

impl OutboxMessage {
    pub fn new(body: impl Into<String>, sent_at: u64) -> Self {
        OutboxMessage {
            id: Uuid::new_v4().to_string(),
            body: body.into(),
            sent_at,
        }
    }
}

/// A conversation in the primary database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub id: String,
    pub recipient_id: Option<String>,
    pub group_id: Option<Vec<u8>>,
    pub created_at: u64,
}

impl ThreadRecord {
    pub fn contact_thread_id(recipient_id: &str) -> String {
        format!("c{}", recipient_id)
    }

    pub fn group_thread_id(group_id: &[u8]) -> String {
        format!("g{}", hex::encode(group_id))
    }

    /// A 1:1 thread with `recipient_id`.
    pub fn contact(recipient_id: &str, created_at: u64) -> Self {
        ThreadRecord {
            id: Self::contact_thread_id(recipient_id),
            recipient_id: Some(recipient_id.to_string()),
            group_id: None,
            created_at,
        }
    }

    pub fn group(group_id: &[u8], created_at: u64) -> Self {
        ThreadRecord {
            id: Self::group_thread_id(group_id),
            recipient_id: None,
            group_id: Some(group_id.to_vec()),
            created_at,
        }
    }
}

/// A message in a thread of the primary database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub unique_id: String,
    pub thread_id: String,
    /// Indexed as `interactions_by_sync_id`.
    pub sync_id: Uuid,
    pub timestamp: u64,
    pub body: String,
}

impl InteractionRecord {
    /// Clones an outbox message into `thread_id` under a fresh unique id.
    pub fn from_outbox(thread_id: &str, item: &OutboxItem, message: &OutboxMessage) -> Self {
        InteractionRecord {
            unique_id: Uuid::new_v4().to_string(),
            thread_id: thread_id.to_string(),
            sync_id: item.sync_id(),
            timestamp: message.sent_at,
            body: message.body.clone(),
        }
    }
}
