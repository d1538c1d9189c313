// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Outbox Module
//!
//! Messages sent from the extension process are first saved in the primary
//! copy, then cloned into the outbox database, and finally cloned into the
//! primary database by the main app. Record ids are regenerated on every
//! clone and an item may be written more than once, so the per-message
//! `sync_id` is the only identifier that survives the trip.

mod item;
mod processor;
mod queue;
mod records;

pub use item::{OutboxItem, OutboxItemState, OutboxTarget};
pub use processor::{ItemFailure, ItemOutcome, OutboxProcessor, ReconcileReport};
pub use queue::UndecodableItem;
pub use records::{InteractionRecord, OutboxMessage, ThreadRecord};

use thiserror::Error;

use crate::storage::StorageError;

/// Collection of [`ThreadRecord`]s in the primary database.
pub const THREADS: &str = "threads";
/// Collection of [`InteractionRecord`]s in the primary database.
pub const INTERACTIONS: &str = "interactions";
/// Collection of [`OutboxItem`]s in the outbox database.
pub const OUTBOX_ITEMS: &str = "outbox_items";
/// Collection of [`OutboxMessage`]s in the outbox database.
pub const OUTBOX_MESSAGES: &str = "outbox_messages";

/// Primary database index of interactions by sync id.
pub const INTERACTIONS_BY_SYNC_ID: &str = "interactions_by_sync_id";
/// Outbox database index of items by the message they point at.
pub const OUTBOX_ITEMS_BY_MESSAGE_ID: &str = "outbox_items_by_message_id";

/// Outbox error types.
#[derive(Error, Debug)]
pub enum OutboxError {
    #[error("Invalid outbox target: {0}")]
    InvalidTarget(String),

    #[error("Invalid outbox item: {0}")]
    InvalidItem(String),

    #[error("Invalid item state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: OutboxItemState,
        to: OutboxItemState,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
