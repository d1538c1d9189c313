// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Outbox queue operations on the outbox database.

use tracing::{debug, warn};

use crate::storage::OutboxStorage;

use super::{OutboxError, OutboxItem, OutboxMessage, OUTBOX_ITEMS, OUTBOX_MESSAGES};

/// An item record that could not be decoded, for example one written by a
/// newer extension. It stays in the outbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndecodableItem {
    pub item_id: String,
    pub error: String,
}

impl OutboxStorage {
    /// Saves `message` and an item pointing at it in one transaction.
    ///
    /// Called by the extension process after a message was sent. The same
    /// message may be enqueued again under a new item.
    pub fn enqueue(&self, item: &OutboxItem, message: &OutboxMessage) -> Result<(), OutboxError> {
        if item.outbox_message_id() != message.id {
            return Err(OutboxError::InvalidItem(format!(
                "item points at message {} but message {} was given",
                item.outbox_message_id(),
                message.id
            )));
        }

        let client = self.add_client()?;
        client.connection().write(|txn| {
            txn.set(OUTBOX_MESSAGES, &message.id, message)?;
            txn.set(OUTBOX_ITEMS, item.id(), item)?;
            Ok::<_, OutboxError>(())
        })?;
        debug!(sync_id = %item.sync_id(), "outbox item enqueued");
        Ok(())
    }

    /// Items waiting for reconciliation, oldest first. Records that cannot
    /// be decoded are left out.
    pub fn pending_items(&self) -> Result<Vec<OutboxItem>, OutboxError> {
        let (items, undecodable) = self.scan_items()?;
        if !undecodable.is_empty() {
            warn!(count = undecodable.len(), "skipping undecodable outbox items");
        }
        Ok(items)
    }

    /// Decodes every item record on its own, so one bad record does not
    /// hide the others. Decoded items come oldest first.
    pub(crate) fn scan_items(
        &self,
    ) -> Result<(Vec<OutboxItem>, Vec<UndecodableItem>), OutboxError> {
        let client = self.add_client()?;
        let records = client
            .connection()
            .read(|txn| txn.all_each::<OutboxItem>(OUTBOX_ITEMS))?;

        let mut items = Vec::with_capacity(records.len());
        let mut undecodable = Vec::new();
        for (key, record) in records {
            match record {
                Ok(item) => items.push(item),
                Err(e) => undecodable.push(UndecodableItem {
                    item_id: key,
                    error: e.to_string(),
                }),
            }
        }
        items.sort_by(|a, b| {
            a.timestamp()
                .cmp(&b.timestamp())
                .then_with(|| a.id().cmp(b.id()))
        });
        Ok((items, undecodable))
    }

    /// Number of messages still referenced or not yet cleaned up.
    pub fn message_count(&self) -> Result<usize, OutboxError> {
        let client = self.add_client()?;
        Ok(client.connection().read(|txn| txn.count(OUTBOX_MESSAGES))?)
    }
}
