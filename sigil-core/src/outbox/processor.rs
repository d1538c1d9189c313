// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Outbox Processor
//!
//! Runs in the main app and merges outbox items into the primary database.
//! An item is removed from the outbox only after its merge committed, so a
//! crash between the two leaves the item behind; the next scan then finds
//! the interaction by sync id and discards the copy.

use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::storage::{
    unix_millis, ExtensionHost, OutboxStorage, SecondaryIndex, SharedConnection, Storage,
    StorageError, Txn,
};

use super::{
    InteractionRecord, OutboxError, OutboxItem, OutboxItemState, OutboxMessage, OutboxTarget,
    ThreadRecord, INTERACTIONS, INTERACTIONS_BY_SYNC_ID, OUTBOX_ITEMS, OUTBOX_ITEMS_BY_MESSAGE_ID,
    OUTBOX_MESSAGES, THREADS,
};

/// What happened to one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    pub item_id: String,
    pub sync_id: Uuid,
    /// `Reconciled` or `Discarded`.
    pub resolution: OutboxItemState,
    /// `Deleted` once the item left the outbox.
    pub state: OutboxItemState,
}

/// An item left in the outbox because processing it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub item_id: String,
    /// `None` when the item record itself could not be decoded.
    pub sync_id: Option<Uuid>,
    pub error: String,
}

/// Result of one reconciliation scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub outcomes: Vec<ItemOutcome>,
    pub failures: Vec<ItemFailure>,
}

impl ReconcileReport {
    pub fn reconciled(&self) -> usize {
        self.count(OutboxItemState::Reconciled)
    }

    pub fn discarded(&self) -> usize {
        self.count(OutboxItemState::Discarded)
    }

    fn count(&self, resolution: OutboxItemState) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.resolution == resolution)
            .count()
    }
}

/// Merges the outbox database into the primary database.
#[derive(Clone)]
pub struct OutboxProcessor {
    primary: Storage,
    outbox: OutboxStorage,
    /// One scan at a time.
    scan: Arc<Mutex<()>>,
}

impl OutboxProcessor {
    pub fn new(primary: Storage, outbox: OutboxStorage) -> Self {
        OutboxProcessor {
            primary,
            outbox,
            scan: Arc::new(Mutex::new(())),
        }
    }

    /// Starts registering the primary database views reconciliation needs.
    /// Returns false, changing nothing, if they are already registered.
    pub fn async_register_primary_database_extensions<H: ExtensionHost>(storage: &H) -> bool {
        register_index(
            storage,
            INTERACTIONS_BY_SYNC_ID,
            SecondaryIndex::new(INTERACTIONS, "sync_id"),
        )
    }

    /// Starts registering the outbox database views.
    /// Returns false, changing nothing, if they are already registered.
    pub fn async_register_outbox_database_extensions<H: ExtensionHost>(storage: &H) -> bool {
        register_index(
            storage,
            OUTBOX_ITEMS_BY_MESSAGE_ID,
            SecondaryIndex::new(OUTBOX_ITEMS, "outbox_message_id"),
        )
    }

    /// Runs one scan on the calling thread.
    ///
    /// Fails as a whole only if the outbox cannot be read; failures of
    /// single items, undecodable records included, are collected in the
    /// report and the items stay queued.
    pub fn reconcile(&self) -> Result<ReconcileReport, OutboxError> {
        let _scan = self.scan.lock();

        if !self.primary.readiness().is_ready() {
            error!("outbox reconciliation started before storage is ready");
            return Err(StorageError::NotReady(INTERACTIONS_BY_SYNC_ID.to_string()).into());
        }

        let client = self.outbox.add_client()?;
        let outbox = client.connection();
        let (items, undecodable) = self.outbox.scan_items()?;

        let mut report = ReconcileReport::default();
        for bad in undecodable {
            warn!(item_id = %bad.item_id, error = %bad.error, "outbox item cannot be decoded");
            report.failures.push(ItemFailure {
                item_id: bad.item_id,
                sync_id: None,
                error: bad.error,
            });
        }
        for item in items {
            match self.process_item(&outbox, &item) {
                Ok((resolution, state)) => report.outcomes.push(ItemOutcome {
                    item_id: item.id().to_string(),
                    sync_id: item.sync_id(),
                    resolution,
                    state,
                }),
                Err(e) => {
                    warn!(sync_id = %item.sync_id(), error = %e, "outbox item not processed");
                    report.failures.push(ItemFailure {
                        item_id: item.id().to_string(),
                        sync_id: Some(item.sync_id()),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            reconciled = report.reconciled(),
            discarded = report.discarded(),
            failed = report.failures.len(),
            "outbox reconciliation finished"
        );
        Ok(report)
    }

    /// Runs one scan on a worker thread; `completion` receives the result
    /// there.
    pub fn spawn_reconcile<F>(&self, completion: F)
    where
        F: FnOnce(Result<ReconcileReport, OutboxError>) + Send + 'static,
    {
        let completion = Arc::new(Mutex::new(Some(completion)));
        let worker_completion = Arc::clone(&completion);
        let processor = self.clone();
        let spawned = thread::Builder::new()
            .name("sigil-outbox".into())
            .spawn(move || {
                let result = processor.reconcile();
                if let Some(done) = worker_completion.lock().take() {
                    done(result);
                }
            });
        if let Err(e) = spawned {
            error!(error = %e, "could not start outbox worker");
            if let Some(done) = completion.lock().take() {
                done(Err(StorageError::Io(e).into()));
            }
        }
    }

    fn process_item(
        &self,
        outbox: &SharedConnection,
        item: &OutboxItem,
    ) -> Result<(OutboxItemState, OutboxItemState), OutboxError> {
        let message: Option<OutboxMessage> =
            outbox.read(|txn| txn.get(OUTBOX_MESSAGES, item.outbox_message_id()))?;

        let resolution = self
            .primary
            .write(|txn| merge_item(txn, item, message.as_ref()))?;
        let resolution = OutboxItemState::Created.transition(resolution)?;

        // The merge is committed; only now may the outbox copy go.
        outbox.write(|txn| {
            txn.remove(OUTBOX_ITEMS, item.id())?;
            let still_referenced = !txn
                .index_lookup(OUTBOX_ITEMS_BY_MESSAGE_ID, item.outbox_message_id())?
                .is_empty();
            if !still_referenced {
                txn.remove(OUTBOX_MESSAGES, item.outbox_message_id())?;
            }
            Ok::<_, StorageError>(())
        })?;

        Ok((resolution, resolution.transition(OutboxItemState::Deleted)?))
    }
}

fn register_index<H: ExtensionHost>(
    storage: &H,
    name: &'static str,
    index: SecondaryIndex,
) -> bool {
    if storage.registered_extension(name).is_some() {
        info!(name, "extension already registered, skipping");
        return false;
    }
    storage.async_register_extension(name, Arc::new(index), move |ok| {
        if ok {
            debug!(name, "outbox extension ready");
        } else {
            error!(name, "outbox extension registration failed");
        }
    });
    true
}

/// Merges one item inside a primary write transaction and returns its
/// resolution. Returning `Discarded` writes nothing.
fn merge_item(
    txn: &Txn<'_>,
    item: &OutboxItem,
    message: Option<&OutboxMessage>,
) -> Result<OutboxItemState, OutboxError> {
    let sync_id = item.sync_id().to_string();
    if !txn.index_lookup(INTERACTIONS_BY_SYNC_ID, &sync_id)?.is_empty() {
        debug!(sync_id, "interaction already merged, discarding outbox copy");
        return Ok(OutboxItemState::Discarded);
    }

    let message = match message {
        Some(message) => message,
        None => {
            warn!(sync_id, "outbox message missing, discarding item");
            return Ok(OutboxItemState::Discarded);
        }
    };

    let thread_id = match item.target() {
        OutboxTarget::Recipient(recipient_id) => {
            let thread_id = ThreadRecord::contact_thread_id(recipient_id);
            if !txn.contains(THREADS, &thread_id)? {
                txn.set(
                    THREADS,
                    &thread_id,
                    &ThreadRecord::contact(recipient_id, unix_millis()),
                )?;
                info!("created 1:1 thread for outbox message");
            }
            thread_id
        }
        OutboxTarget::Group(group_id) => {
            let thread_id = ThreadRecord::group_thread_id(group_id);
            if !txn.contains(THREADS, &thread_id)? {
                warn!(sync_id, "group thread no longer exists, discarding item");
                return Ok(OutboxItemState::Discarded);
            }
            thread_id
        }
    };

    let interaction = InteractionRecord::from_outbox(&thread_id, item, message);
    txn.set(INTERACTIONS, &interaction.unique_id, &interaction)?;
    debug!(sync_id, "outbox item merged");
    Ok(OutboxItemState::Reconciled)
}
