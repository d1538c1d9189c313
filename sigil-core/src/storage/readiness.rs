// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Storage readiness gate.
//!
//! Every storage instance is tracked when it is created and reports
//! completion once its synchronous and asynchronous extension registrations
//! are done. When the last one reports, the gate opens for good and
//! [`Notification::StorageIsReady`] is posted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use crate::notifications::{Notification, NotificationCenter};

use super::StorageKind;

#[derive(Debug, Default)]
struct ReadinessState {
    tracked: usize,
    completed: usize,
}

/// Process-wide readiness shared by all storages of one environment.
pub struct StorageReadiness {
    state: Mutex<ReadinessState>,
    ready: AtomicBool,
    became_ready: Condvar,
    notifications: NotificationCenter,
}

impl StorageReadiness {
    pub fn new(notifications: NotificationCenter) -> Arc<Self> {
        Arc::new(StorageReadiness {
            state: Mutex::new(ReadinessState::default()),
            ready: AtomicBool::new(false),
            became_ready: Condvar::new(),
            notifications,
        })
    }

    /// True once every tracked storage completed registration. Never
    /// reverts to false.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Blocks until ready or until `timeout` elapses. Returns readiness.
    pub fn wait_until_ready(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if !self.is_ready() {
            let _ = self
                .became_ready
                .wait_while_for(&mut state, |_| !self.is_ready(), timeout);
        }
        self.is_ready()
    }

    pub(crate) fn track(&self, kind: StorageKind) {
        let mut state = self.state.lock();
        state.tracked += 1;
        debug!(%kind, tracked = state.tracked, "tracking storage registration");
    }

    pub(crate) fn storage_completed(&self, kind: StorageKind) {
        let mut state = self.state.lock();
        state.completed += 1;
        debug!(
            %kind,
            completed = state.completed,
            tracked = state.tracked,
            "storage finished registration"
        );
        if self.is_ready() || state.completed < state.tracked {
            return;
        }
        self.ready.store(true, Ordering::Release);
        self.became_ready.notify_all();
        drop(state);

        info!("storage is ready");
        self.notifications.post(Notification::StorageIsReady);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_after_all_tracked_complete() {
        let readiness = StorageReadiness::new(NotificationCenter::new());
        readiness.track(StorageKind::Primary);
        readiness.track(StorageKind::Session);
        assert!(!readiness.is_ready());

        readiness.storage_completed(StorageKind::Primary);
        assert!(!readiness.is_ready());

        readiness.storage_completed(StorageKind::Session);
        assert!(readiness.is_ready());

        // A storage tracked later does not close the gate again.
        readiness.track(StorageKind::Outbox);
        assert!(readiness.is_ready());
    }

    #[test]
    fn test_wait_until_ready_wakes() {
        let readiness = StorageReadiness::new(NotificationCenter::new());
        readiness.track(StorageKind::Primary);
        assert!(!readiness.wait_until_ready(Duration::from_millis(10)));

        let waiter = {
            let readiness = Arc::clone(&readiness);
            std::thread::spawn(move || readiness.wait_until_ready(Duration::from_secs(10)))
        };
        readiness.storage_completed(StorageKind::Primary);

        assert!(waiter.join().unwrap());
    }
}
