// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Notification System
//!
//! Observers subscribe to a [`NotificationCenter`] and receive
//! [`Notification`]s on a dedicated dispatcher thread. Posting never blocks
//! on observers and never runs them under the poster's locks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

/// Notifications posted by the storage and identity layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Every storage instance finished registering its extensions.
    /// Posted exactly once per environment.
    StorageIsReady,

    /// An identity record changed.
    IdentityStateChanged {
        /// The affected recipient, or `None` for the local identity key.
        recipient_id: Option<String>,
    },
}

/// Notification handler trait.
///
/// Implement this trait to observe notifications.
pub trait NotificationHandler: Send + Sync {
    /// Called on the dispatcher thread for every notification posted
    /// while the handler is subscribed.
    fn on_notification(&self, notification: &Notification);
}

/// Simple callback-based notification handler.
pub struct CallbackHandler<F>
where
    F: Fn(&Notification) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackHandler<F>
where
    F: Fn(&Notification) + Send + Sync,
{
    /// Creates a new callback handler.
    pub fn new(callback: F) -> Self {
        CallbackHandler { callback }
    }
}

impl<F> NotificationHandler for CallbackHandler<F>
where
    F: Fn(&Notification) + Send + Sync,
{
    fn on_notification(&self, notification: &Notification) {
        (self.callback)(notification);
    }
}

/// Handle returned by [`NotificationCenter::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscribers = Vec<(SubscriptionId, Arc<dyn NotificationHandler>)>;

struct Delivery {
    notification: Notification,
    handlers: Vec<Arc<dyn NotificationHandler>>,
}

struct CenterInner {
    handlers: RwLock<Subscribers>,
    next_id: AtomicU64,
    /// `None` when the dispatcher thread could not be started; delivery
    /// then happens on the posting thread.
    sender: Option<Mutex<mpsc::Sender<Delivery>>>,
}

/// Observer registry with asynchronous fan-out.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct NotificationCenter {
    inner: Arc<CenterInner>,
}

impl NotificationCenter {
    /// Creates a registry and starts its dispatcher thread.
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel::<Delivery>();
        let spawned = thread::Builder::new()
            .name("sigil-notifications".into())
            .spawn(move || {
                // Ends once every center handle (and so the sender) is gone.
                for delivery in receiver {
                    deliver(&delivery.notification, &delivery.handlers);
                }
            });

        let sender = match spawned {
            Ok(_) => Some(Mutex::new(sender)),
            Err(e) => {
                warn!(error = %e, "notification dispatcher unavailable, delivering inline");
                None
            }
        };

        NotificationCenter {
            inner: Arc::new(CenterInner {
                handlers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                sender,
            }),
        }
    }

    /// Adds an observer.
    pub fn subscribe(&self, handler: Arc<dyn NotificationHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.handlers.write().push((id, handler));
        id
    }

    /// Adds a closure observer.
    pub fn subscribe_fn<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(CallbackHandler::new(callback)))
    }

    /// Removes an observer. Notifications already queued for it may still
    /// be delivered. Returns false if the id was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.inner.handlers.write();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    /// Returns the number of subscribed observers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.handlers.read().len()
    }

    /// Queues `notification` for every observer subscribed right now.
    pub fn post(&self, notification: Notification) {
        let handlers: Vec<_> = self
            .inner
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        if handlers.is_empty() {
            return;
        }
        debug!(?notification, observers = handlers.len(), "posting notification");

        match &self.inner.sender {
            Some(sender) => {
                let delivery = Delivery {
                    notification,
                    handlers,
                };
                if let Err(mpsc::SendError(delivery)) = sender.lock().send(delivery) {
                    deliver(&delivery.notification, &delivery.handlers);
                }
            }
            None => deliver(&notification, &handlers),
        }
    }
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver(notification: &Notification, handlers: &[Arc<dyn NotificationHandler>]) {
    for handler in handlers {
        handler.on_notification(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_delivery_is_asynchronous_and_ordered() {
        let center = NotificationCenter::new();
        let (tx, rx) = mpsc::channel();
        let poster = thread::current().id();
        let tx = Mutex::new(tx);
        center.subscribe_fn(move |n| {
            let _ = tx.lock().send((n.clone(), thread::current().id()));
        });

        center.post(Notification::StorageIsReady);
        center.post(Notification::IdentityStateChanged {
            recipient_id: Some("+15551234567".into()),
        });

        let (first, thread_id) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first, Notification::StorageIsReady);
        assert_ne!(thread_id, poster);
        let (second, _) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(
            second,
            Notification::IdentityStateChanged {
                recipient_id: Some("+15551234567".into())
            }
        );
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let center = NotificationCenter::new();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let id = center.subscribe_fn(move |n| {
            let _ = tx.lock().send(n.clone());
        });
        assert_eq!(center.subscriber_count(), 1);

        assert!(center.unsubscribe(id));
        assert!(!center.unsubscribe(id));
        center.post(Notification::StorageIsReady);

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}
