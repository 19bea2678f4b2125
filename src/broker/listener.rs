//! Broker listeners
//!
//! Observers registered on the broker are told about connections, closes
//! and subscription changes. Notifications iterate over a snapshot of the
//! registered listeners, so a listener may register or remove listeners
//! from inside a callback.

use std::sync::{Arc, PoisonError, RwLock};

use crate::broker::subscription::Key;

pub trait BrokerListener: Send + Sync {
    fn connected(&self, _id: &str) {}

    fn closed(&self, _id: &str) {}

    /// `keys` holds only the keys that were newly subscribed.
    fn subject_added(&self, _id: &str, _subject: &str, _keys: &[Key]) {}

    /// `keys` holds only the keys that were actually unsubscribed.
    fn subject_removed(&self, _id: &str, _subject: &str, _keys: &[Key]) {}
}

#[derive(Default)]
pub struct ListenerSet {
    listeners: RwLock<Vec<Arc<dyn BrokerListener>>>,
}

impl ListenerSet {
    pub fn add(&self, listener: Arc<dyn BrokerListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Removes `listener` by identity. Returns whether it was registered.
    pub fn remove(&self, listener: &Arc<dyn BrokerListener>) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|l| !std::ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(listener)));
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify(&self, event: impl Fn(&dyn BrokerListener)) {
        let snapshot = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in snapshot {
            event(listener.as_ref());
        }
    }
}
