//! Subscriber handle
//!
//! One `Subscriber` exists per connected subscriber. It owns the subscription
//! table and the admission flags, evaluates the routing predicate and is the
//! single entry point through which a message reaches the subscriber's
//! `DeliveryTarget`.
//!
//! The handle keeps no reference back to the broker. Everything that needs
//! broker state (registry, cache, disabled ids) goes through `Broker` methods
//! keyed by the subscriber id.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::broker::message::Message;
use crate::broker::subscription::{Key, SubscriptionTable};
use crate::utils::error::DeliveryError;

pub type SubscriberId = String;

const NO_REPLAY: i64 = -1;

/// Receives the messages routed to one subscriber.
pub trait DeliveryTarget: Send + Sync {
    fn deliver(&self, message: &Message) -> Result<(), DeliveryError>;
}

pub struct Subscriber {
    id: SubscriberId,
    target: Arc<dyn DeliveryTarget>,
    subscriptions: Mutex<SubscriptionTable>,
    enabled: AtomicBool,
    receiving: AtomicBool,
    replay_from: AtomicI64,
    delivered: AtomicU64,
    server_closed: AtomicBool,
}

impl Subscriber {
    pub fn new(id: SubscriberId, target: Arc<dyn DeliveryTarget>) -> Self {
        Self {
            id,
            target,
            subscriptions: Mutex::new(SubscriptionTable::new()),
            enabled: AtomicBool::new(true),
            receiving: AtomicBool::new(false),
            replay_from: AtomicI64::new(NO_REPLAY),
            delivered: AtomicU64::new(0),
            server_closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// True when `target` is the very object this handle delivers to.
    pub fn has_target(&self, target: &Arc<dyn DeliveryTarget>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.target), Arc::as_ptr(target))
    }

    fn table(&self) -> MutexGuard<'_, SubscriptionTable> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_subject(&self, subject: &str, keys: Option<&[&str]>) -> Vec<Key> {
        self.table().add(subject, keys)
    }

    pub fn remove_subject(&self, subject: &str, keys: Option<&[&str]>) -> Vec<Key> {
        self.table().remove(subject, keys)
    }

    /// Copy of the current subscription table.
    pub fn subscriptions(&self) -> SubscriptionTable {
        self.table().clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_receiving(&self) -> bool {
        self.receiving.load(Ordering::SeqCst)
    }

    pub(crate) fn set_receiving(&self, receiving: bool) {
        self.receiving.store(receiving, Ordering::SeqCst);
    }

    pub fn replay_from(&self) -> Option<i64> {
        match self.replay_from.load(Ordering::SeqCst) {
            from if from >= 0 => Some(from),
            _ => None,
        }
    }

    pub(crate) fn set_replay_from(&self, from: Option<i64>) {
        let from = from.filter(|f| *f >= 0).unwrap_or(NO_REPLAY);
        self.replay_from.store(from, Ordering::SeqCst);
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::SeqCst)
    }

    pub(crate) fn reset_delivered_count(&self) {
        self.delivered.store(0, Ordering::SeqCst);
    }

    pub fn is_server_closed(&self) -> bool {
        self.server_closed.load(Ordering::SeqCst)
    }

    /// Subject/key and destination part of the routing predicate, ignoring
    /// the receiving flag. Used for replay, which runs before the handle is
    /// marked receiving.
    pub fn wants(&self, message: &Message) -> bool {
        if !message.is_destined_for(&self.id) {
            return false;
        }
        let table = self.table();
        message
            .subjects()
            .any(|(subject, key)| table.matches(subject, key))
    }

    /// Full routing predicate. The server-close sentinel carries no subject
    /// and reaches every connected handle.
    pub fn accepts(&self, message: &Message) -> bool {
        if message.is_server_close() {
            return message.is_destined_for(&self.id);
        }
        self.is_receiving() && self.wants(message)
    }

    /// Hands `message` to the target. A disabled handle silently drops data
    /// messages and returns `Ok(false)`; the server-close sentinel always goes
    /// through. Panics in the target are reported as delivery errors.
    pub fn deliver(&self, message: &Message) -> Result<bool, DeliveryError> {
        let server_close = message.is_server_close();
        if server_close {
            self.server_closed.store(true, Ordering::SeqCst);
            info!("Subscriber {} received server close", self.id);
        }
        if !server_close && !self.is_enabled() {
            debug!("Subscriber {} is disabled, dropping {}", self.id, message.id());
            return Ok(false);
        }

        catch_unwind(AssertUnwindSafe(|| self.target.deliver(message)))
            .unwrap_or_else(|_| Err(DeliveryError::new("delivery target panicked")))?;

        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("enabled", &self.is_enabled())
            .field("receiving", &self.is_receiving())
            .field("delivered", &self.delivered_count())
            .finish()
    }
}
