//! Client connection
//!
//! A `ClientConnection` is the handle a subscriber holds. It keeps the id the
//! broker issued so a later `connect` comes back under the same id, and it is
//! the broker's delivery target for that id. When the broker announces its
//! shutdown the connection tears itself down instead of passing the message
//! on to the listener.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::info;

use crate::broker::message::Message;
use crate::broker::subscriber::{DeliveryTarget, SubscriberId};
use crate::broker::subscription::Key;
use crate::broker::Broker;
use crate::client::listener::MessageListener;
use crate::utils::error::{BrokerError, DeliveryError, Result};
use crate::utils::log_sink::MessageLogger;

const NEVER: i64 = i64::MIN;

#[derive(Debug, Default)]
struct ConnectionState {
    id: Option<SubscriberId>,
    connected: bool,
}

struct ClientInner {
    broker: Arc<Broker>,
    listener: Arc<dyn MessageListener>,
    logger: Option<Arc<dyn MessageLogger>>,
    state: Mutex<ConnectionState>,
    server_closed: AtomicBool,
    last_receive: AtomicI64,
}

#[derive(Clone)]
pub struct ClientConnection {
    inner: Arc<ClientInner>,
}

impl ClientConnection {
    pub fn new(broker: Arc<Broker>, listener: Arc<dyn MessageListener>) -> Self {
        Self::build(broker, listener, None)
    }

    /// Logs every received message, including the server close.
    pub fn with_logger(
        broker: Arc<Broker>,
        listener: Arc<dyn MessageListener>,
        logger: Arc<dyn MessageLogger>,
    ) -> Self {
        Self::build(broker, listener, Some(logger))
    }

    fn build(
        broker: Arc<Broker>,
        listener: Arc<dyn MessageListener>,
        logger: Option<Arc<dyn MessageLogger>>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                broker,
                listener,
                logger,
                state: Mutex::new(ConnectionState::default()),
                server_closed: AtomicBool::new(false),
                last_receive: AtomicI64::new(NEVER),
            }),
        }
    }

    /// Registers with the broker, reusing the id issued by an earlier connect.
    pub fn connect(&self) -> Result<SubscriberId> {
        let mut state = self.inner.state();
        if let (true, Some(id)) = (state.connected, &state.id) {
            return Ok(id.clone());
        }
        let target: Arc<dyn DeliveryTarget> = self.inner.clone();
        let id = self.inner.broker.connect(state.id.as_deref(), target)?;
        state.id = Some(id.clone());
        state.connected = true;
        self.inner.server_closed.store(false, Ordering::SeqCst);
        info!("Client connection {id} established");
        Ok(id)
    }

    /// The id issued by the broker, kept after the connection closes.
    pub fn id(&self) -> Option<SubscriberId> {
        self.inner.state().id.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state().connected
    }

    pub fn is_server_closed(&self) -> bool {
        self.inner.server_closed.load(Ordering::SeqCst)
    }

    /// Broker time of the last delivery, if any.
    pub fn last_receive(&self) -> Option<i64> {
        match self.inner.last_receive.load(Ordering::SeqCst) {
            NEVER => None,
            t => Some(t),
        }
    }

    fn connected_id(&self) -> Result<SubscriberId> {
        let state = self.inner.state();
        match (&state.id, state.connected) {
            (Some(id), true) => Ok(id.clone()),
            (id, _) => Err(BrokerError::NotConnected {
                id: id.clone().unwrap_or_default(),
            }),
        }
    }

    pub fn add_subject(&self, subject: &str, keys: Option<&[&str]>) -> Result<Vec<Key>> {
        let id = self.connected_id()?;
        self.inner.broker.add_subject(&id, subject, keys)
    }

    pub fn remove_subject(&self, subject: &str, keys: Option<&[&str]>) -> Result<Vec<Key>> {
        let id = self.connected_id()?;
        self.inner.broker.remove_subject(&id, subject, keys)
    }

    /// Starts receiving, first replaying cached messages stamped at or after
    /// `from` when it is given.
    pub fn start_receive(&self, from: Option<i64>) -> Result<usize> {
        let id = self.connected_id()?;
        self.inner.broker.start_receive(&id, from)
    }

    pub fn stop_receive(&self) -> Result<()> {
        let id = self.connected_id()?;
        self.inner.broker.stop_receive(&id)
    }

    /// Disconnects from the broker. Closing twice is harmless.
    pub fn close(&self) {
        if let Some(id) = self.inner.mark_disconnected() {
            self.inner.broker.disconnect(&id);
            info!("Client connection {id} closed");
        }
    }
}

impl ClientInner {
    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Flips to disconnected, returning the id if the connection was open.
    fn mark_disconnected(&self) -> Option<SubscriberId> {
        let mut state = self.state();
        if !state.connected {
            return None;
        }
        state.connected = false;
        state.id.clone()
    }

    fn log(&self, message: &Message) {
        if let Some(logger) = &self.logger {
            logger.log(message.id(), message.payload(), None);
        }
    }
}

impl DeliveryTarget for ClientInner {
    fn deliver(&self, message: &Message) -> Result<(), DeliveryError> {
        self.last_receive
            .store(self.broker.now(), Ordering::SeqCst);
        self.log(message);

        if message.is_server_close() {
            self.server_closed.store(true, Ordering::SeqCst);
            if let Some(id) = self.mark_disconnected() {
                self.broker.disconnect(&id);
                info!("Client connection {id} closed by server");
            }
            return Ok(());
        }

        self.listener.on_message(message)
    }
}
