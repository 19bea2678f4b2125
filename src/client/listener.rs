use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::broker::message::Message;
use crate::utils::error::DeliveryError;

/// Receives the messages delivered to a client connection.
pub trait MessageListener: Send + Sync {
    fn on_message(&self, message: &Message) -> Result<(), DeliveryError>;
}

/// Forwards every delivered message into a tokio channel.
///
/// Delivery fails once the receiving side has been dropped.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    sender: UnboundedSender<Message>,
}

impl ChannelListener {
    pub fn new() -> (Self, UnboundedReceiver<Message>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl MessageListener for ChannelListener {
    fn on_message(&self, message: &Message) -> Result<(), DeliveryError> {
        self.sender
            .send(message.clone())
            .map_err(|_| DeliveryError::new("message channel closed"))
    }
}
