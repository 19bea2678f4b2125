//! The `client` module is the subscriber-facing side of the broker.
//!
//! `ClientConnection` forwards subscription management to the broker and
//! receives delivered messages as the broker's `DeliveryTarget`, handing
//! them on to a `MessageListener`.

pub mod connection;
pub mod listener;

pub use connection::ClientConnection;
pub use listener::{ChannelListener, MessageListener};
