//! The `broker` module is the core of `relaybus`: the message envelope, the
//! per-subscriber handle and subscription table, the replay cache and the
//! `Broker` engine that routes messages between them.

pub mod cache;
pub mod directory;
pub mod engine;
pub mod listener;
pub mod message;
pub mod subscriber;
pub mod subscription;

pub use engine::{Broker, BrokerBuilder};
pub use message::Message;
pub use subscriber::{DeliveryTarget, Subscriber, SubscriberId};
