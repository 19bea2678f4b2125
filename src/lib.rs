//! # relaybus
//!
//! `relaybus` is an embedded publish/subscribe message broker. It fans
//! messages published on named subjects, optionally partitioned by keys, out
//! to the subscribers inside the same process that currently want them.
//!
//! ## Core Modules
//!
//! The library is structured into several modules, each with a distinct responsibility:
//!
//! - `broker`: The central component: subscriber registry, subscriptions, routing,
//!   synchronous and asynchronous delivery and the replay cache.
//! - `client`: The subscriber-facing connection handle and message listeners.
//! - `config`: Handles loading and managing configuration.
//! - `queue`: The bounded, sharded work queue behind every cross-thread delivery.
//! - `utils`: Shared utilities such as error types, logging and the clock.

pub mod broker;
pub mod client;
pub mod config;
pub mod queue;
pub mod utils;

pub use broker::{Broker, Message};
pub use client::ClientConnection;
pub use utils::error::{BrokerError, DeliveryError};

#[cfg(test)]
mod tests;
