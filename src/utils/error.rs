//! The `error` module defines the error types used within `relaybus`.
//!
//! `BrokerError` is what every broker and client operation returns.
//! Connection and subscription errors are always surfaced synchronously;
//! per-subscriber delivery failures are wrapped in `DeliveryError`.

use std::fmt;

use crate::broker::subscriber::SubscriberId;

/// A single delivery handler failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct DeliveryError(pub String);

impl DeliveryError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// A delivery failure attributed to one subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub id: SubscriberId,
    pub error: DeliveryError,
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.error)
    }
}

/// Errors returned by broker and client connection operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// The id is already bound to a different handle.
    #[error("subscriber `{id}` is already connected with a different handle")]
    Connect { id: SubscriberId },

    /// The operation targeted a subscriber that is not connected.
    #[error("subscriber `{id}` is not connected")]
    NotConnected { id: SubscriberId },

    /// The broker has been closed and refuses further work.
    #[error("broker is closed")]
    Closed,

    /// One or more subscribers failed during a synchronous send.
    #[error("delivery failed for {}", format_failures(.failures))]
    Delivery { failures: Vec<DeliveryFailure> },

    #[error("unsupported operation: {operation}")]
    Unsupported { operation: &'static str },
}

impl BrokerError {
    /// True for the errors a caller sees when a message could not be sent:
    /// not connected, closed broker or aggregate delivery failure.
    pub fn is_message_send(&self) -> bool {
        matches!(
            self,
            BrokerError::NotConnected { .. } | BrokerError::Closed | BrokerError::Delivery { .. }
        )
    }

    /// Ids of the subscribers that failed, empty for non-delivery errors.
    pub fn failed_ids(&self) -> Vec<&str> {
        match self {
            BrokerError::Delivery { failures } => failures.iter().map(|f| f.id.as_str()).collect(),
            _ => Vec::new(),
        }
    }
}

fn format_failures(failures: &[DeliveryFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors returned by the work queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("work queue is shut down")]
    Closed,
}

impl From<QueueError> for BrokerError {
    fn from(_: QueueError) -> Self {
        BrokerError::Closed
    }
}

pub type Result<T, E = BrokerError> = std::result::Result<T, E>;
