//! Message log sink.
//!
//! Received messages and exhausted asynchronous deliveries are reported
//! through a `MessageLogger`. The default implementation writes tracing events.

use tracing::{info, warn};

use crate::utils::error::DeliveryError;

pub trait MessageLogger: Send + Sync {
    fn log(&self, message_id: &str, payload: &serde_json::Value, error: Option<&DeliveryError>);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl MessageLogger for TracingLogger {
    fn log(&self, message_id: &str, payload: &serde_json::Value, error: Option<&DeliveryError>) {
        match error {
            Some(e) => warn!(message_id, %payload, error = %e, "message delivery failed"),
            None => info!(message_id, %payload, "message"),
        }
    }
}
