//! Message definitions for the broker
//!
//! `Message` is the envelope routed by the broker. Fields:
//! - `id`: opaque unique id (uuid v4) generated at construction
//! - `subjects`: subject -> key routing list in insertion order; the first
//!   entry is the primary subject. A `None` key means the message carries no
//!   key for that subject and only reaches wildcard subscribers.
//! - `payload`: JSON body
//! - `timestamp`: milliseconds since UNIX epoch; `0` until the broker stamps
//!   it at cache insertion. Publishers do not set it.
//! - `destinations`: when non-empty, only these subscriber ids may receive
//!   the message (subject/key matching still applies)
//! - `server_close`: marks the final message the broker sends when it shuts down

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::broker::subscriber::SubscriberId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: String,
    subjects: Vec<(String, Option<String>)>,
    payload: serde_json::Value,
    timestamp: i64,
    #[serde(default)]
    destinations: HashSet<SubscriberId>,
    #[serde(default)]
    server_close: bool,
}

impl Message {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            subjects: Vec::new(),
            payload,
            timestamp: 0,
            destinations: HashSet::new(),
            server_close: false,
        }
    }

    /// Shorthand for a message on a single subject.
    pub fn on(subject: &str, key: Option<&str>, payload: serde_json::Value) -> Self {
        Self::new(payload).with_subject(subject, key)
    }

    /// The sentinel the broker publishes to every subscriber when it closes.
    pub fn server_close() -> Self {
        let mut message = Self::new(serde_json::Value::Null);
        message.server_close = true;
        message
    }

    /// Adds a routing subject. Re-adding a subject replaces its key but keeps
    /// its position, so the primary subject never changes once set.
    pub fn with_subject(mut self, subject: &str, key: Option<&str>) -> Self {
        let key = key.map(str::to_string);
        match self.subjects.iter_mut().find(|(s, _)| s == subject) {
            Some(entry) => entry.1 = key,
            None => self.subjects.push((subject.to_string(), key)),
        }
        self
    }

    /// Restricts delivery to `id`. May be called repeatedly.
    pub fn with_destination(mut self, id: &str) -> Self {
        self.destinations.insert(id.to_string());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The first subject added to the message.
    pub fn subject(&self) -> Option<&str> {
        self.subjects.first().map(|(s, _)| s.as_str())
    }

    /// Key of the primary subject.
    pub fn key(&self) -> Option<&str> {
        self.subjects.first().and_then(|(_, k)| k.as_deref())
    }

    /// Key carried for `subject`. The outer `None` means the subject is absent.
    pub fn key_for(&self, subject: &str) -> Option<Option<&str>> {
        self.subjects
            .iter()
            .find(|(s, _)| s == subject)
            .map(|(_, k)| k.as_deref())
    }

    pub fn subjects(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.subjects.iter().map(|(s, k)| (s.as_str(), k.as_deref()))
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub(crate) fn stamp(&mut self, timestamp: i64) {
        self.timestamp = timestamp;
    }

    pub fn destinations(&self) -> &HashSet<SubscriberId> {
        &self.destinations
    }

    /// True when `id` may receive this message.
    pub fn is_destined_for(&self, id: &str) -> bool {
        self.destinations.is_empty() || self.destinations.contains(id)
    }

    pub fn is_server_close(&self) -> bool {
        self.server_close
    }
}
