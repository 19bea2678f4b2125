//! Replay cache
//!
//! Keeps the messages sent during the trailing retention window so a
//! subscriber that starts receiving from a past timestamp can catch up.
//! Entries are ordered by non-decreasing timestamp; stale ones are evicted
//! from the front each time a message is appended.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::broker::message::Message;

/// Retention window used when none is configured, in milliseconds.
pub const DEFAULT_RETENTION_MS: i64 = 5000;

#[derive(Debug)]
pub struct ReplayCache {
    retention_ms: i64,
    entries: VecDeque<Arc<Message>>,
    last_timestamp: i64,
}

impl ReplayCache {
    pub fn new(retention_ms: i64) -> Self {
        Self {
            retention_ms: retention_ms.max(0),
            entries: VecDeque::new(),
            last_timestamp: i64::MIN,
        }
    }

    pub fn retention_ms(&self) -> i64 {
        self.retention_ms
    }

    /// Stamps `message` with `now` (never earlier than the previous stamp),
    /// stores it and evicts everything older than the window. The server-close
    /// sentinel is stamped but never stored.
    pub fn append(&mut self, mut message: Message, now: i64) -> Arc<Message> {
        let timestamp = now.max(self.last_timestamp);
        self.last_timestamp = timestamp;
        message.stamp(timestamp);
        let message = Arc::new(message);

        if self.retention_ms > 0 && !message.is_server_close() {
            self.entries.push_back(Arc::clone(&message));
        }
        self.evict(timestamp);
        message
    }

    /// Drops entries with `timestamp <= now - retention`.
    pub fn evict(&mut self, now: i64) -> usize {
        let cutoff = now.saturating_sub(self.retention_ms);
        let mut evicted = 0;
        while self
            .entries
            .front()
            .is_some_and(|front| front.timestamp() <= cutoff)
        {
            self.entries.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Cached messages with `timestamp >= from`, oldest first.
    pub fn since(&self, from: i64) -> impl Iterator<Item = &Arc<Message>> {
        let start = self.entries.partition_point(|m| m.timestamp() < from);
        self.entries.range(start..)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn timestamps(&self) -> Vec<i64> {
        self.entries.iter().map(|m| m.timestamp()).collect()
    }
}

impl Default for ReplayCache {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION_MS)
    }
}
