//! Subscription table
//!
//! Holds, for one subscriber, the subjects it listens to and for each subject
//! the set of keys. A `None` key is the wildcard: every key of that subject.
//! Adds and removes are idempotent per key and report only the keys whose
//! state actually changed.
//!
//! Concurrency note: the table is not synchronized; the owning `Subscriber`
//! keeps it behind its own mutex.

use std::collections::{HashMap, HashSet};

pub type Key = Option<String>;

#[derive(Debug, Default, Clone)]
pub struct SubscriptionTable {
    subjects: HashMap<String, HashSet<Key>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to `keys` of `subject`; `None` subscribes to every key.
    /// Returns the keys that were newly added.
    pub fn add(&mut self, subject: &str, keys: Option<&[&str]>) -> Vec<Key> {
        let entry = self.subjects.entry(subject.to_string()).or_default();
        let changed: Vec<Key> = requested(keys)
            .into_iter()
            .filter(|key| entry.insert(key.clone()))
            .collect();
        if entry.is_empty() {
            self.subjects.remove(subject);
        }
        changed
    }

    /// Unsubscribes `keys` of `subject`; `None` removes the wildcard key.
    /// The subject is dropped once its last key is gone. Returns the keys
    /// that were actually removed.
    pub fn remove(&mut self, subject: &str, keys: Option<&[&str]>) -> Vec<Key> {
        let Some(entry) = self.subjects.get_mut(subject) else {
            return Vec::new();
        };
        let changed: Vec<Key> = requested(keys)
            .into_iter()
            .filter(|key| entry.remove(key))
            .collect();
        if entry.is_empty() {
            self.subjects.remove(subject);
        }
        changed
    }

    /// True when `subject` is registered with the wildcard or with `key`.
    pub fn matches(&self, subject: &str, key: Option<&str>) -> bool {
        match self.subjects.get(subject) {
            Some(keys) => {
                keys.contains(&None) || key.is_some_and(|k| keys.contains(&Some(k.to_string())))
            }
            None => false,
        }
    }

    pub fn contains_subject(&self, subject: &str) -> bool {
        self.subjects.contains_key(subject)
    }

    pub fn keys(&self, subject: &str) -> Option<&HashSet<Key>> {
        self.subjects.get(subject)
    }

    pub fn subjects(&self) -> impl Iterator<Item = &str> {
        self.subjects.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }
}

fn requested(keys: Option<&[&str]>) -> Vec<Key> {
    match keys {
        Some(keys) => keys.iter().map(|k| Some((*k).to_string())).collect(),
        None => vec![None],
    }
}
