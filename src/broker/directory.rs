//! Directory registration
//!
//! The broker publishes each connected subscriber handle under a generated
//! name so the rest of the process can look it up. The directory itself
//! belongs to the surrounding service; `MemoryDirectory` is the in-process
//! implementation used when no other is supplied.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::broker::subscriber::Subscriber;

pub trait Directory: Send + Sync {
    /// Returns false when `name` is already taken.
    fn register(&self, name: &str, handle: Arc<Subscriber>) -> bool;

    fn unregister(&self, name: &str);
}

/// The name a subscriber handle is registered under.
pub fn subscriber_name(id: &str) -> String {
    format!("subscriber/{id}")
}

#[derive(Debug, Default)]
pub struct MemoryDirectory {
    entries: RwLock<HashMap<String, Arc<Subscriber>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<Subscriber>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl Directory for MemoryDirectory {
    fn register(&self, name: &str, handle: Arc<Subscriber>) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(name) {
            return false;
        }
        entries.insert(name.to_string(), handle);
        true
    }

    fn unregister(&self, name: &str) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }
}
