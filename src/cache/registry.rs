//! Fetch Registry Module
//!
//! Records the keys written through the engine, oldest first, for bulk
//! purges and FIFO eviction.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

// == Fetch Registry ==
/// Ordered record of stored keys.
///
/// Keys are stored in a VecDeque where:
/// - Front = Oldest write (next eviction candidate)
/// - Back = Most recent write
///
/// A key may appear more than once; removal from the backend is idempotent
/// so evicting a repeat is harmless.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FetchRegistry {
    keys: VecDeque<String>,
}

impl FetchRegistry {
    // == Constructor ==
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self {
            keys: VecDeque::new(),
        }
    }

    // == Register ==
    /// Records a write of `key`.
    ///
    /// Skipped when `key` already is the most recent write.
    pub fn register(&mut self, key: &str) {
        if self.keys.back().map(String::as_str) != Some(key) {
            self.keys.push_back(key.to_string());
        }
    }

    // == Remove ==
    /// Drops every occurrence of a key.
    pub fn remove(&mut self, key: &str) {
        self.keys.retain(|k| k != key);
    }

    // == Evict Oldest ==
    /// Returns and removes the oldest tracked key.
    ///
    /// Returns None if the registry is empty.
    pub fn evict_oldest(&mut self) -> Option<String> {
        self.keys.pop_front()
    }

    /// Like [`FetchRegistry::evict_oldest`], but never picks `keep`.
    ///
    /// Returns None when no other key is tracked.
    pub fn evict_oldest_except(&mut self, keep: &str) -> Option<String> {
        let position = self.keys.iter().position(|k| k != keep)?;
        self.keys.remove(position)
    }

    /// Empties the registry, returning its keys oldest first.
    pub fn drain(&mut self) -> Vec<String> {
        self.keys.drain(..).collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }
}
