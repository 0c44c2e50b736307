//! Key/Value Store Module
//!
//! A capacity-bounded string map standing in for the host's simple
//! key/value facility. Clones share the same underlying map.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use super::StoreError;
use crate::error::{CacheError, Result};

// == Store Stats ==
/// Operation counters of a [`KvStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KvStoreStats {
    /// Accepted writes
    pub writes: u64,
    /// Writes rejected for capacity
    pub rejected_writes: u64,
    pub reads: u64,
    pub removals: u64,
}

#[derive(Debug)]
struct KvInner {
    items: HashMap<String, String>,
    /// Bytes allowed across keys and values
    capacity: u64,
    /// Snapshot file rewritten after each mutation
    path: Option<PathBuf>,
    stats: KvStoreStats,
}

impl KvInner {
    fn used_bytes(&self) -> u64 {
        self.items
            .iter()
            .map(|(key, value)| item_size(key, value))
            .sum()
    }

    fn flush(&self) -> std::result::Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot =
            serde_json::to_string(&self.items).map_err(|e| StoreError::Backend(e.to_string()))?;
        fs::write(path, snapshot)
            .map_err(|e| StoreError::Backend(format!("{}: {}", path.display(), e)))
    }
}

fn item_size(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}

// == KV Store ==
/// Shared handle to a key/value store with a byte capacity.
#[derive(Debug, Clone)]
pub struct KvStore {
    inner: Arc<Mutex<KvInner>>,
}

impl KvStore {
    // == Constructor ==
    /// Creates an in-memory store holding at most `capacity` bytes.
    pub fn new(capacity: u64) -> Self {
        Self::from_inner(KvInner {
            items: HashMap::new(),
            capacity,
            path: None,
            stats: KvStoreStats::default(),
        })
    }

    /// Opens a store persisted as a JSON snapshot at `path`.
    ///
    /// A missing file starts an empty store; it is created on first write.
    pub fn open(path: impl AsRef<Path>, capacity: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let items = if path.exists() {
            let raw = fs::read_to_string(&path)
                .map_err(|e| CacheError::Storage(format!("{}: {}", path.display(), e)))?;
            serde_json::from_str(&raw)
                .map_err(|e| CacheError::Storage(format!("{}: {}", path.display(), e)))?
        } else {
            HashMap::new()
        };

        Ok(Self::from_inner(KvInner {
            items,
            capacity,
            path: Some(path),
            stats: KvStoreStats::default(),
        }))
    }

    fn from_inner(inner: KvInner) -> Self {
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    fn lock(&self) -> std::result::Result<MutexGuard<'_, KvInner>, StoreError> {
        self.inner
            .lock()
            .map_err(|e| StoreError::Backend(format!("store lock poisoned: {}", e)))
    }

    // == Set Item ==
    /// Stores a value, rejecting the write if it would exceed capacity.
    ///
    /// Replacing a key only counts the difference in size. A failed snapshot
    /// rewrite leaves the previous value in place.
    pub fn set_item(&self, key: &str, value: &str) -> std::result::Result<(), StoreError> {
        let mut inner = self.lock()?;

        let previous = inner
            .items
            .get(key)
            .map(|old| item_size(key, old))
            .unwrap_or(0);
        let needed = inner.used_bytes() - previous + item_size(key, value);

        if needed > inner.capacity {
            inner.stats.rejected_writes += 1;
            return Err(StoreError::QuotaExceeded);
        }

        let replaced = inner.items.insert(key.to_string(), value.to_string());
        if let Err(err) = inner.flush() {
            match replaced {
                Some(old) => inner.items.insert(key.to_string(), old),
                None => inner.items.remove(key),
            };
            return Err(err);
        }

        inner.stats.writes += 1;
        Ok(())
    }

    // == Get Item ==
    pub fn get_item(&self, key: &str) -> std::result::Result<Option<String>, StoreError> {
        let mut inner = self.lock()?;
        inner.stats.reads += 1;
        Ok(inner.items.get(key).cloned())
    }

    // == Remove Item ==
    /// Removes a key; removing an absent key is a no-op.
    ///
    /// The item is kept if the snapshot cannot be rewritten.
    pub fn remove_item(&self, key: &str) -> std::result::Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.stats.removals += 1;
        if let Some(old) = inner.items.remove(key) {
            if let Err(err) = inner.flush() {
                inner.items.insert(key.to_string(), old);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Changes the capacity; existing items are kept even if over budget.
    pub fn set_capacity(&self, capacity: u64) {
        if let Ok(mut inner) = self.lock() {
            inner.capacity = capacity;
        }
    }

    pub fn capacity(&self) -> u64 {
        self.lock().map(|inner| inner.capacity).unwrap_or(0)
    }

    pub fn used_bytes(&self) -> u64 {
        self.lock().map(|inner| inner.used_bytes()).unwrap_or(0)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock()
            .map(|inner| inner.items.contains_key(key))
            .unwrap_or(false)
    }

    /// Physical keys currently stored, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.lock()
            .map(|inner| inner.items.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|inner| inner.items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> KvStoreStats {
        self.lock().map(|inner| inner.stats).unwrap_or_default()
    }
}
