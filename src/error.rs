//! Error types for the offline cache
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

use crate::remote::FetchError;

// == Cache Error Enum ==
/// Unrecoverable or caller-visible failures of the cache engine.
///
/// Expired, version-mismatched and malformed entries never show up here:
/// the engine absorbs them as misses and falls back to the remote source.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Invalid options (no key and no url, unusable values, ...)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A backend name in the preference list is not recognized
    #[error("Unknown storage engine: {0}")]
    UnknownEngine(String),

    /// `set` was called but no backend passed its availability test
    #[error("Can't store data without a storage engine")]
    NoStorageEngine,

    /// The backend kept rejecting the write after every eviction attempt
    #[error("Could not store value of {key}: quota exceeded after {attempts} attempts")]
    QuotaExceeded { key: String, attempts: usize },

    /// The backend rejected the write and the registry has nothing left to evict
    #[error("Could not store value of {0}: nothing left to evict")]
    RegistryExhausted(String),

    /// The transactional backend could not be brought to the current schema
    #[error("Could not migrate the database: {0}")]
    Migration(String),

    /// Genuine backend failure (I/O, SQL, poisoned lock)
    #[error("Storage error: {0}")]
    Storage(String),

    /// The remote collaborator reported a failure
    #[error("Remote fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Local miss and no way to reach the remote source
    #[error("Resource unavailable: {0}")]
    NoRemote(String),

    /// Payload could not be serialized or converted
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    /// Returns true for errors that come from the remote fallback path.
    ///
    /// These are the only errors routed to a request's error hook.
    pub fn is_remote(&self) -> bool {
        matches!(self, CacheError::Fetch(_) | CacheError::NoRemote(_))
    }
}

// == Result Type Alias ==
/// Convenience Result type for the offline cache.
pub type Result<T> = std::result::Result<T, CacheError>;
