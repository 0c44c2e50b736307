//! Storage Module
//!
//! Uniform put/get/remove over the storage facilities a host provides.
//! The backend is picked once, at engine construction, from the configured
//! preference order.

mod kv;
mod sqlite;

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{CacheError, Result};

pub use kv::{KvStore, KvStoreStats};
pub use sqlite::{DatabaseLocation, SqliteBackend, LAYOUT_VERSION};

// == Store Error ==
/// Failure of a single backend operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The write would exceed the backend's capacity
    #[error("quota exceeded")]
    QuotaExceeded,

    #[error("{0}")]
    Backend(String),
}

impl From<StoreError> for CacheError {
    fn from(err: StoreError) -> Self {
        CacheError::Storage(err.to_string())
    }
}

// == Engine Kind ==
/// The closed set of supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    /// Transactional SQL store
    LocalDatabase,
    /// Persistent key/value store
    LocalStorage,
    /// Key/value store scoped to the current session
    SessionStorage,
}

impl EngineKind {
    pub fn name(&self) -> &'static str {
        match self {
            EngineKind::LocalDatabase => "localDatabase",
            EngineKind::LocalStorage => "localStorage",
            EngineKind::SessionStorage => "sessionStorage",
        }
    }

    /// Reports whether the host provides the facility this backend needs.
    pub fn test(&self, host: &HostStorage) -> bool {
        match self {
            EngineKind::LocalDatabase => host.database.is_some(),
            EngineKind::LocalStorage => host.local.is_some(),
            EngineKind::SessionStorage => host.session.is_some(),
        }
    }

    /// Parses a whole preference list, failing on the first unknown name.
    pub fn parse_preferences(names: &[String]) -> Result<Vec<EngineKind>> {
        names.iter().map(|name| name.parse()).collect()
    }
}

impl FromStr for EngineKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "localDatabase" => Ok(EngineKind::LocalDatabase),
            "localStorage" => Ok(EngineKind::LocalStorage),
            "sessionStorage" => Ok(EngineKind::SessionStorage),
            other => Err(CacheError::UnknownEngine(other.to_string())),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// == Host Storage ==
/// Storage facilities made available by the host.
///
/// A missing facility makes the matching backend fail its availability test.
#[derive(Debug, Clone, Default)]
pub struct HostStorage {
    pub local: Option<KvStore>,
    pub session: Option<KvStore>,
    pub database: Option<DatabaseLocation>,
}

impl HostStorage {
    /// A host without any storage facility.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_local(mut self, store: KvStore) -> Self {
        self.local = Some(store);
        self
    }

    pub fn with_session(mut self, store: KvStore) -> Self {
        self.session = Some(store);
        self
    }

    pub fn with_database(mut self, location: DatabaseLocation) -> Self {
        self.database = Some(location);
        self
    }
}

#[derive(Debug)]
enum Backend {
    Local(KvStore),
    Session(KvStore),
    Database(SqliteBackend),
}

// == Storage Engine ==
/// The selected backend plus the namespace applied to every key.
#[derive(Debug)]
pub struct StorageEngine {
    backend: Backend,
    prefix: String,
}

impl StorageEngine {
    /// Selects and connects the first available backend in preference order.
    ///
    /// Returns `Ok(None)` when no backend is available. Unknown names fail
    /// even if an earlier preference would have matched.
    pub async fn select(config: &EngineConfig, host: &HostStorage) -> Result<Option<Self>> {
        let preferences = EngineKind::parse_preferences(&config.engine)?;

        let Some(kind) = preferences.into_iter().find(|kind| kind.test(host)) else {
            info!("No storage engine available, serving from remote only");
            return Ok(None);
        };

        let backend = match kind {
            EngineKind::LocalDatabase => {
                let location = host.database.clone().ok_or(CacheError::NoStorageEngine)?;
                Backend::Database(
                    SqliteBackend::connect(location, &config.storage_prefix, config.storage_size)
                        .await?,
                )
            }
            EngineKind::LocalStorage => {
                Backend::Local(host.local.clone().ok_or(CacheError::NoStorageEngine)?)
            }
            EngineKind::SessionStorage => {
                Backend::Session(host.session.clone().ok_or(CacheError::NoStorageEngine)?)
            }
        };

        info!("Storage engine selected: {}", kind);
        Ok(Some(Self {
            backend,
            prefix: config.storage_prefix.clone(),
        }))
    }

    pub fn kind(&self) -> EngineKind {
        match self.backend {
            Backend::Local(_) => EngineKind::LocalStorage,
            Backend::Session(_) => EngineKind::SessionStorage,
            Backend::Database(_) => EngineKind::LocalDatabase,
        }
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Writes a blob, replacing any previous value under the key.
    pub async fn put(&self, key: &str, blob: &str) -> std::result::Result<(), StoreError> {
        let key = self.namespaced(key);
        match &self.backend {
            Backend::Local(store) | Backend::Session(store) => store.set_item(&key, blob),
            Backend::Database(db) => db.put(&key, blob).await,
        }
    }

    /// Reads a blob; absence is `Ok(None)`.
    pub async fn get(&self, key: &str) -> std::result::Result<Option<String>, StoreError> {
        let key = self.namespaced(key);
        match &self.backend {
            Backend::Local(store) | Backend::Session(store) => store.get_item(&key),
            Backend::Database(db) => db.get(&key).await,
        }
    }

    /// Deletes a key; absent keys are not an error.
    pub async fn remove(&self, key: &str) -> std::result::Result<(), StoreError> {
        debug!("Removing {}", key);
        let key = self.namespaced(key);
        match &self.backend {
            Backend::Local(store) | Backend::Session(store) => store.remove_item(&key),
            Backend::Database(db) => db.remove(&key).await,
        }
    }
}
