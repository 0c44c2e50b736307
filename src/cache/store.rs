//! Cache Engine Module
//!
//! Ties local lookups to remote fallback: a valid local entry is served
//! directly, anything else is fetched remotely and written back. Writes
//! rejected for capacity evict the oldest tracked key and retry.

use std::collections::HashSet;
use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::entry::{self, current_timestamp, DecodeError};
use crate::cache::{CacheStats, FetchRegistry, MAX_WRITE_ATTEMPTS};
use crate::config::{EngineConfig, Expiration};
use crate::error::{CacheError, Result};
use crate::models::RequestOptions;
use crate::remote::{DynFetcher, FetchRequest};
use crate::storage::{EngineKind, HostStorage, StorageEngine, StoreError};

// == Cache ==
/// Offline-first read-through cache.
///
/// One instance owns its backend and registry; operations take `&mut self`
/// so writes within a call chain are strictly sequential.
pub struct Cache {
    config: EngineConfig,
    /// None when no backend passed its availability test
    engine: Option<StorageEngine>,
    registry: FetchRegistry,
    fetcher: Option<DynFetcher>,
    stats: CacheStats,
}

impl Cache {
    // == Constructor ==
    /// Selects a backend, connects it and loads the fetch registry.
    ///
    /// # Arguments
    /// * `config` - Instance configuration
    /// * `host` - Storage facilities the host provides
    /// * `fetcher` - Remote collaborator used on local misses
    ///
    /// Fails on an unknown backend name or a failed database migration.
    /// A host without any usable facility is not an error: every lookup then
    /// goes straight to the remote source.
    pub async fn new(
        config: EngineConfig,
        host: HostStorage,
        fetcher: Option<DynFetcher>,
    ) -> Result<Self> {
        config.validate()?;
        let engine = StorageEngine::select(&config, &host).await?;

        let mut cache = Self {
            config,
            engine,
            registry: FetchRegistry::new(),
            fetcher,
            stats: CacheStats::new(),
        };
        cache.load_registry().await;

        Ok(cache)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The selected backend, if any.
    pub fn engine_kind(&self) -> Option<EngineKind> {
        self.engine.as_ref().map(StorageEngine::kind)
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.clone()
    }

    /// Keys currently tracked by the registry, oldest first.
    pub fn tracked_keys(&self) -> Vec<String> {
        self.registry.keys().cloned().collect()
    }

    // == Get ==
    /// Resolves a resource from local storage or, failing that, remotely.
    ///
    /// Expired, outdated and malformed entries are purged and treated as
    /// misses. A remotely fetched payload is written back before it is
    /// returned. The success hook fires once with the resolved payload; the
    /// error hook fires only for remote failures.
    pub async fn get(&mut self, options: &RequestOptions) -> Result<Value> {
        if let Some(message) = options.validate() {
            return Err(CacheError::Configuration(message));
        }

        if let Some(payload) = self.lookup_local(options).await? {
            self.stats.record_hit();
            debug!("Hit rate {:.2}", self.stats.hit_rate());
            if let Some(hook) = &options.on_success {
                hook(&payload);
            }
            return Ok(payload);
        }
        self.stats.record_miss();

        match self.fetch_remote(options).await {
            Ok(payload) => {
                if let Some(hook) = &options.on_success {
                    hook(&payload);
                }
                Ok(payload)
            }
            Err(err) => {
                if err.is_remote() {
                    if let Some(hook) = &options.on_error {
                        hook(&err);
                    }
                }
                Err(err)
            }
        }
    }

    /// [`Cache::get`] followed by deserialization into `T`.
    pub async fn get_as<T: DeserializeOwned>(&mut self, options: &RequestOptions) -> Result<T> {
        let payload = self.get(options).await?;
        Ok(serde_json::from_value(payload)?)
    }

    // == Set ==
    /// Stores a payload under the key derived from `options`.
    ///
    /// Requires a selected backend. A write rejected for capacity evicts the
    /// oldest tracked key and retries, up to [`MAX_WRITE_ATTEMPTS`] writes.
    pub async fn set(&mut self, payload: &Value, options: &RequestOptions) -> Result<()> {
        if self.engine.is_none() {
            return Err(CacheError::NoStorageEngine);
        }
        if let Some(message) = options.validate() {
            return Err(CacheError::Configuration(message));
        }

        let key = self.storage_key(options)?;
        self.write(&key, payload, options).await
    }

    // == Destroy ==
    /// Purges tracked entries.
    ///
    /// Without a version every key in the current registry is removed. With
    /// a version, the registry snapshot written under that version is read
    /// and the keys it lists are removed instead. Absent keys are ignored.
    ///
    /// A key the backend fails to remove stays tracked; the first such
    /// failure is returned once every other key has been handled.
    pub async fn destroy(&mut self, version: Option<&str>) -> Result<()> {
        let keys = match version {
            None => self.registry.drain(),
            Some(version) => {
                let keys = self.registry_snapshot(version).await;
                for key in &keys {
                    self.registry.remove(key);
                }
                keys
            }
        };

        let Some(engine) = &self.engine else {
            return Ok(());
        };

        let mut seen = HashSet::new();
        let mut removed = 0;
        let mut first_error = None;
        for key in keys {
            if !seen.insert(key.clone()) {
                continue;
            }
            match engine.remove(&key).await {
                Ok(()) => removed += 1,
                Err(err) => {
                    warn!("Could not remove {}, keeping it tracked: {}", key, err);
                    self.registry.register(&key);
                    first_error.get_or_insert(err);
                }
            }
        }

        self.stats.record_purged(removed);
        info!("Destroyed {} cached entries", removed);

        self.sync_registry().await;
        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    // == Storage Key ==
    /// The explicit key, or one derived from the prefixed url.
    pub fn storage_key(&self, options: &RequestOptions) -> Result<String> {
        if let Some(key) = &options.key {
            return Ok(key.clone());
        }

        self.resolve_url(options)
            .map(|url| key_from_url(&url))
            .ok_or_else(|| CacheError::Configuration("a key or url is required".to_string()))
    }

    fn resolve_url(&self, options: &RequestOptions) -> Option<String> {
        options
            .url
            .as_ref()
            .or(self.config.url.as_ref())
            .map(|url| format!("{}{}", self.config.url_prefix, url))
    }

    fn version_for(&self, options: &RequestOptions) -> String {
        options
            .version
            .clone()
            .unwrap_or_else(|| self.config.version.clone())
    }

    fn is_registry_key(&self, key: &str) -> bool {
        key == self.config.registry_key
    }

    // == Local Lookup ==
    async fn lookup_local(&mut self, options: &RequestOptions) -> Result<Option<Value>> {
        let Some(engine) = &self.engine else {
            return Ok(None);
        };
        if options.reset.unwrap_or(self.config.reset) {
            debug!("Local lookup bypassed");
            return Ok(None);
        }

        let key = self.storage_key(options)?;
        let blob = match engine.get(&key).await {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                debug!("Miss for {}", key);
                return Ok(None);
            }
            Err(err) => {
                warn!("Reading {} failed, treating as a miss: {}", key, err);
                return Ok(None);
            }
        };

        let version = self.version_for(options);
        match entry::decode(&blob, &version, current_timestamp()) {
            Ok(payload) => {
                debug!("Hit for {}", key);
                Ok(Some(payload))
            }
            Err(DecodeError::VersionMismatch { found, expected }) => {
                warn!(
                    "Entry {} has version {}, expected {}: purging all tracked entries",
                    key, found, expected
                );
                self.discard(&key).await;
                if let Err(err) = self.destroy(None).await {
                    warn!("Purge after version change failed: {}", err);
                }
                Ok(None)
            }
            Err(err) => {
                debug!("Discarding {}: {}", key, err);
                self.discard(&key).await;
                Ok(None)
            }
        }
    }

    /// Removes one unusable entry from the backend and the registry.
    async fn discard(&mut self, key: &str) {
        if let Some(engine) = &self.engine {
            if let Err(err) = engine.remove(key).await {
                warn!("Could not remove {}: {}", key, err);
                return;
            }
        }
        self.stats.record_purged(1);

        if self.registry.contains(key) {
            self.registry.remove(key);
            self.sync_registry().await;
        }
    }

    // == Remote Fallback ==
    async fn fetch_remote(&mut self, options: &RequestOptions) -> Result<Value> {
        let url = self
            .resolve_url(options)
            .ok_or_else(|| CacheError::NoRemote("no url configured".to_string()))?;
        if !options.remote.unwrap_or(true) {
            return Err(CacheError::NoRemote(format!(
                "remote access disabled for {}",
                url
            )));
        }
        let fetcher = self
            .fetcher
            .clone()
            .ok_or_else(|| CacheError::NoRemote("no remote fetcher configured".to_string()))?;
        if !fetcher.is_online() {
            return Err(CacheError::NoRemote(format!("offline, cannot fetch {}", url)));
        }

        let request = FetchRequest {
            url,
            method: options.method.unwrap_or(self.config.method),
            data: options.data.clone(),
            data_type: options.data_type.unwrap_or(self.config.data_type),
            timeout: self.config.timeout(),
            username: self.config.username.clone(),
            password: self.config.password.clone(),
        };

        self.stats.record_remote_fetch();
        debug!("Fetching {} from remote", request.url);
        let payload = fetcher.fetch(&request).await?;

        if self.engine.is_some() && options.persistent.unwrap_or(self.config.persistent) {
            let key = self.storage_key(options)?;
            if !self.is_registry_key(&key) {
                self.write(&key, &payload, options).await?;
            }
        }

        Ok(payload)
    }

    // == Write Path ==
    /// Stores an entry, then tracks its key and persists the registry.
    ///
    /// An entry whose key cannot be tracked for lack of space is removed
    /// again, so the backend never holds untracked entries.
    async fn write(&mut self, key: &str, payload: &Value, options: &RequestOptions) -> Result<()> {
        let ttl = options.ttl.unwrap_or(self.config.expiration);
        let version = self.version_for(options);
        let blob = entry::encode(payload, ttl, &version, current_timestamp())?;

        let evictions = self.stats.evictions;
        if let Err(err) = self.put_with_eviction(key, None, |_| Ok(blob.clone())).await {
            if self.stats.evictions != evictions {
                self.sync_registry().await;
            }
            return Err(err);
        }

        if self.is_registry_key(key) {
            return Ok(());
        }
        self.registry.register(key);

        match self.persist_registry(key).await {
            Ok(()) => Ok(()),
            Err(CacheError::RegistryExhausted(_)) => {
                warn!("No room left to track {}, rolling the write back", key);
                self.roll_back(key).await;
                Err(CacheError::RegistryExhausted(key.to_string()))
            }
            Err(err @ CacheError::QuotaExceeded { .. }) => {
                warn!("No room left to track {}, rolling the write back: {}", key, err);
                self.roll_back(key).await;
                Err(err)
            }
            Err(err) => {
                warn!("Could not persist the fetch registry: {}", err);
                Ok(())
            }
        }
    }

    /// Puts a blob, evicting the oldest tracked key after each rejection.
    ///
    /// `encode` runs before every attempt, so a blob built from the registry
    /// never lists a key evicted by an earlier attempt. `keep` is never
    /// evicted.
    async fn put_with_eviction<F>(&mut self, key: &str, keep: Option<&str>, encode: F) -> Result<()>
    where
        F: Fn(&FetchRegistry) -> serde_json::Result<String>,
    {
        let engine = self.engine.as_ref().ok_or(CacheError::NoStorageEngine)?;

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let blob = encode(&self.registry)?;
            match engine.put(key, &blob).await {
                Ok(()) => return Ok(()),
                Err(StoreError::QuotaExceeded) if attempt < MAX_WRITE_ATTEMPTS => {
                    let evicted = match keep {
                        Some(keep) => self.registry.evict_oldest_except(keep),
                        None => self.registry.evict_oldest(),
                    };
                    let Some(oldest) = evicted else {
                        return Err(CacheError::RegistryExhausted(key.to_string()));
                    };
                    debug!("Quota exceeded writing {}, evicting {}", key, oldest);
                    engine.remove(&oldest).await?;
                    self.stats.record_eviction();
                }
                Err(StoreError::QuotaExceeded) => break,
                Err(StoreError::Backend(message)) => return Err(CacheError::Storage(message)),
            }
        }

        Err(CacheError::QuotaExceeded {
            key: key.to_string(),
            attempts: MAX_WRITE_ATTEMPTS,
        })
    }

    /// Forgets a stored entry whose key could not be tracked.
    async fn roll_back(&mut self, key: &str) {
        self.registry.remove(key);
        if let Some(engine) = &self.engine {
            if let Err(err) = engine.remove(key).await {
                warn!("Could not remove untracked {}: {}", key, err);
            }
        }
        self.sync_registry().await;
    }

    // == Registry Persistence ==
    /// Writes the registry after `added` was registered, evicting older
    /// keys if it does not fit.
    async fn persist_registry(&mut self, added: &str) -> Result<()> {
        let key = self.config.registry_key.clone();
        let version = self.config.version.clone();

        self.put_with_eviction(&key, Some(added), |registry| {
            encode_registry(registry, &version)
        })
        .await
    }

    /// Rewrites the registry after keys were dropped from it, without
    /// evicting anything. Failures are only logged.
    async fn sync_registry(&self) {
        let Some(engine) = &self.engine else {
            return;
        };

        let result = match encode_registry(&self.registry, &self.config.version) {
            Ok(blob) => engine
                .put(&self.config.registry_key, &blob)
                .await
                .map_err(CacheError::from),
            Err(err) => Err(err.into()),
        };
        if let Err(err) = result {
            warn!("Could not persist the fetch registry: {}", err);
        }
    }

    /// Keys listed by the registry snapshot stored under `version`.
    async fn registry_snapshot(&self, version: &str) -> Vec<String> {
        let Some(engine) = &self.engine else {
            return Vec::new();
        };
        let Ok(Some(blob)) = engine.get(&self.config.registry_key).await else {
            return Vec::new();
        };

        entry::decode(&blob, version, current_timestamp())
            .ok()
            .and_then(|snapshot| serde_json::from_value(snapshot).ok())
            .unwrap_or_default()
    }

    async fn load_registry(&mut self) {
        let Some(engine) = &self.engine else {
            return;
        };

        let blob = match engine.get(&self.config.registry_key).await {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                debug!("No fetch registry stored, starting empty");
                return;
            }
            Err(err) => {
                warn!("Could not read the fetch registry, starting empty: {}", err);
                return;
            }
        };

        match entry::decode(&blob, &self.config.version, current_timestamp()) {
            Ok(snapshot) => match serde_json::from_value::<FetchRegistry>(snapshot) {
                Ok(registry) => {
                    debug!("Loaded fetch registry with {} keys", registry.len());
                    self.registry = registry;
                }
                Err(err) => warn!("Ignoring unreadable fetch registry: {}", err),
            },
            Err(DecodeError::VersionMismatch { found, .. }) => {
                info!("Fetch registry written by version {}, purging its entries", found);
                if let Err(err) = self.destroy(Some(&found)).await {
                    warn!("Could not purge entries of version {}: {}", found, err);
                }
            }
            Err(err) => warn!("Ignoring unreadable fetch registry: {}", err),
        }
    }
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("config", &self.config)
            .field("engine", &self.engine)
            .field("registry", &self.registry)
            .field("fetcher", &self.fetcher.is_some())
            .field("stats", &self.stats)
            .finish()
    }
}

/// Wraps the registry in a never-expiring envelope.
fn encode_registry(registry: &FetchRegistry, version: &str) -> serde_json::Result<String> {
    let snapshot = serde_json::to_value(registry)?;
    entry::encode(&snapshot, Expiration::Never, version, current_timestamp())
}

// == Key Derivation ==
/// Turns a resource locator into a key-safe token.
///
/// Every run of characters other than ASCII letters, digits and spaces
/// becomes a single `-`.
pub fn key_from_url(url: &str) -> String {
    let mut key = String::with_capacity(url.len());
    let mut in_run = false;

    for c in url.chars() {
        if c.is_ascii_alphanumeric() || c == ' ' {
            key.push(c);
            in_run = false;
        } else if !in_run {
            key.push('-');
            in_run = true;
        }
    }

    key
}
