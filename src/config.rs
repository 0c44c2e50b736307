//! Configuration Module
//!
//! Handles the per-instance engine configuration, loaded from defaults,
//! JSON or environment variables.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::models::{DataType, Method};

// == Expiration ==
/// Relative time-to-live applied when an entry is written.
///
/// Accepts a number of seconds, `0`, `false` or `"never"` when deserialized;
/// the last three all mean the entry never expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawExpiration", into = "RawExpiration")]
pub enum Expiration {
    /// Entry stays valid until removed
    #[default]
    Never,
    /// Entry expires this long after it was written
    After(Duration),
}

impl Expiration {
    /// Builds an expiration from whole seconds, `0` meaning never.
    pub fn from_secs(secs: u64) -> Self {
        if secs == 0 {
            Expiration::Never
        } else {
            Expiration::After(Duration::from_secs(secs))
        }
    }

    /// Returns the ttl in whole seconds, or None for [`Expiration::Never`].
    pub fn as_secs(&self) -> Option<u64> {
        match self {
            Expiration::Never => None,
            Expiration::After(ttl) => Some(ttl.as_secs()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawExpiration {
    Seconds(u64),
    Flag(bool),
    Text(String),
}

impl TryFrom<RawExpiration> for Expiration {
    type Error = String;

    fn try_from(raw: RawExpiration) -> std::result::Result<Self, Self::Error> {
        match raw {
            RawExpiration::Seconds(secs) => Ok(Expiration::from_secs(secs)),
            RawExpiration::Flag(false) => Ok(Expiration::Never),
            RawExpiration::Flag(true) => Err("expiration must be a number of seconds".to_string()),
            RawExpiration::Text(text) if text.eq_ignore_ascii_case("never") => {
                Ok(Expiration::Never)
            }
            RawExpiration::Text(text) => text
                .parse::<u64>()
                .map(Expiration::from_secs)
                .map_err(|_| format!("invalid expiration: {text}")),
        }
    }
}

impl From<Expiration> for RawExpiration {
    fn from(expiration: Expiration) -> Self {
        match expiration.as_secs() {
            Some(secs) => RawExpiration::Seconds(secs),
            None => RawExpiration::Flag(false),
        }
    }
}

// == Engine Config ==
/// Immutable configuration of one cache instance.
///
/// Per-request options fall back to these values when left unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Default resource locator, appended to `url_prefix`
    pub url: Option<String>,
    /// Domain or application location prepended to every url
    pub url_prefix: String,
    /// HTTP-style method used for remote fetches
    pub method: Method,
    /// How remote response bodies are interpreted
    pub data_type: DataType,
    /// Remote fetch timeout in seconds, 0 = none
    pub request_timeout: u64,
    /// Credentials forwarded to the remote collaborator
    pub username: Option<String>,
    pub password: Option<String>,
    /// Namespace prepended to every physical key
    pub storage_prefix: String,
    /// Storage budget in bytes handed to backends that enforce one
    pub storage_size: u64,
    /// Reserved key under which the fetch registry is persisted
    #[serde(alias = "fetchStack")]
    pub registry_key: String,
    /// Backend preference order, first available wins
    pub engine: Vec<String>,
    /// Schema version stamped on every entry
    pub version: String,
    /// Default time-to-live for new entries
    pub expiration: Expiration,
    /// Bypass local lookups entirely
    pub reset: bool,
    /// Write fetched results back to local storage
    pub persistent: bool,
}

impl EngineConfig {
    /// Creates a config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `OFFLINE_CACHE_URL_PREFIX` - Prefix for remote urls (default: empty)
    /// - `OFFLINE_CACHE_STORAGE_PREFIX` - Key namespace (default: OfflineCache)
    /// - `OFFLINE_CACHE_STORAGE_SIZE` - Storage budget in bytes (default: 100000)
    /// - `OFFLINE_CACHE_REGISTRY_KEY` - Registry key (default: FetchStack)
    /// - `OFFLINE_CACHE_ENGINE` - Comma separated backend preference
    /// - `OFFLINE_CACHE_VERSION` - Schema version (default: 1.0)
    /// - `OFFLINE_CACHE_EXPIRATION` - TTL in seconds or `never` (default: never)
    /// - `OFFLINE_CACHE_REQUEST_TIMEOUT` - Fetch timeout in seconds (default: 0)
    /// - `OFFLINE_CACHE_USERNAME` / `OFFLINE_CACHE_PASSWORD` - Credentials
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            url_prefix: env::var("OFFLINE_CACHE_URL_PREFIX").unwrap_or(defaults.url_prefix),
            storage_prefix: env::var("OFFLINE_CACHE_STORAGE_PREFIX")
                .unwrap_or(defaults.storage_prefix),
            storage_size: env::var("OFFLINE_CACHE_STORAGE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.storage_size),
            registry_key: env::var("OFFLINE_CACHE_REGISTRY_KEY").unwrap_or(defaults.registry_key),
            engine: env::var("OFFLINE_CACHE_ENGINE")
                .ok()
                .map(|v| {
                    v.split(',')
                        .map(|name| name.trim().to_string())
                        .filter(|name| !name.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.engine),
            version: env::var("OFFLINE_CACHE_VERSION").unwrap_or(defaults.version),
            expiration: env::var("OFFLINE_CACHE_EXPIRATION")
                .ok()
                .and_then(|v| Expiration::try_from(RawExpiration::Text(v)).ok())
                .unwrap_or(defaults.expiration),
            request_timeout: env::var("OFFLINE_CACHE_REQUEST_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.request_timeout),
            username: env::var("OFFLINE_CACHE_USERNAME").ok(),
            password: env::var("OFFLINE_CACHE_PASSWORD").ok(),
            ..defaults
        }
    }

    /// Parses a config from JSON, unset fields taking their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that would make the engine unusable.
    pub fn validate(&self) -> Result<()> {
        if self.storage_prefix.is_empty() {
            return Err(CacheError::Configuration(
                "storagePrefix cannot be empty".to_string(),
            ));
        }
        if self.registry_key.is_empty() {
            return Err(CacheError::Configuration(
                "registry key cannot be empty".to_string(),
            ));
        }
        if self.version.is_empty() {
            return Err(CacheError::Configuration(
                "version cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Remote fetch timeout, None when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        (self.request_timeout > 0).then(|| Duration::from_secs(self.request_timeout))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: None,
            url_prefix: String::new(),
            method: Method::Get,
            data_type: DataType::Json,
            request_timeout: 0,
            username: None,
            password: None,
            storage_prefix: "OfflineCache".to_string(),
            storage_size: 100_000,
            registry_key: "FetchStack".to_string(),
            engine: vec!["localDatabase".to_string(), "localStorage".to_string()],
            version: "1.0".to_string(),
            expiration: Expiration::Never,
            reset: false,
            persistent: true,
        }
    }
}
