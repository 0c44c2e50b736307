//! Request options for cache lookups and writes
//!
//! Every field is optional; unset fields fall back to the engine's
//! [`EngineConfig`](crate::config::EngineConfig).

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Expiration;
use crate::error::CacheError;

/// Hook fired once with the payload a `get` resolved to.
pub type SuccessHook = Arc<dyn Fn(&Value) + Send + Sync>;

/// Hook fired when the remote fallback fails.
pub type ErrorHook = Arc<dyn Fn(&CacheError) + Send + Sync>;

// == Method ==
/// HTTP-style method forwarded to the remote collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

// == Data Type ==
/// How a remote response body is turned into a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Body is parsed as JSON
    #[default]
    Json,
    /// Body is kept verbatim as a JSON string
    Text,
}

// == Request Options ==
/// Options for a single `get` or `set` call.
///
/// # Example
/// ```ignore
/// let options = RequestOptions::new()
///     .url("/users")
///     .ttl(Expiration::from_secs(60));
/// ```
#[derive(Clone, Default)]
pub struct RequestOptions {
    /// Resource locator, appended to the configured url prefix
    pub url: Option<String>,
    /// Explicit storage key, overrides the one derived from the url
    pub key: Option<String>,
    pub method: Option<Method>,
    /// Request payload sent to the remote source
    pub data: Option<Value>,
    pub data_type: Option<DataType>,
    /// Time-to-live override for the written entry
    pub ttl: Option<Expiration>,
    /// Schema version override
    pub version: Option<String>,
    /// Skip the local lookup
    pub reset: Option<bool>,
    /// Allow the remote fallback (default true)
    pub remote: Option<bool>,
    /// Write fetched payloads back to local storage
    pub persistent: Option<bool>,
    pub on_success: Option<SuccessHook>,
    pub on_error: Option<ErrorHook>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = Some(data_type);
        self
    }

    pub fn ttl(mut self, ttl: Expiration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn reset(mut self, reset: bool) -> Self {
        self.reset = Some(reset);
        self
    }

    pub fn remote(mut self, remote: bool) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = Some(persistent);
        self
    }

    pub fn on_success(mut self, hook: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(hook));
        self
    }

    pub fn on_error(mut self, hook: impl Fn(&CacheError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if matches!(&self.key, Some(key) if key.is_empty()) {
            return Some("Key cannot be empty".to_string());
        }
        if matches!(&self.version, Some(version) if version.is_empty()) {
            return Some("Version cannot be empty".to_string());
        }
        None
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("url", &self.url)
            .field("key", &self.key)
            .field("method", &self.method)
            .field("data", &self.data)
            .field("data_type", &self.data_type)
            .field("ttl", &self.ttl)
            .field("version", &self.version)
            .field("reset", &self.reset)
            .field("remote", &self.remote)
            .field("persistent", &self.persistent)
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}
