//! Remote Module
//!
//! The remote collaborator consulted on a local miss. The engine only sees
//! success or failure; transport details stay behind [`Fetcher`].

mod http;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::models::{DataType, Method};

pub use http::HttpFetcher;

// == Fetch Request ==
/// A fully resolved remote request.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    /// Absolute locator (url prefix already applied)
    pub url: String,
    pub method: Method,
    /// Request payload, sent as query pairs for GET
    pub data: Option<Value>,
    pub data_type: DataType,
    pub timeout: Option<Duration>,
    pub username: Option<String>,
    pub password: Option<String>,
}

// == Fetch Error ==
/// Failure reported by the remote collaborator.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("remote responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("could not decode response: {0}")]
    Decode(String),
}

// == Fetcher ==
/// Performs the transfer for a [`FetchRequest`].
///
/// Invoked at most once per cache miss; the engine never retries.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches the resource and returns its payload.
    async fn fetch(&self, request: &FetchRequest) -> Result<Value, FetchError>;

    /// Reports whether connectivity is believed to be available.
    ///
    /// When false the engine fails the fallback without calling `fetch`.
    fn is_online(&self) -> bool {
        true
    }
}

/// Shared handle to any fetcher.
pub type DynFetcher = Arc<dyn Fetcher>;
