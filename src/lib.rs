//! Offline Cache - an offline-first read-through cache
//!
//! Serves named resources from a local store when a valid, unexpired copy
//! of the current schema version exists, and otherwise fetches them from a
//! remote source and writes them back. Space is reclaimed by evicting the
//! oldest writes first.

pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod remote;
pub mod storage;

pub use cache::Cache;
pub use config::{EngineConfig, Expiration};
pub use error::{CacheError, Result};
pub use models::RequestOptions;
pub use remote::{Fetcher, HttpFetcher};
pub use storage::{DatabaseLocation, HostStorage, KvStore};
