//! Cache Module
//!
//! The read-through cache engine: entry codec, fetch registry and the
//! get/set/destroy control flow.

mod entry;
mod registry;
mod stats;
mod store;


// Re-export public types
pub use entry::{current_timestamp, decode, encode, CacheEntry, DecodeError};
pub use registry::FetchRegistry;
pub use stats::CacheStats;
pub use store::{key_from_url, Cache};

// == Public Constants ==
/// Writes attempted before a quota rejection becomes fatal
pub const MAX_WRITE_ATTEMPTS: usize = 5;
