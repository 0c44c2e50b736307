//! Request models for the offline cache
//!
//! Per-call options and the small value types shared with the engine
//! configuration.

pub mod requests;

// Re-export commonly used types
pub use requests::{DataType, ErrorHook, Method, RequestOptions, SuccessHook};
