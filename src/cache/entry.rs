//! Cache Entry Module
//!
//! The stored envelope `{expiration, payload, version}` and its codec.
//! Expiration and version are only checked when an entry is read.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::Expiration;

// == Decode Error ==
/// Reasons a stored blob cannot be served.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("entry expired")]
    Expired,

    /// Written under another schema version; invalidates the whole cache
    #[error("entry version {found} does not match {expected}")]
    VersionMismatch { found: String, expected: String },

    #[error("malformed entry: {0}")]
    Malformed(String),
}

// == Cache Entry ==
/// A payload with its expiration and schema version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Expiration timestamp (Unix seconds), None = no expiration
    #[serde(with = "expiration_stamp")]
    pub expiration: Option<i64>,
    /// The cached value
    pub payload: Value,
    /// Schema version the entry was written under
    pub version: String,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates an entry expiring `ttl` after `now`.
    ///
    /// # Arguments
    /// * `payload` - The value to store
    /// * `ttl` - Relative time-to-live, [`Expiration::Never`] passes through
    /// * `version` - Schema version stamped on the entry
    /// * `now` - Current Unix timestamp in seconds
    pub fn new(payload: Value, ttl: Expiration, version: impl Into<String>, now: i64) -> Self {
        let expiration = ttl
            .as_secs()
            .map(|secs| now.saturating_add(i64::try_from(secs).unwrap_or(i64::MAX)));

        Self {
            expiration,
            payload,
            version: version.into(),
        }
    }

    // == Is Expired ==
    /// An entry is expired once its expiration lies strictly in the past.
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expiration, Some(expiration) if expiration < now)
    }

    /// Serializes the entry for storage.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// == Codec ==
/// Wraps a payload with its metadata and serializes it.
pub fn encode(
    payload: &Value,
    ttl: Expiration,
    version: &str,
    now: i64,
) -> serde_json::Result<String> {
    CacheEntry::new(payload.clone(), ttl, version, now).encode()
}

/// Validates a stored blob and returns its payload.
///
/// The version is checked before expiration: a version change purges more
/// than a single expired entry would.
pub fn decode(blob: &str, expected_version: &str, now: i64) -> Result<Value, DecodeError> {
    let entry: CacheEntry =
        serde_json::from_str(blob).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    if entry.version != expected_version {
        return Err(DecodeError::VersionMismatch {
            found: entry.version,
            expected: expected_version.to_string(),
        });
    }

    if entry.is_expired(now) {
        return Err(DecodeError::Expired);
    }

    Ok(entry.payload)
}

// == Utility Functions ==
/// Returns current Unix timestamp in seconds.
pub fn current_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// `false` for "never", otherwise the timestamp as a number.
mod expiration_stamp {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Stamp {
        At(i64),
        Never(bool),
    }

    pub fn serialize<S: Serializer>(value: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(at) => Stamp::At(*at),
            None => Stamp::Never(false),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
        match Stamp::deserialize(deserializer)? {
            Stamp::At(at) => Ok(Some(at)),
            Stamp::Never(false) => Ok(None),
            Stamp::Never(true) => Err(serde::de::Error::custom(
                "expiration must be a timestamp or false",
            )),
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn test_entry_creation_no_ttl() {
        let entry = CacheEntry::new(json!({"x": 1}), Expiration::Never, "1.0", NOW);

        assert_eq!(entry.payload, json!({"x": 1}));
        assert!(entry.expiration.is_none());
        assert!(!entry.is_expired(NOW + 1_000_000));
    }

    #[test]
    fn test_entry_creation_with_ttl() {
        let entry = CacheEntry::new(json!("v"), Expiration::from_secs(60), "1.0", NOW);

        assert_eq!(entry.expiration, Some(NOW + 60));
        assert!(!entry.is_expired(NOW + 60));
    }

    #[test]
    fn test_expiration_boundary_condition() {
        let entry = CacheEntry::new(json!("v"), Expiration::from_secs(1), "1.0", NOW);

        // Still valid on the expiration second itself
        assert!(!entry.is_expired(NOW + 1));
        assert!(entry.is_expired(NOW + 2));
    }

    #[test]
    fn test_envelope_format() {
        let blob = encode(&json!([1, 2]), Expiration::Never, "1.0", NOW).unwrap();
        let raw: Value = serde_json::from_str(&blob).unwrap();

        assert_eq!(raw["expiration"], json!(false));
        assert_eq!(raw["payload"], json!([1, 2]));
        assert_eq!(raw["version"], json!("1.0"));

        let blob = encode(&json!(null), Expiration::from_secs(5), "1.0", NOW).unwrap();
        let raw: Value = serde_json::from_str(&blob).unwrap();
        assert_eq!(raw["expiration"], json!(NOW + 5));
    }

    #[test]
    fn test_decode_valid() {
        let blob = encode(&json!({"y": 2}), Expiration::from_secs(10), "1.0", NOW).unwrap();
        assert_eq!(decode(&blob, "1.0", NOW + 5).unwrap(), json!({"y": 2}));
    }

    #[test]
    fn test_decode_expired() {
        let blob = encode(&json!(1), Expiration::from_secs(1), "1.0", NOW).unwrap();
        assert_eq!(decode(&blob, "1.0", NOW + 2), Err(DecodeError::Expired));
    }

    #[test]
    fn test_decode_version_mismatch() {
        let blob = encode(&json!(1), Expiration::Never, "1.0", NOW).unwrap();

        assert_eq!(
            decode(&blob, "2.0", NOW),
            Err(DecodeError::VersionMismatch {
                found: "1.0".to_string(),
                expected: "2.0".to_string(),
            })
        );
    }

    #[test]
    fn test_decode_checks_version_before_expiration() {
        let blob = encode(&json!(1), Expiration::from_secs(1), "1.0", NOW).unwrap();
        assert!(matches!(
            decode(&blob, "2.0", NOW + 10),
            Err(DecodeError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_malformed() {
        for blob in ["", "not json", r#"{"payload": 1}"#, r#"{"expiration": true, "payload": 1, "version": "1.0"}"#] {
            assert!(
                matches!(decode(blob, "1.0", NOW), Err(DecodeError::Malformed(_))),
                "blob {blob:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_decode_accepts_hand_written_envelope() {
        let blob = r#"{"expiration": false, "payload": {"x": 1}, "version": "1.0"}"#;
        assert_eq!(decode(blob, "1.0", NOW).unwrap(), json!({"x": 1}));
    }

    #[test]
    fn test_current_timestamp_is_recent() {
        assert!(current_timestamp() > NOW);
    }
}
