//! Stored unit of cached data and the result of reading it back.

use serde::{Deserialize, Serialize};

/// The envelope persisted under a cache key.
///
/// Serialized as `{ "data": .., "timestamp": .., "pendingChanges": .. }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEnvelope<T> {
  /// Last known payload (network or locally mutated)
  pub data: T,
  /// When `data` was last confirmed fresh or last mutated locally (ms epoch)
  pub timestamp: i64,
  /// True if `data` holds a local mutation the server hasn't confirmed
  #[serde(rename = "pendingChanges")]
  pub pending_sync: bool,
}

/// Result of a cache lookup, including staleness relative to the requested TTL.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedEntry<T> {
  pub envelope: CacheEnvelope<T>,
  pub is_stale: bool,
}

impl<T> CachedEntry<T> {
  /// Age of the entry at lookup time.
  pub fn age_ms(&self, now_ms: i64) -> i64 {
    now_ms.saturating_sub(self.envelope.timestamp)
  }

  pub fn into_data(self) -> T {
    self.envelope.data
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_envelope_wire_format() {
    let envelope = CacheEnvelope {
      data: json!({"v": 1}),
      timestamp: 1_700_000_000_000,
      pending_sync: true,
    };

    let value = serde_json::to_value(&envelope).unwrap();
    assert_eq!(
      value,
      json!({"data": {"v": 1}, "timestamp": 1_700_000_000_000i64, "pendingChanges": true})
    );
  }

  #[test]
  fn test_envelope_parses_stored_json() {
    let raw = r#"{"data":[1,2],"timestamp":5,"pendingChanges":false}"#;
    let envelope: CacheEnvelope<Vec<u32>> = serde_json::from_str(raw).unwrap();
    assert_eq!(envelope.data, vec![1, 2]);
    assert_eq!(envelope.timestamp, 5);
    assert!(!envelope.pending_sync);
  }
}
