//! Observable state of a synchronized key.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::request::RequestError;

/// Lifecycle phase of a synchronized key.
///
/// Pending local edits are tracked separately by
/// [`SyncSnapshot::has_pending_sync`] and coexist with any phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
  /// Nothing loaded from cache or network yet
  Initial,
  /// Showing cached data
  Cached,
  /// A network fetch is in progress
  Fetching,
  /// Showing data confirmed by the network
  Fresh,
  /// The last fetch failed with no usable cache
  Error,
}

/// Everything a UI needs to render one synchronized key.
#[derive(Debug, Clone, Serialize)]
pub struct SyncSnapshot<T> {
  pub data: T,
  pub phase: SyncPhase,
  pub loading: bool,
  /// Last fetch failure; cleared by the next successful fetch
  #[serde(serialize_with = "display_error")]
  pub error: Option<RequestError>,
  /// Last sync failure; cleared by the next successful sync
  #[serde(serialize_with = "display_error")]
  pub sync_error: Option<RequestError>,
  pub is_from_cache: bool,
  pub has_pending_sync: bool,
  /// When the data was last confirmed by the network
  pub last_fetch_time: Option<DateTime<Utc>>,
}

impl<T> SyncSnapshot<T> {
  pub(crate) fn new(data: T) -> Self {
    Self {
      data,
      phase: SyncPhase::Initial,
      loading: false,
      error: None,
      sync_error: None,
      is_from_cache: false,
      has_pending_sync: false,
      last_fetch_time: None,
    }
  }

  pub fn is_loading(&self) -> bool {
    self.loading
  }

  pub fn is_error(&self) -> bool {
    matches!(self.phase, SyncPhase::Error)
  }

  /// Error message if the last fetch failed.
  pub fn error_message(&self) -> Option<String> {
    self.error.as_ref().map(|e| e.to_string())
  }
}

fn display_error<S: Serializer>(error: &Option<RequestError>, serializer: S) -> Result<S::Ok, S::Error> {
  match error {
    Some(e) => serializer.serialize_some(&e.to_string()),
    None => serializer.serialize_none(),
  }
}

/// Convert a cache timestamp into a fetch time.
pub(crate) fn fetch_time(timestamp_ms: i64) -> Option<DateTime<Utc>> {
  DateTime::from_timestamp_millis(timestamp_ms)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_new_snapshot_is_initial() {
    let snapshot = SyncSnapshot::new(json!([]));
    assert_eq!(snapshot.phase, SyncPhase::Initial);
    assert!(!snapshot.is_loading());
    assert!(!snapshot.is_error());
    assert_eq!(snapshot.error_message(), None);
  }

  #[test]
  fn test_snapshot_serializes_errors_as_text() {
    let mut snapshot = SyncSnapshot::new(json!({"v": 1}));
    snapshot.phase = SyncPhase::Error;
    snapshot.error = Some(RequestError::status(503, "maintenance"));
    snapshot.last_fetch_time = fetch_time(0);

    let value = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(value["phase"], "error");
    assert_eq!(value["error"], "server responded with 503: maintenance");
    assert_eq!(value["sync_error"], serde_json::Value::Null);
    assert!(value["last_fetch_time"].is_string());
  }
}
