//! TTL-aware offline cache of envelopes over a key/value store.

use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::envelope::{CacheEnvelope, CachedEntry};
use super::storage::KeyValueStore;
use crate::clock::{Clock, SystemClock};

/// Default time before a cached entry is considered stale.
pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(60 * 60);

/// Best-effort cache of `CacheEnvelope`s.
///
/// Reads and writes never fail: storage and serialization errors are logged and
/// treated as a miss (on read) or dropped (on write).
#[derive(Clone)]
pub struct OfflineCache {
  storage: Arc<dyn KeyValueStore>,
  clock: Arc<dyn Clock>,
}

impl OfflineCache {
  /// Create a new cache over the given storage backend.
  pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
    Self {
      storage,
      clock: Arc::new(SystemClock),
    }
  }

  /// Replace the clock used for timestamps and staleness.
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// The underlying key/value store.
  pub fn storage(&self) -> &Arc<dyn KeyValueStore> {
    &self.storage
  }

  pub fn now_ms(&self) -> i64 {
    self.clock.now_ms()
  }

  /// Load the envelope stored under `key`.
  ///
  /// Returns `None` when nothing is stored or the stored value can't be read.
  /// An entry is stale when its age is strictly greater than `stale_time`.
  pub fn load<T: DeserializeOwned>(&self, key: &str, stale_time: Duration) -> Option<CachedEntry<T>> {
    let raw = match self.storage.get(key) {
      Ok(Some(raw)) => raw,
      Ok(None) => {
        debug!(key, "cache miss");
        return None;
      }
      Err(e) => {
        warn!(key, error = %e, "cache read failed, treating as miss");
        return None;
      }
    };

    let envelope: CacheEnvelope<T> = match serde_json::from_str(&raw) {
      Ok(envelope) => envelope,
      Err(e) => {
        warn!(key, error = %e, "unreadable cache entry, treating as miss");
        return None;
      }
    };

    let age = self.clock.now_ms().saturating_sub(envelope.timestamp);
    let is_stale = age > i64::try_from(stale_time.as_millis()).unwrap_or(i64::MAX);
    debug!(key, age_ms = age, is_stale, "cache hit");

    Some(CachedEntry { envelope, is_stale })
  }

  /// Overwrite the envelope under `key` with `timestamp = now`.
  pub fn save<T: Serialize>(&self, key: &str, data: &T, pending_sync: bool) {
    let envelope = CacheEnvelope {
      data,
      timestamp: self.clock.now_ms(),
      pending_sync,
    };
    self.write(key, &envelope);
  }

  /// Write a complete envelope, keeping its timestamp.
  pub fn write<T: Serialize>(&self, key: &str, envelope: &CacheEnvelope<T>) {
    let raw = match serde_json::to_string(envelope) {
      Ok(raw) => raw,
      Err(e) => {
        warn!(key, error = %e, "failed to serialize cache entry, not cached");
        return;
      }
    };

    if let Err(e) = self.storage.set(key, &raw) {
      warn!(key, error = %e, "cache write failed");
    }
  }

  /// Remove the entry under `key`, if any.
  pub fn remove(&self, key: &str) {
    if let Err(e) = self.storage.remove(key) {
      warn!(key, error = %e, "cache remove failed");
    }
  }
}
