//! Offline cache for data persistence and offline support.
//!
//! This module provides a payload-agnostic caching mechanism that:
//! - Stores one `{data, timestamp, pendingChanges}` envelope per key
//! - Reports staleness against a caller-chosen TTL
//! - Tracks whether the stored data holds unsynced local edits
//! - Never fails the caller: storage errors degrade to cache misses

mod envelope;
mod offline;
mod storage;

pub use envelope::{CacheEnvelope, CachedEntry};
pub use offline::{OfflineCache, DEFAULT_STALE_TIME};
pub use storage::{KeyValueStore, MemoryStorage, NoopStorage, SqliteStorage};
