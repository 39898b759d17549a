//! Offline-aware data synchronization for dashboards on unreliable links.
//!
//! A session wires together a [`ConnectivityMonitor`], an [`OfflineCache`], a
//! retrying [`RequestClient`] and shared [`Settings`], then mounts one
//! [`SyncCoordinator`] per cached key.

pub mod cache;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod logging;
pub mod request;
pub mod settings;
pub mod sync;

#[cfg(test)]
mod testing;

pub use cache::{CacheEnvelope, CachedEntry, KeyValueStore, MemoryStorage, OfflineCache, SqliteStorage};
pub use config::Config;
pub use connectivity::{ConnectionQuality, ConnectivityMonitor, ConnectivityState, HttpProber};
pub use request::{RequestClient, RequestError, RequestOptions, RetryPolicy};
pub use settings::{DataSavingMode, Settings};
pub use sync::{SyncContext, SyncCoordinator, SyncError, SyncOptions, SyncOutcome, SyncPhase, SyncSnapshot};
