mod coordinator;
mod state;

pub use coordinator::{SyncBuilder, SyncCoordinator, SyncOptions};
pub use state::{SyncPhase, SyncSnapshot};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::sync::watch;

use crate::cache::OfflineCache;
use crate::connectivity::ConnectivityState;
use crate::request::{RequestClient, RequestError};
use crate::settings::Settings;

/// Data a coordinator can hold, cache, and hand across tasks.
pub trait Payload: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Payload for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Session services shared by every coordinator.
#[derive(Clone)]
pub struct SyncContext {
  pub cache: OfflineCache,
  pub client: RequestClient,
  pub settings: Settings,
  pub connectivity: watch::Receiver<ConnectivityState>,
}

impl SyncContext {
  pub fn new(
    cache: OfflineCache,
    client: RequestClient,
    settings: Settings,
    connectivity: watch::Receiver<ConnectivityState>,
  ) -> Self {
    Self {
      cache,
      client,
      settings,
      connectivity,
    }
  }
}

/// Result of a [`SyncCoordinator::sync_changes`] pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
  /// Nothing was pending
  Clean,
  /// Changes are pending but no sync function was configured
  Unsupported,
  /// The server accepted the changes and its version replaced local data
  Synced,
  /// The server accepted the changes but newer local edits remain pending
  Superseded,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
  #[error("cannot sync while offline")]
  Offline,
  #[error("sync rejected: {0}")]
  Rejected(RequestError),
}
