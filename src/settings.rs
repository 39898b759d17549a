//! Session-wide user settings persisted in the local key space.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cache::KeyValueStore;

/// Storage key of the data-saving mode.
pub const DATA_SAVING_MODE_KEY: &str = "dataSavingMode";

/// User-controlled policy restricting background network usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSavingMode {
  #[default]
  Off,
  /// Reserved for callers; the sync core treats it like `Off`
  Low,
  /// Never fetch in the background; serve cached data only
  High,
}

impl DataSavingMode {
  pub fn as_str(&self) -> &'static str {
    match self {
      DataSavingMode::Off => "off",
      DataSavingMode::Low => "low",
      DataSavingMode::High => "high",
    }
  }

  /// Whether background network fetches are allowed in this mode.
  pub fn allows_fetch(&self) -> bool {
    !matches!(self, DataSavingMode::High)
  }
}

impl fmt::Display for DataSavingMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for DataSavingMode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim() {
      "off" => Ok(DataSavingMode::Off),
      "low" => Ok(DataSavingMode::Low),
      "high" => Ok(DataSavingMode::High),
      other => Err(format!("unknown data saving mode: {}", other)),
    }
  }
}

/// Observable settings shared by every coordinator in a session.
///
/// Values are read once from storage when the session starts; `set_*` persists
/// and notifies subscribers.
#[derive(Clone)]
pub struct Settings {
  storage: Arc<dyn KeyValueStore>,
  data_saving: watch::Sender<DataSavingMode>,
}

impl Settings {
  /// Load settings from storage. Missing or unreadable values fall back to defaults.
  pub fn load(storage: Arc<dyn KeyValueStore>) -> Self {
    let mode = read_mode(storage.as_ref());
    let (data_saving, _) = watch::channel(mode);
    Self {
      storage,
      data_saving,
    }
  }

  /// Current data-saving mode.
  pub fn data_saving_mode(&self) -> DataSavingMode {
    *self.data_saving.borrow()
  }

  /// Persist and publish a new data-saving mode.
  pub fn set_data_saving_mode(&self, mode: DataSavingMode) {
    if let Err(e) = self.storage.set(DATA_SAVING_MODE_KEY, mode.as_str()) {
      warn!(error = %e, "failed to persist data saving mode");
    }
    let changed = self.data_saving.send_if_modified(|current| {
      if *current == mode {
        return false;
      }
      *current = mode;
      true
    });
    if changed {
      info!(%mode, "data saving mode changed");
    }
  }

  /// Subscribe to data-saving mode changes.
  pub fn subscribe(&self) -> watch::Receiver<DataSavingMode> {
    self.data_saving.subscribe()
  }
}

fn read_mode(storage: &dyn KeyValueStore) -> DataSavingMode {
  match storage.get(DATA_SAVING_MODE_KEY) {
    Ok(Some(raw)) => raw.parse().unwrap_or_else(|e| {
      warn!(error = %e, "ignoring stored data saving mode");
      DataSavingMode::default()
    }),
    Ok(None) => DataSavingMode::default(),
    Err(e) => {
      warn!(error = %e, "failed to read data saving mode");
      DataSavingMode::default()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;

  #[test]
  fn test_defaults_to_off() {
    let settings = Settings::load(Arc::new(MemoryStorage::new()));
    assert_eq!(settings.data_saving_mode(), DataSavingMode::Off);
  }

  #[test]
  fn test_reads_persisted_mode() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set(DATA_SAVING_MODE_KEY, "high").unwrap();

    let settings = Settings::load(storage);
    assert_eq!(settings.data_saving_mode(), DataSavingMode::High);
  }

  #[test]
  fn test_garbage_value_falls_back_to_default() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set(DATA_SAVING_MODE_KEY, "turbo").unwrap();

    let settings = Settings::load(storage);
    assert_eq!(settings.data_saving_mode(), DataSavingMode::Off);
  }

  #[test]
  fn test_set_persists_and_notifies() {
    let storage = Arc::new(MemoryStorage::new());
    let settings = Settings::load(storage.clone());
    let mut rx = settings.subscribe();

    settings.set_data_saving_mode(DataSavingMode::Low);

    assert!(rx.has_changed().unwrap());
    assert_eq!(*rx.borrow_and_update(), DataSavingMode::Low);
    assert_eq!(
      storage.get(DATA_SAVING_MODE_KEY).unwrap().as_deref(),
      Some("low")
    );
  }

  #[test]
  fn test_mode_parsing() {
    assert_eq!("high".parse::<DataSavingMode>(), Ok(DataSavingMode::High));
    assert!("HIGH ".parse::<DataSavingMode>().is_err());
    assert!(!DataSavingMode::High.allows_fetch());
    assert!(DataSavingMode::Low.allows_fetch());
  }
}
