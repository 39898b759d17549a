//! Connectivity tracking and connection quality classification.
//!
//! The [`ConnectivityMonitor`] combines the platform's online/offline signal
//! with active latency probes and publishes immutable [`ConnectivityState`]
//! snapshots over a watch channel.

mod monitor;
mod platform;
mod probe;

pub use monitor::{ConnectivityMonitor, MonitorConfig, ProbeOutcome};
pub use platform::{PlatformEvent, PlatformNotifier, PlatformSignal};
pub use probe::{HttpProber, ProbeError, Prober};

use serde::Serialize;
use std::fmt;

/// Latency below this is `Good`.
pub const GOOD_LATENCY_MS: u64 = 300;
/// Latency below this (and not `Good`) is `Medium`.
pub const MEDIUM_LATENCY_MS: u64 = 1000;

/// Coarse connection quality derived from probe latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
  Good,
  Medium,
  Poor,
  Offline,
}

impl ConnectionQuality {
  /// Classify a latency sample from a successful probe.
  pub fn from_latency(latency_ms: u64) -> Self {
    if latency_ms < GOOD_LATENCY_MS {
      ConnectionQuality::Good
    } else if latency_ms < MEDIUM_LATENCY_MS {
      ConnectionQuality::Medium
    } else {
      ConnectionQuality::Poor
    }
  }
}

impl fmt::Display for ConnectionQuality {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      ConnectionQuality::Good => "good",
      ConnectionQuality::Medium => "medium",
      ConnectionQuality::Poor => "poor",
      ConnectionQuality::Offline => "offline",
    };
    f.write_str(s)
  }
}

/// Snapshot of what the monitor currently believes about the network.
///
/// `quality` is `Offline` exactly when `is_online` is false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectivityState {
  pub is_online: bool,
  pub quality: ConnectionQuality,
  pub last_latency_ms: Option<u64>,
  /// Consecutive probe failures since the last success
  pub failed_probe_count: u32,
}

impl ConnectivityState {
  /// Initial state for a given platform flag. Online starts optimistic.
  pub fn initial(is_online: bool) -> Self {
    if is_online {
      Self::online(ConnectionQuality::Good)
    } else {
      Self::offline()
    }
  }

  pub fn online(quality: ConnectionQuality) -> Self {
    Self {
      is_online: true,
      quality,
      last_latency_ms: None,
      failed_probe_count: 0,
    }
  }

  pub fn offline() -> Self {
    Self {
      is_online: false,
      quality: ConnectionQuality::Offline,
      last_latency_ms: None,
      failed_probe_count: 0,
    }
  }
}
