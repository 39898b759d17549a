//! Connectivity monitor: platform signal plus active latency probes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::platform::{PlatformEvent, PlatformSignal};
use super::probe::{ProbeError, Prober};
use super::{ConnectionQuality, ConnectivityState};

/// Timing configuration for the monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
  /// How often to probe while online
  pub probe_interval: Duration,
  /// Delay after a platform "online" event before the first probe
  pub stabilization_delay: Duration,
}

impl Default for MonitorConfig {
  fn default() -> Self {
    Self {
      probe_interval: Duration::from_secs(60),
      stabilization_delay: Duration::from_secs(2),
    }
  }
}

/// Result of a probe that actually ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
  Reachable { latency_ms: u64 },
  Unreachable,
}

/// Single source of truth for "can we reach the network, and how well".
///
/// Owns every background task it starts (platform listener, periodic probe,
/// stabilization probes); [`dispose`](Self::dispose) or dropping the monitor
/// cancels all of them.
pub struct ConnectivityMonitor {
  inner: Arc<MonitorInner>,
}

struct MonitorInner {
  state: watch::Sender<ConnectivityState>,
  prober: Arc<dyn Prober>,
  probing: AtomicBool,
  shutdown: CancellationToken,
  config: MonitorConfig,
}

/// Clears the in-flight flag when a probe finishes or is cancelled.
struct ProbeGuard<'a>(&'a AtomicBool);

impl Drop for ProbeGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

impl ConnectivityMonitor {
  /// Start monitoring. Must be called from within a tokio runtime.
  pub fn start(prober: Arc<dyn Prober>, signal: PlatformSignal, config: MonitorConfig) -> Self {
    let initial = ConnectivityState::initial(signal.is_online());
    let is_online = initial.is_online;
    let (state, _) = watch::channel(initial);

    let inner = Arc::new(MonitorInner {
      state,
      prober,
      probing: AtomicBool::new(false),
      shutdown: CancellationToken::new(),
      config,
    });

    info!(is_online, "connectivity monitor started");

    inner.spawn_platform_listener(signal);
    inner.spawn_periodic_probe();
    if is_online {
      inner.spawn_probe_after(Duration::ZERO);
    }

    Self { inner }
  }

  /// Current state snapshot.
  pub fn state(&self) -> ConnectivityState {
    self.inner.state.borrow().clone()
  }

  pub fn is_online(&self) -> bool {
    self.inner.state.borrow().is_online
  }

  pub fn quality(&self) -> ConnectionQuality {
    self.inner.state.borrow().quality
  }

  pub fn last_latency_ms(&self) -> Option<u64> {
    self.inner.state.borrow().last_latency_ms
  }

  /// Subscribe to state snapshots.
  pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
    self.inner.state.subscribe()
  }

  /// Run one quality probe.
  ///
  /// Returns `None` without probing if another probe is already in flight.
  pub async fn probe(&self) -> Option<ProbeOutcome> {
    self.inner.probe().await
  }

  /// User-triggered reconnection check.
  ///
  /// Probes once; a successful probe while the platform still reports offline
  /// forces the monitor online. Returns whether the monitor is online afterwards.
  pub async fn manual_reconnect(&self) -> bool {
    info!("manual reconnection requested");
    if let Some(ProbeOutcome::Reachable { latency_ms }) = self.inner.probe().await {
      let forced = self.inner.state.send_if_modified(|state| {
        if state.is_online {
          return false;
        }
        *state = ConnectivityState {
          is_online: true,
          quality: ConnectionQuality::from_latency(latency_ms),
          last_latency_ms: Some(latency_ms),
          failed_probe_count: 0,
        };
        true
      });
      if forced {
        info!(latency_ms, "endpoint reachable, forcing online");
      }
    }
    self.is_online()
  }

  /// Stop every background task. Idempotent.
  pub fn dispose(&self) {
    if !self.inner.shutdown.is_cancelled() {
      debug!("connectivity monitor disposed");
      self.inner.shutdown.cancel();
    }
  }

  pub fn is_disposed(&self) -> bool {
    self.inner.shutdown.is_cancelled()
  }
}

impl Drop for ConnectivityMonitor {
  fn drop(&mut self) {
    self.dispose();
  }
}

impl MonitorInner {
  fn spawn_platform_listener(self: &Arc<Self>, mut signal: PlatformSignal) {
    let inner = Arc::clone(self);
    let token = self.shutdown.clone();

    tokio::spawn(async move {
      loop {
        tokio::select! {
          _ = token.cancelled() => break,
          event = signal.next() => match event {
            Some(PlatformEvent::Offline) => inner.handle_offline(),
            Some(PlatformEvent::Online) => inner.handle_online(),
            None => {
              debug!("platform signal closed");
              break;
            }
          },
        }
      }
    });
  }

  fn spawn_periodic_probe(self: &Arc<Self>) {
    let inner = Arc::clone(self);
    let token = self.shutdown.clone();
    let period = self.config.probe_interval;
    if period.is_zero() {
      warn!("probe interval is zero, periodic probing disabled");
      return;
    }

    tokio::spawn(async move {
      let mut ticker = interval_at(Instant::now() + period, period);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

      loop {
        tokio::select! {
          _ = token.cancelled() => break,
          _ = ticker.tick() => {
            let online = inner.state.borrow().is_online;
            if online {
              inner.probe().await;
            }
          }
        }
      }
    });
  }

  fn spawn_probe_after(self: &Arc<Self>, delay: Duration) {
    let inner = Arc::clone(self);
    let token = self.shutdown.clone();

    tokio::spawn(async move {
      tokio::select! {
        _ = token.cancelled() => {}
        _ = tokio::time::sleep(delay) => {
          let online = inner.state.borrow().is_online;
          if online {
            inner.probe().await;
          }
        }
      }
    });
  }

  fn handle_offline(&self) {
    info!("platform reports offline");
    self.state.send_modify(|state| {
      let failed_probe_count = state.failed_probe_count;
      *state = ConnectivityState {
        failed_probe_count,
        ..ConnectivityState::offline()
      };
    });
  }

  fn handle_online(self: &Arc<Self>) {
    info!("platform reports online");
    self.state.send_modify(|state| {
      let failed_probe_count = state.failed_probe_count;
      *state = ConnectivityState {
        failed_probe_count,
        ..ConnectivityState::online(ConnectionQuality::Medium)
      };
    });
    // The first moments after reconnecting are noisy; wait before classifying
    self.spawn_probe_after(self.config.stabilization_delay);
  }

  async fn probe(&self) -> Option<ProbeOutcome> {
    if self
      .probing
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      debug!("probe already in flight, skipping");
      return None;
    }
    let _guard = ProbeGuard(&self.probing);

    let started = Instant::now();
    let result = self.prober.probe().await;
    let latency_ms = started.elapsed().as_millis() as u64;

    match result {
      Ok(()) => {
        self.record_success(latency_ms);
        Some(ProbeOutcome::Reachable { latency_ms })
      }
      Err(e) => {
        self.record_failure(&e);
        Some(ProbeOutcome::Unreachable)
      }
    }
  }

  fn record_success(&self, latency_ms: u64) {
    self.state.send_if_modified(|state| {
      if !state.is_online {
        debug!(latency_ms, "probe succeeded while offline, leaving state alone");
        let changed = state.failed_probe_count != 0;
        state.failed_probe_count = 0;
        return changed;
      }
      let quality = ConnectionQuality::from_latency(latency_ms);
      debug!(latency_ms, %quality, "probe succeeded");
      let next = ConnectivityState {
        is_online: true,
        quality,
        last_latency_ms: Some(latency_ms),
        failed_probe_count: 0,
      };
      let changed = *state != next;
      *state = next;
      changed
    });
  }

  fn record_failure(&self, error: &ProbeError) {
    self.state.send_modify(|state| {
      state.failed_probe_count += 1;
      if state.is_online {
        warn!(error = %error, failures = state.failed_probe_count, "probe failed while online, downgrading to poor");
        state.quality = ConnectionQuality::Poor;
      } else {
        debug!(error = %error, failures = state.failed_probe_count, "probe failed while offline");
        state.quality = ConnectionQuality::Offline;
      }
    });
  }
}
