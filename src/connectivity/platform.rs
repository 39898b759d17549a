//! Platform online/offline signal.
//!
//! The embedding application owns a [`PlatformNotifier`] and reports what the
//! operating environment says about connectivity; the monitor consumes the
//! matching [`PlatformSignal`].

use tokio::sync::watch;

/// Platform connectivity transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformEvent {
  Online,
  Offline,
}

/// Sending half: report platform online/offline changes.
#[derive(Debug, Clone)]
pub struct PlatformNotifier {
  tx: watch::Sender<bool>,
}

impl PlatformNotifier {
  pub fn set_online(&self, online: bool) {
    self.tx.send_if_modified(|current| {
      let changed = *current != online;
      *current = online;
      changed
    });
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Create another signal observing this notifier.
  pub fn signal(&self) -> PlatformSignal {
    let rx = self.tx.subscribe();
    let last = *rx.borrow();
    PlatformSignal { rx, last }
  }
}

/// Receiving half: yields transitions as they happen.
#[derive(Debug, Clone)]
pub struct PlatformSignal {
  rx: watch::Receiver<bool>,
  last: bool,
}

impl PlatformSignal {
  /// Create a notifier/signal pair with the given initial flag.
  pub fn channel(initially_online: bool) -> (PlatformNotifier, PlatformSignal) {
    let (tx, rx) = watch::channel(initially_online);
    (
      PlatformNotifier { tx },
      PlatformSignal {
        rx,
        last: initially_online,
      },
    )
  }

  /// What the platform currently reports.
  pub fn is_online(&self) -> bool {
    *self.rx.borrow()
  }

  /// Receive the next transition.
  ///
  /// Returns `None` once the notifier is gone. Flaps that settle back on the
  /// last reported value are not reported.
  pub async fn next(&mut self) -> Option<PlatformEvent> {
    loop {
      self.rx.changed().await.ok()?;
      let online = *self.rx.borrow_and_update();
      if online == self.last {
        continue;
      }
      self.last = online;
      return Some(if online {
        PlatformEvent::Online
      } else {
        PlatformEvent::Offline
      });
    }
  }
}
