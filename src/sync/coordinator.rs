//! Per-key orchestration: load cache, show, refresh, reconcile.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::{fetch_time, SyncPhase, SyncSnapshot};
use super::{Payload, SyncContext, SyncError, SyncOutcome};
use crate::cache::DEFAULT_STALE_TIME;
use crate::request::RequestError;

/// Caller-supplied network fetch for one key.
type FetchFn<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, RequestError>> + Send + Sync>;

/// Caller-supplied push of local state; resolves to the server's version.
type SyncFn<T> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<T, RequestError>> + Send + Sync>;

type SharedFetch = Shared<BoxFuture<'static, Result<(), RequestError>>>;

/// Per-key options.
#[derive(Debug, Clone)]
pub struct SyncOptions<T> {
  /// Cache key the data is stored under
  pub key: String,
  /// Shown when there is neither network data nor usable cache
  pub default_data: T,
  /// Age after which cached data is not shown without a refresh attempt
  pub stale_time: Duration,
  /// Delay before the initial fetch
  pub debounce: Duration,
  /// On fetch failure, fall back to stale cache instead of `default_data`
  pub serve_stale_on_error: bool,
}

impl<T> SyncOptions<T> {
  pub fn new(key: impl Into<String>, default_data: T) -> Self {
    Self {
      key: key.into(),
      default_data,
      stale_time: DEFAULT_STALE_TIME,
      debounce: Duration::from_millis(300),
      serve_stale_on_error: false,
    }
  }

  pub fn stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  pub fn debounce(mut self, debounce: Duration) -> Self {
    self.debounce = debounce;
    self
  }

  pub fn serve_stale_on_error(mut self, serve: bool) -> Self {
    self.serve_stale_on_error = serve;
    self
  }
}

/// Builder for a [`SyncCoordinator`].
pub struct SyncBuilder<T: Payload> {
  ctx: SyncContext,
  options: SyncOptions<T>,
  fetch_fn: FetchFn<T>,
  sync_fn: Option<SyncFn<T>>,
}

impl<T: Payload> SyncBuilder<T> {
  /// Push pending local edits through `sync` when connectivity returns.
  pub fn sync_with<S, Fut>(mut self, sync: S) -> Self
  where
    S: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, RequestError>> + Send + 'static,
  {
    self.sync_fn = Some(Arc::new(move |data| sync(data).boxed()));
    self
  }

  /// Load the cache, publish the first snapshot, and start background work.
  ///
  /// Must be called from within a tokio runtime.
  pub fn mount(self) -> SyncCoordinator<T> {
    let SyncBuilder {
      ctx,
      options,
      fetch_fn,
      sync_fn,
    } = self;

    let (state, _) = watch::channel(SyncSnapshot::new(options.default_data.clone()));
    let inner = Arc::new(Inner {
      options,
      ctx,
      fetch_fn,
      sync_fn,
      state,
      revision: AtomicU64::new(0),
      edit_lock: std::sync::Mutex::new(()),
      in_flight: Mutex::new(None),
      sync_gate: Mutex::new(()),
      shutdown: CancellationToken::new(),
    });

    inner.load_initial();
    inner.spawn_connectivity_listener();
    inner.spawn_initial_fetch();

    SyncCoordinator { inner }
  }
}

/// Keeps one cache key in sync with the server on an unreliable link.
///
/// The coordinator shows cached data immediately, refreshes it in the
/// background, applies local edits optimistically, and pushes those edits
/// through the sync function once the connection comes back. Local edits are
/// never replaced by fetched data until a sync has succeeded.
pub struct SyncCoordinator<T: Payload> {
  inner: Arc<Inner<T>>,
}

struct Inner<T: Payload> {
  options: SyncOptions<T>,
  ctx: SyncContext,
  fetch_fn: FetchFn<T>,
  sync_fn: Option<SyncFn<T>>,
  state: watch::Sender<SyncSnapshot<T>>,
  /// Bumped on every local edit
  revision: AtomicU64,
  edit_lock: std::sync::Mutex<()>,
  in_flight: Mutex<Option<SharedFetch>>,
  sync_gate: Mutex<()>,
  shutdown: CancellationToken,
}

impl<T: Payload> SyncCoordinator<T> {
  /// Start building a coordinator for `options.key` using `fetch` to load data.
  pub fn builder<F, Fut>(ctx: SyncContext, options: SyncOptions<T>, fetch: F) -> SyncBuilder<T>
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, RequestError>> + Send + 'static,
  {
    SyncBuilder {
      ctx,
      options,
      fetch_fn: Arc::new(move || fetch().boxed()),
      sync_fn: None,
    }
  }

  pub fn key(&self) -> &str {
    &self.inner.options.key
  }

  /// Current state.
  pub fn snapshot(&self) -> SyncSnapshot<T> {
    self.inner.state.borrow().clone()
  }

  /// Subscribe to state changes.
  pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot<T>> {
    self.inner.state.subscribe()
  }

  pub fn data(&self) -> T {
    self.inner.state.borrow().data.clone()
  }

  pub fn is_loading(&self) -> bool {
    self.inner.state.borrow().loading
  }

  pub fn error(&self) -> Option<RequestError> {
    self.inner.state.borrow().error.clone()
  }

  pub fn is_from_cache(&self) -> bool {
    self.inner.state.borrow().is_from_cache
  }

  pub fn has_pending_sync(&self) -> bool {
    self.inner.state.borrow().has_pending_sync
  }

  pub fn last_fetch_time(&self) -> Option<chrono::DateTime<chrono::Utc>> {
    self.inner.state.borrow().last_fetch_time
  }

  /// Apply a local edit, mark it pending, and persist it immediately.
  ///
  /// Edits are applied one at a time. The updater may read the coordinator
  /// but must not call `update_data` itself. Returns the updated data.
  pub fn update_data<F>(&self, updater: F) -> T
  where
    F: FnOnce(T) -> T,
  {
    self.inner.update_data(updater)
  }

  /// Fetch from the network now.
  ///
  /// Joins the outstanding fetch if one is already running. In `high`
  /// data-saving mode this serves the cache without touching the network.
  pub async fn refetch(&self) -> Result<(), RequestError> {
    self.inner.fetch().await
  }

  /// Push pending local edits through the sync function.
  pub async fn sync_changes(&self) -> Result<SyncOutcome, SyncError> {
    self.inner.sync_changes().await
  }

  /// Stop background work. Idempotent.
  pub fn dispose(&self) {
    if self.inner.shutdown.is_cancelled() {
      return;
    }
    debug!(key = %self.inner.options.key, "sync coordinator disposed");
    self.inner.shutdown.cancel();
    // Drop an unfinished fetch so it doesn't keep the coordinator alive
    if let Ok(mut slot) = self.inner.in_flight.try_lock() {
      slot.take();
    }
  }
}

impl<T: Payload> Drop for SyncCoordinator<T> {
  fn drop(&mut self) {
    self.dispose();
  }
}

impl<T: Payload> Inner<T> {
  fn key(&self) -> &str {
    &self.options.key
  }

  fn is_online(&self) -> bool {
    self.ctx.connectivity.borrow().is_online
  }

  /// Synchronous first paint from cache.
  fn load_initial(&self) {
    let entry = self.ctx.cache.load::<T>(self.key(), self.options.stale_time);

    self.state.send_modify(|s| match entry {
      Some(entry) => {
        s.is_from_cache = true;
        s.has_pending_sync = entry.envelope.pending_sync;
        s.last_fetch_time = fetch_time(entry.envelope.timestamp);
        s.phase = if entry.is_stale {
          SyncPhase::Fetching
        } else {
          SyncPhase::Cached
        };
        s.loading = entry.is_stale;
        s.data = entry.envelope.data;
      }
      None => {
        s.phase = SyncPhase::Fetching;
        s.loading = true;
      }
    });

    let snapshot = self.state.borrow();
    debug!(key = self.key(), phase = ?snapshot.phase, pending = snapshot.has_pending_sync, "initial load");
  }

  fn spawn_initial_fetch(self: &Arc<Self>) {
    if !self.should_fetch() {
      self.settle_without_network();
      return;
    }

    let inner = Arc::clone(self);
    let token = self.shutdown.clone();
    let debounce = self.options.debounce;

    tokio::spawn(async move {
      tokio::select! {
        _ = token.cancelled() => {}
        _ = async {
          tokio::time::sleep(debounce).await;
          if let Err(e) = inner.fetch().await {
            debug!(key = inner.key(), error = %e, "initial fetch failed");
          }
        } => {}
      }
    });
  }

  fn spawn_connectivity_listener(self: &Arc<Self>) {
    let inner = Arc::clone(self);
    let token = self.shutdown.clone();
    let mut rx = self.ctx.connectivity.clone();
    let mut was_online = rx.borrow_and_update().is_online;

    tokio::spawn(async move {
      loop {
        tokio::select! {
          _ = token.cancelled() => break,
          changed = rx.changed() => {
            if changed.is_err() {
              break;
            }
            let online = rx.borrow_and_update().is_online;
            if online && !was_online {
              tokio::select! {
                _ = token.cancelled() => break,
                _ = inner.reconcile() => {}
              }
            }
            was_online = online;
          }
        }
      }
    });
  }

  /// Whether the network may be used right now.
  fn should_fetch(&self) -> bool {
    self.ctx.settings.data_saving_mode().allows_fetch() && self.is_online()
  }

  /// Resolve the initial state when no fetch will run.
  fn settle_without_network(&self) {
    if !self.ctx.settings.data_saving_mode().allows_fetch() {
      self.serve_cache_only();
      return;
    }
    let phase = self.state.borrow().phase;
    if phase == SyncPhase::Fetching {
      self.apply_failure(RequestError::Offline);
    }
  }

  /// Reconnection: sync pending edits first, otherwise refresh cached data.
  async fn reconcile(self: &Arc<Self>) {
    let (pending, from_cache, phase) = {
      let s = self.state.borrow();
      (s.has_pending_sync, s.is_from_cache, s.phase)
    };

    if pending && self.sync_fn.is_some() {
      match self.sync_changes().await {
        Ok(outcome) => debug!(key = self.key(), ?outcome, "reconnection sync finished"),
        Err(e) => warn!(key = self.key(), error = %e, "reconnection sync failed, keeping local changes"),
      }
      return;
    }

    if from_cache || phase == SyncPhase::Error {
      info!(key = self.key(), "back online, refreshing cached data");
      if let Err(e) = self.fetch().await {
        debug!(key = self.key(), error = %e, "reconnection refresh failed");
      }
    }
  }

  /// Run a fetch, or join the one already in flight.
  async fn fetch(self: &Arc<Self>) -> Result<(), RequestError> {
    let shared = {
      let mut slot = self.in_flight.lock().await;
      match slot.as_ref() {
        Some(fetch) => {
          debug!(key = self.key(), "joining in-flight fetch");
          fetch.clone()
        }
        None => {
          let inner = Arc::clone(self);
          let fetch = async move {
            let result = inner.run_fetch().await;
            inner.in_flight.lock().await.take();
            result
          }
          .boxed()
          .shared();
          *slot = Some(fetch.clone());
          fetch
        }
      }
    };
    shared.await
  }

  async fn run_fetch(&self) -> Result<(), RequestError> {
    if !self.ctx.settings.data_saving_mode().allows_fetch() {
      debug!(key = self.key(), "data saving mode is high, serving cache only");
      self.serve_cache_only();
      return Ok(());
    }

    if !self.is_online() {
      self.apply_failure(RequestError::Offline);
      return Err(RequestError::Offline);
    }

    self.state.send_modify(|s| {
      s.loading = true;
      s.phase = SyncPhase::Fetching;
    });

    let fetch_fn = Arc::clone(&self.fetch_fn);
    let result = self.ctx.client.execute(None, || fetch_fn()).await;

    match result {
      Ok(data) => {
        self.apply_fetched(data);
        Ok(())
      }
      Err(e) => {
        self.apply_failure(e.clone());
        Err(e)
      }
    }
  }

  fn apply_fetched(&self, data: T) {
    let key = self.key();
    let cache = &self.ctx.cache;

    self.state.send_modify(|s| {
      s.loading = false;
      if s.has_pending_sync {
        // Local edits win until a sync has gone through
        debug!(key, "local changes pending, discarding fetched data");
        s.phase = if s.is_from_cache {
          SyncPhase::Cached
        } else {
          SyncPhase::Fresh
        };
        return;
      }

      cache.save(key, &data, false);
      s.data = data;
      s.phase = SyncPhase::Fresh;
      s.error = None;
      s.is_from_cache = false;
      s.last_fetch_time = fetch_time(cache.now_ms());
      debug!(key, "fetched fresh data");
    });
  }

  fn apply_failure(&self, error: RequestError) {
    warn!(key = self.key(), error = %error, "fetch failed");
    let fallback = self.ctx.cache.load::<T>(self.key(), self.options.stale_time);
    let serve_stale = self.options.serve_stale_on_error;
    let default_data = &self.options.default_data;

    self.state.send_modify(|s| {
      s.loading = false;
      s.error = Some(error);

      if s.has_pending_sync {
        // Unsynced local edits are already persisted; keep showing them
        s.is_from_cache = true;
        s.phase = SyncPhase::Cached;
        return;
      }

      match fallback {
        Some(entry) if !entry.is_stale || serve_stale => {
          s.data = entry.envelope.data;
          s.is_from_cache = true;
          s.has_pending_sync = entry.envelope.pending_sync;
          s.last_fetch_time = fetch_time(entry.envelope.timestamp);
          s.phase = SyncPhase::Cached;
        }
        _ => {
          s.data = default_data.clone();
          s.is_from_cache = false;
          s.phase = SyncPhase::Error;
        }
      }
    });
  }

  /// Data saving gate: show whatever the cache has, else the default.
  fn serve_cache_only(&self) {
    let entry = self.ctx.cache.load::<T>(self.key(), self.options.stale_time);

    self.state.send_modify(|s| {
      s.loading = false;
      match entry {
        Some(entry) => {
          s.data = entry.envelope.data;
          s.is_from_cache = true;
          s.has_pending_sync = entry.envelope.pending_sync;
          s.last_fetch_time = fetch_time(entry.envelope.timestamp);
          s.phase = SyncPhase::Cached;
        }
        None if s.has_pending_sync => {}
        None => {
          if s.phase == SyncPhase::Fetching {
            s.phase = SyncPhase::Initial;
          }
        }
      }
    });
  }

  fn update_data<F>(&self, updater: F) -> T
  where
    F: FnOnce(T) -> T,
  {
    let key = self.key();
    let _edit = self.edit_lock.lock().unwrap_or_else(PoisonError::into_inner);

    // Invalidate any sync that already captured the data this edit replaces
    self.revision.fetch_add(1, Ordering::SeqCst);
    let current = self.state.borrow().data.clone();
    let next = updater(current);

    let cache = &self.ctx.cache;
    let revision = &self.revision;
    self.state.send_modify(|s| {
      revision.fetch_add(1, Ordering::SeqCst);
      cache.save(key, &next, true);
      s.data = next.clone();
      s.has_pending_sync = true;
    });

    debug!(key, "local change recorded, pending sync");
    next
  }

  async fn sync_changes(&self) -> Result<SyncOutcome, SyncError> {
    let _gate = self.sync_gate.lock().await;

    // Edits bump the revision under the write lock, so this pair is consistent
    let (data, pending, revision) = {
      let s = self.state.borrow();
      (s.data.clone(), s.has_pending_sync, self.revision.load(Ordering::SeqCst))
    };

    if !pending {
      return Ok(SyncOutcome::Clean);
    }
    let Some(sync_fn) = self.sync_fn.clone() else {
      return Ok(SyncOutcome::Unsupported);
    };
    if !self.is_online() {
      return Err(SyncError::Offline);
    }

    info!(key = self.key(), "syncing local changes");
    let result = self
      .ctx
      .client
      .execute(None, || sync_fn(data.clone()))
      .await;

    match result {
      Ok(server_data) => {
        let key = self.key();
        let cache = &self.ctx.cache;
        let current_revision = &self.revision;
        let mut superseded = false;

        self.state.send_modify(|s| {
          if current_revision.load(Ordering::SeqCst) != revision {
            // Edited again while syncing; the newer edit still needs a push
            superseded = true;
            return;
          }
          cache.save(key, &server_data, false);
          s.data = server_data;
          s.has_pending_sync = false;
          s.sync_error = None;
          s.error = None;
          s.is_from_cache = false;
          s.phase = SyncPhase::Fresh;
          s.last_fetch_time = fetch_time(cache.now_ms());
        });

        if superseded {
          info!(key, "local data changed during sync, still pending");
          Ok(SyncOutcome::Superseded)
        } else {
          info!(key, "local changes synced");
          Ok(SyncOutcome::Synced)
        }
      }
      Err(e) => {
        warn!(key = self.key(), error = %e, "sync rejected, keeping local changes");
        self.state.send_modify(|s| s.sync_error = Some(e.clone()));
        Err(SyncError::Rejected(e))
      }
    }
  }
}
