//! Command handlers for the dashsync binary.

use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use dashsync::cache::{KeyValueStore, OfflineCache, SqliteStorage};
use dashsync::connectivity::{ConnectivityMonitor, HttpProber, PlatformNotifier, PlatformSignal};
use dashsync::request::{RequestClient, RequestOptions, RetryPolicy};
use dashsync::settings::{DataSavingMode, Settings};
use dashsync::sync::{SyncContext, SyncCoordinator, SyncOptions};
use dashsync::Config;

/// Everything a command needs: config plus the persistent local state.
pub struct Session {
  config: Config,
  storage: Arc<SqliteStorage>,
  cache: OfflineCache,
  settings: Settings,
}

impl Session {
  pub fn open(config: Config) -> Result<Self> {
    let storage = Arc::new(SqliteStorage::open(config.cache.path.as_deref())?);
    let cache = OfflineCache::new(storage.clone());
    let settings = Settings::load(storage.clone());

    Ok(Self {
      config,
      storage,
      cache,
      settings,
    })
  }

  /// The CLI has no OS network events, so the platform reports online and
  /// probes decide quality. The notifier must outlive the monitor.
  fn start_monitor(&self) -> Result<(ConnectivityMonitor, PlatformNotifier)> {
    let prober = HttpProber::new(&self.config.probe_url()?, self.config.probe.timeout())?;
    debug!(url = %prober.url(), "starting connectivity monitor");
    let (notifier, signal) = PlatformSignal::channel(true);
    let monitor = ConnectivityMonitor::start(Arc::new(prober), signal, self.config.probe.monitor_config());
    Ok((monitor, notifier))
  }

  pub async fn status(&self) -> Result<()> {
    let (monitor, _platform) = self.start_monitor()?;
    let mut rx = monitor.subscribe();

    let deadline = self.config.probe.timeout() + Duration::from_secs(1);
    let probed = matches!(
      tokio::time::timeout(
        deadline,
        rx.wait_for(|s| s.last_latency_ms.is_some() || s.failed_probe_count > 0)
      )
      .await,
      Ok(Ok(_))
    );
    if !probed {
      warn!("probe did not finish within {:?}", deadline);
    }

    let state = monitor.state();
    monitor.dispose();
    print_json(&state)
  }

  pub async fn watch(&self) -> Result<()> {
    let (monitor, _platform) = self.start_monitor()?;
    let mut rx = monitor.subscribe();
    info!("watching connectivity, press Ctrl-C to stop");

    loop {
      tokio::select! {
        _ = tokio::signal::ctrl_c() => break,
        changed = rx.changed() => {
          if changed.is_err() {
            break;
          }
          let state = rx.borrow_and_update().clone();
          info!(
            online = state.is_online,
            quality = %state.quality,
            latency_ms = ?state.last_latency_ms,
            failures = state.failed_probe_count,
            "connectivity changed"
          );
        }
      }
    }

    monitor.dispose();
    Ok(())
  }

  pub async fn fetch(&self, key: &str, endpoint: &str) -> Result<()> {
    let (monitor, _platform) = self.start_monitor()?;

    // The coordinator retries; each fetch is a single attempt
    let client = RequestClient::new(&self.config.api, self.config.retry)?;
    let attempt = RequestClient::new(&self.config.api, RetryPolicy::none())?;
    attempt.resolve(endpoint).map_err(|e| eyre!("Invalid endpoint: {}", e))?;

    let ctx = SyncContext::new(self.cache.clone(), client, self.settings.clone(), monitor.subscribe());
    let options = SyncOptions::new(key, Value::Null)
      .stale_time(self.config.cache.stale_time())
      .debounce(self.config.sync.debounce());

    let endpoint = endpoint.to_string();
    let coordinator = SyncCoordinator::builder(ctx, options, move || {
      let attempt = attempt.clone();
      let endpoint = endpoint.clone();
      async move { attempt.request::<Value>(&endpoint, RequestOptions::get(), None).await }
    })
    .mount();

    if let Err(e) = coordinator.refetch().await {
      warn!(key, error = %e, "fetch failed");
    }

    let snapshot = coordinator.snapshot();
    coordinator.dispose();
    monitor.dispose();
    print_json(&snapshot)
  }

  pub fn show(&self, key: &str) -> Result<()> {
    match self.cache.load::<Value>(key, self.config.cache.stale_time()) {
      Some(entry) => {
        let age_ms = entry.age_ms(self.cache.now_ms());
        print_json(&json!({
          "key": key,
          "stale": entry.is_stale,
          "age_ms": age_ms,
          "envelope": entry.envelope,
        }))
      }
      None => {
        println!("No cached entry for {}", key);
        Ok(())
      }
    }
  }

  pub fn clear(&self, key: &str) -> Result<()> {
    self.storage.remove(key)?;
    println!("Cleared {}", key);
    Ok(())
  }

  pub fn mode(&self, mode: Option<DataSavingMode>) -> Result<()> {
    if let Some(mode) = mode {
      self.settings.set_data_saving_mode(mode);
    }
    println!("{}", self.settings.data_saving_mode());
    Ok(())
  }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  let out = serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to serialize output: {}", e))?;
  println!("{}", out);
  Ok(())
}
