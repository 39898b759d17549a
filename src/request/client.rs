use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};
use url::Url;

use super::error::RequestError;
use super::retry::{RetryPolicy, RetryState};
use crate::cache::{OfflineCache, DEFAULT_STALE_TIME};
use crate::config::ApiConfig;
use crate::connectivity::ConnectivityState;

/// Per-call options for [`RequestClient::request`].
#[derive(Debug, Clone)]
pub struct RequestOptions {
  pub method: Method,
  pub body: Option<serde_json::Value>,
  pub headers: Vec<(String, String)>,
  /// Overrides the client's default timeout
  pub timeout: Option<Duration>,
  /// How long a cached response is valid for the offline fast path
  pub stale_time: Duration,
}

impl Default for RequestOptions {
  fn default() -> Self {
    Self {
      method: Method::GET,
      body: None,
      headers: Vec::new(),
      timeout: None,
      stale_time: DEFAULT_STALE_TIME,
    }
  }
}

impl RequestOptions {
  pub fn get() -> Self {
    Self::default()
  }

  pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  pub fn stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }
}

/// Where a successful result is cached, and how long a cached copy may stand
/// in for the network while offline.
#[derive(Debug, Clone, Copy)]
pub struct CacheTarget<'a> {
  pub key: &'a str,
  pub stale_time: Duration,
}

/// Network client with per-call timeout, bounded retry and offline cache fallback.
#[derive(Clone)]
pub struct RequestClient {
  http: reqwest::Client,
  base_url: Option<Url>,
  timeout: Duration,
  policy: RetryPolicy,
  cache: Option<OfflineCache>,
  connectivity: Option<watch::Receiver<ConnectivityState>>,
}

impl RequestClient {
  pub fn new(config: &ApiConfig, policy: RetryPolicy) -> color_eyre::Result<Self> {
    use color_eyre::eyre::eyre;

    let base_url = config
      .base_url
      .as_deref()
      .map(|u| Url::parse(u).map_err(|e| eyre!("Invalid API base URL {}: {}", u, e)))
      .transpose()?;

    let http = reqwest::Client::builder()
      .user_agent(concat!("dashsync/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url,
      timeout: config.timeout(),
      policy,
      cache: None,
      connectivity: None,
    })
  }

  /// Persist successful responses and serve the cache while offline.
  pub fn with_cache(mut self, cache: OfflineCache) -> Self {
    self.cache = Some(cache);
    self
  }

  /// Observe connectivity so offline calls can be answered from cache.
  pub fn with_connectivity(mut self, connectivity: watch::Receiver<ConnectivityState>) -> Self {
    self.connectivity = Some(connectivity);
    self
  }

  /// True only when attached to a monitor that currently reports offline.
  pub fn is_offline(&self) -> bool {
    self
      .connectivity
      .as_ref()
      .is_some_and(|rx| !rx.borrow().is_online)
  }

  /// Resolve an endpoint against the base URL. Absolute URLs pass through.
  pub fn resolve(&self, endpoint: &str) -> Result<Url, RequestError> {
    if let Ok(url) = Url::parse(endpoint) {
      return Ok(url);
    }
    let base = self
      .base_url
      .as_ref()
      .ok_or_else(|| RequestError::Invalid(format!("relative endpoint {} without a base URL", endpoint)))?;
    base
      .join(endpoint)
      .map_err(|e| RequestError::Invalid(format!("{}: {}", endpoint, e)))
  }

  /// Perform one JSON request against `endpoint`.
  ///
  /// With a `cache_key`, a successful response is cached and, while offline,
  /// a non-expired cached response is returned without touching the network.
  pub async fn request<T>(
    &self,
    endpoint: &str,
    options: RequestOptions,
    cache_key: Option<&str>,
  ) -> Result<T, RequestError>
  where
    T: Serialize + DeserializeOwned,
  {
    let url = self.resolve(endpoint)?;
    let timeout = options.timeout.unwrap_or(self.timeout);
    let target = cache_key.map(|key| CacheTarget {
      key,
      stale_time: options.stale_time,
    });

    self
      .execute_with(&self.policy, timeout, target, || {
        let mut builder = self.http.request(options.method.clone(), url.clone());
        for (name, value) in &options.headers {
          builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &options.body {
          builder = builder.json(body);
        }

        async move {
          let response = builder.send().await.map_err(RequestError::from)?;
          let status = response.status();
          if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RequestError::status(status.as_u16(), message));
          }
          response
            .json::<T>()
            .await
            .map_err(|e| RequestError::Decode(e.to_string()))
        }
      })
      .await
  }

  /// Run an arbitrary async operation under the client's timeout and retry policy.
  pub async fn execute<T, F, Fut>(&self, target: Option<CacheTarget<'_>>, op: F) -> Result<T, RequestError>
  where
    T: Serialize + DeserializeOwned,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RequestError>>,
  {
    self.execute_with(&self.policy, self.timeout, target, op).await
  }

  /// Like [`execute`](Self::execute) with an explicit policy and timeout.
  pub async fn execute_with<T, F, Fut>(
    &self,
    policy: &RetryPolicy,
    timeout: Duration,
    target: Option<CacheTarget<'_>>,
    mut op: F,
  ) -> Result<T, RequestError>
  where
    T: Serialize + DeserializeOwned,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RequestError>>,
  {
    if let Some(data) = self.offline_fallback(target.as_ref()) {
      return Ok(data);
    }

    let mut retry = RetryState::default();
    loop {
      let result = match tokio::time::timeout(timeout, op()).await {
        Ok(result) => result,
        Err(_) => Err(RequestError::Timeout(timeout)),
      };

      let error = match result {
        Ok(data) => {
          if let (Some(target), Some(cache)) = (target.as_ref(), self.cache.as_ref()) {
            cache.save(target.key, &data, false);
          }
          return Ok(data);
        }
        Err(e) => e,
      };

      if !error.is_transient() {
        debug!(error = %error, "non-transient failure, not retrying");
        return Err(error);
      }

      match retry.next_delay(policy) {
        Some(delay) => {
          warn!(
            attempt = retry.attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "transient failure, retrying"
          );
          tokio::time::sleep(delay).await;
        }
        None => {
          warn!(attempts = policy.max_attempts(), error = %error, "retries exhausted");
          return Err(error);
        }
      }
    }
  }

  fn offline_fallback<T: DeserializeOwned>(&self, target: Option<&CacheTarget<'_>>) -> Option<T> {
    let target = target?;
    let cache = self.cache.as_ref()?;
    if !self.is_offline() {
      return None;
    }
    let entry = cache.load::<T>(target.key, target.stale_time)?;
    if entry.is_stale {
      debug!(key = target.key, "offline but cached entry is stale, trying network");
      return None;
    }
    debug!(key = target.key, "offline, serving cached entry");
    Some(entry.into_data())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use crate::testing::TestServer;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;

  fn client() -> RequestClient {
    RequestClient::new(&ApiConfig::default(), RetryPolicy::default()).unwrap()
  }

  fn memory_cache() -> OfflineCache {
    OfflineCache::new(Arc::new(MemoryStorage::new()))
  }

  #[tokio::test(start_paused = true)]
  async fn test_always_transient_failure_attempts_max_retries_plus_one() {
    let client = client();
    let attempts = AtomicU32::new(0);

    let result: Result<u32, _> = client
      .execute(None, || {
        attempts.fetch_add(1, Ordering::SeqCst);
        async { Err(RequestError::network("connection reset")) }
      })
      .await;

    assert_eq!(result, Err(RequestError::network("connection reset")));
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
  }

  #[tokio::test(start_paused = true)]
  async fn test_backoff_delays_between_attempts() {
    let client = client();
    let started = tokio::time::Instant::now();
    let stamps = std::sync::Mutex::new(Vec::new());

    let _: Result<u32, _> = client
      .execute(None, || {
        stamps.lock().unwrap().push(started.elapsed());
        async { Err(RequestError::network("down")) }
      })
      .await;

    let stamps = stamps.into_inner().unwrap();
    let gaps: Vec<u64> = stamps
      .windows(2)
      .map(|w| (w[1] - w[0]).as_millis() as u64)
      .collect();
    assert_eq!(gaps.len(), 3);
    assert!(gaps[0] >= 2_000 && gaps[0] < 2_100);
    assert!(gaps[1] >= 4_000 && gaps[1] < 4_100);
    assert!(gaps[2] >= 8_000 && gaps[2] < 8_100);
  }

  #[tokio::test(start_paused = true)]
  async fn test_succeeds_after_two_timeouts() {
    let client = client();
    let attempts = AtomicU32::new(0);

    let result = client
      .execute(None, || {
        let n = attempts.fetch_add(1, Ordering::SeqCst);
        async move {
          if n < 2 {
            // Never completes; the client timeout cancels it
            futures::future::pending::<()>().await;
          }
          Ok(serde_json::json!({"v": 1}))
        }
      })
      .await;

    assert_eq!(result, Ok(serde_json::json!({"v": 1})));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_non_transient_error_is_not_retried() {
    let client = client();
    let attempts = AtomicU32::new(0);

    let result: Result<u32, _> = client
      .execute(None, || {
        attempts.fetch_add(1, Ordering::SeqCst);
        async { Err(RequestError::status(422, "invalid rule")) }
      })
      .await;

    assert_eq!(result, Err(RequestError::status(422, "invalid rule")));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_success_is_cached_under_target_key() {
    let cache = memory_cache();
    let client = client().with_cache(cache.clone());
    let target = CacheTarget {
      key: "orders",
      stale_time: DEFAULT_STALE_TIME,
    };

    let result = client
      .execute(Some(target), || async { Ok(vec![1u32, 2, 3]) })
      .await;

    assert_eq!(result, Ok(vec![1, 2, 3]));
    let entry = cache.load::<Vec<u32>>("orders", DEFAULT_STALE_TIME).unwrap();
    assert_eq!(entry.envelope.data, vec![1, 2, 3]);
    assert!(!entry.envelope.pending_sync);
  }

  #[tokio::test(start_paused = true)]
  async fn test_offline_with_fresh_cache_skips_network() {
    let cache = memory_cache();
    cache.save("orders", &vec![9u32], false);
    let (_tx, rx) = watch::channel(ConnectivityState::offline());
    let client = client().with_cache(cache).with_connectivity(rx);
    let attempts = AtomicU32::new(0);

    let result = client
      .execute(
        Some(CacheTarget {
          key: "orders",
          stale_time: DEFAULT_STALE_TIME,
        }),
        || {
          attempts.fetch_add(1, Ordering::SeqCst);
          async { Ok(vec![1u32]) }
        },
      )
      .await;

    assert_eq!(result, Ok(vec![9]));
    assert_eq!(attempts.load(Ordering::SeqCst), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_online_ignores_cache_fast_path() {
    let cache = memory_cache();
    cache.save("orders", &vec![9u32], false);
    let (_tx, rx) = watch::channel(ConnectivityState::initial(true));
    let client = client().with_cache(cache).with_connectivity(rx);

    let result = client
      .execute(
        Some(CacheTarget {
          key: "orders",
          stale_time: DEFAULT_STALE_TIME,
        }),
        || async { Ok(vec![1u32]) },
      )
      .await;

    assert_eq!(result, Ok(vec![1]));
  }

  #[tokio::test(start_paused = true)]
  async fn test_exhausted_retries_do_not_fall_back_to_cache() {
    let cache = memory_cache();
    cache.save("orders", &vec![9u32], false);
    let client = client().with_cache(cache);

    let result: Result<Vec<u32>, _> = client
      .execute(
        Some(CacheTarget {
          key: "orders",
          stale_time: DEFAULT_STALE_TIME,
        }),
        || async { Err(RequestError::network("down")) },
      )
      .await;

    assert!(result.is_err());
  }

  #[test]
  fn test_resolve_endpoints() {
    let config = ApiConfig {
      base_url: Some("https://api.example.com/v1/".to_string()),
      ..ApiConfig::default()
    };
    let client = RequestClient::new(&config, RetryPolicy::default()).unwrap();

    assert_eq!(
      client.resolve("orders").unwrap().as_str(),
      "https://api.example.com/v1/orders"
    );
    assert_eq!(
      client.resolve("https://other.example.com/x").unwrap().as_str(),
      "https://other.example.com/x"
    );
    assert!(matches!(
      self::client().resolve("orders"),
      Err(RequestError::Invalid(_))
    ));
  }

  fn client_for(server: &TestServer) -> RequestClient {
    let config = ApiConfig {
      base_url: Some(server.url.clone()),
      ..ApiConfig::default()
    };
    RequestClient::new(&config, RetryPolicy::default()).unwrap()
  }

  #[tokio::test]
  async fn test_request_decodes_json_response() {
    let server = TestServer::start(200, r#"{"v":1}"#).await;

    let value: serde_json::Value = client_for(&server)
      .request("orders", RequestOptions::get(), None)
      .await
      .unwrap();

    assert_eq!(value, serde_json::json!({"v": 1}));
    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].starts_with("GET /orders "));
  }

  #[tokio::test]
  async fn test_request_error_status_is_not_retried() {
    let server = TestServer::start(500, "boom").await;

    let result: Result<serde_json::Value, _> = client_for(&server)
      .request("orders", RequestOptions::get(), None)
      .await;

    assert_eq!(result, Err(RequestError::status(500, "boom")));
    assert_eq!(server.hits(), 1);
  }

  #[tokio::test]
  async fn test_request_undecodable_body_is_decode_error() {
    let server = TestServer::start(200, "<html>").await;

    let result: Result<Vec<u32>, _> = client_for(&server)
      .request("orders", RequestOptions::get(), None)
      .await;

    assert!(matches!(result, Err(RequestError::Decode(_))));
    assert_eq!(server.hits(), 1);
  }

  #[tokio::test]
  async fn test_request_sends_custom_headers_and_caches() {
    let server = TestServer::start(200, "[1,2,3]").await;
    let cache = memory_cache();
    let client = client_for(&server).with_cache(cache.clone());

    let options = RequestOptions::get().header("x-store-id", "42");
    let orders: Vec<u32> = client.request("orders", options, Some("orders")).await.unwrap();

    assert_eq!(orders, vec![1, 2, 3]);
    assert!(server.requests()[0].to_lowercase().contains("x-store-id: 42"));
    let entry = cache.load::<Vec<u32>>("orders", DEFAULT_STALE_TIME).unwrap();
    assert_eq!(entry.into_data(), vec![1, 2, 3]);
  }
}
