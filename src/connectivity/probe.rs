//! Liveness probes used to measure connection quality.

use async_trait::async_trait;
use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use std::time::Duration;
use url::Url;

/// Why a liveness probe failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
  #[error("liveness endpoint returned status {0}")]
  Status(u16),
  #[error("liveness probe timed out")]
  Timeout,
  #[error("liveness probe failed: {0}")]
  Request(String),
}

/// A single lightweight reachability check.
///
/// The monitor measures wall-clock latency around `probe`; implementations
/// only report whether the endpoint answered successfully.
#[async_trait]
pub trait Prober: Send + Sync {
  async fn probe(&self) -> Result<(), ProbeError>;
}

/// Probe that issues an uncached HEAD request against a liveness endpoint.
#[derive(Clone)]
pub struct HttpProber {
  client: reqwest::Client,
  url: Url,
  timeout: Duration,
}

impl HttpProber {
  pub fn new(url: &str, timeout: Duration) -> Result<Self> {
    let url = Url::parse(url).map_err(|e| eyre!("Invalid probe URL {}: {}", url, e))?;

    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create probe client: {}", e))?;

    Ok(Self {
      client,
      url,
      timeout,
    })
  }

  pub fn url(&self) -> &Url {
    &self.url
  }
}

#[async_trait]
impl Prober for HttpProber {
  async fn probe(&self) -> Result<(), ProbeError> {
    // Unique query parameter so no intermediary can answer from cache
    let buster = Utc::now().timestamp_millis().to_string();

    let response = self
      .client
      .head(self.url.clone())
      .query(&[("_", buster.as_str())])
      .header(CACHE_CONTROL, "no-cache, no-store")
      .header(PRAGMA, "no-cache")
      .timeout(self.timeout)
      .send()
      .await
      .map_err(|e| {
        if e.is_timeout() {
          ProbeError::Timeout
        } else {
          ProbeError::Request(e.to_string())
        }
      })?;

    let status = response.status();
    if status.is_success() {
      Ok(())
    } else {
      Err(ProbeError::Status(status.as_u16()))
    }
  }
}
