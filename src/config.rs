use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::connectivity::MonitorConfig;
use crate::request::RetryPolicy;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub probe: ProbeConfig,
  pub retry: RetryPolicy,
  pub cache: CacheConfig,
  pub sync: SyncConfig,
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Base URL relative endpoints are resolved against
  pub base_url: Option<String>,
  /// Hard timeout for a single request attempt
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: None,
      timeout_secs: 10,
    }
  }
}

impl ApiConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
  /// Liveness endpoint (defaults to `health` under the API base URL)
  pub url: Option<String>,
  pub interval_secs: u64,
  pub stabilization_ms: u64,
  pub timeout_ms: u64,
}

impl Default for ProbeConfig {
  fn default() -> Self {
    Self {
      url: None,
      interval_secs: 60,
      stabilization_ms: 2_000,
      timeout_ms: 5_000,
    }
  }
}

impl ProbeConfig {
  pub fn monitor_config(&self) -> MonitorConfig {
    MonitorConfig {
      probe_interval: Duration::from_secs(self.interval_secs),
      stabilization_delay: Duration::from_millis(self.stabilization_ms),
    }
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_millis(self.timeout_ms)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// SQLite database path (defaults to the XDG data directory)
  pub path: Option<PathBuf>,
  pub stale_time_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      path: None,
      stale_time_secs: 60 * 60,
    }
  }
}

impl CacheConfig {
  pub fn stale_time(&self) -> Duration {
    Duration::from_secs(self.stale_time_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Delay that coalesces rapid initial fetches
  pub debounce_ms: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self { debounce_ms: 300 }
  }
}

impl SyncConfig {
  pub fn debounce(&self) -> Duration {
    Duration::from_millis(self.debounce_ms)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Filter used when RUST_LOG is not set
  pub level: String,
  /// Write logs to this file instead of stderr
  pub file: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      file: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./dashsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/dashsync/config.yaml
  ///
  /// With no explicit path and no file found, defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("dashsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("dashsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.probe.interval_secs == 0 {
      return Err(eyre!("probe.interval_secs must be greater than zero"));
    }
    Ok(())
  }

  /// Liveness probe URL: explicit `probe.url`, else `health` under the API base.
  pub fn probe_url(&self) -> Result<String> {
    if let Some(url) = &self.probe.url {
      return Ok(url.clone());
    }
    let base = self
      .api
      .base_url
      .as_deref()
      .ok_or_else(|| eyre!("No probe URL configured. Set probe.url or api.base_url."))?;
    let base = url::Url::parse(base).map_err(|e| eyre!("Invalid API base URL {}: {}", base, e))?;
    let url = base
      .join("health")
      .map_err(|e| eyre!("Failed to build probe URL: {}", e))?;
    Ok(url.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_config_uses_defaults() {
    let config = Config::parse("{}").unwrap();
    assert_eq!(config.api.timeout(), Duration::from_secs(10));
    assert_eq!(config.probe.interval_secs, 60);
    assert_eq!(config.retry.max_retries, 3);
    assert_eq!(config.cache.stale_time(), Duration::from_secs(3600));
    assert_eq!(config.sync.debounce(), Duration::from_millis(300));
    assert_eq!(config.log.level, "info");
  }

  #[test]
  fn test_partial_sections_keep_other_defaults() {
    let config = Config::parse(
      r#"
api:
  base_url: https://merchant.example.com/api/
probe:
  interval_secs: 15
retry:
  max_retries: 5
"#,
    )
    .unwrap();

    assert_eq!(config.api.timeout_secs, 10);
    assert_eq!(config.probe.monitor_config().probe_interval, Duration::from_secs(15));
    assert_eq!(config.probe.stabilization_ms, 2_000);
    assert_eq!(config.retry.max_retries, 5);
    assert_eq!(config.retry.max_delay, Duration::from_millis(30_000));
  }

  #[test]
  fn test_probe_url_derived_from_base() {
    let config = Config::parse("api:\n  base_url: https://merchant.example.com/api/\n").unwrap();
    assert_eq!(
      config.probe_url().unwrap(),
      "https://merchant.example.com/api/health"
    );

    assert!(Config::default().probe_url().is_err());
  }

  #[test]
  fn test_zero_probe_interval_is_rejected() {
    let err = Config::parse("probe:\n  interval_secs: 0\n").unwrap_err();
    assert!(err.to_string().contains("interval_secs"));
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    let result = Config::load(Some(Path::new("/definitely/not/here.yaml")));
    assert!(result.is_err());
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dashsync.yaml");
    std::fs::write(&path, "sync:\n  debounce_ms: 50\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.sync.debounce(), Duration::from_millis(50));
  }
}
