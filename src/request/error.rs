use std::time::Duration;

/// Error from a network call made through the request client.
///
/// `Timeout` and `Network` are transient and retried with backoff; every other
/// variant is surfaced to the caller immediately.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
  #[error("request timed out after {0:?}")]
  Timeout(Duration),

  #[error("network error: {0}")]
  Network(String),

  #[error("server responded with {status}: {message}")]
  Status { status: u16, message: String },

  #[error("failed to decode response: {0}")]
  Decode(String),

  #[error("offline: network not attempted")]
  Offline,

  #[error("invalid request: {0}")]
  Invalid(String),
}

impl RequestError {
  /// Whether the failure is worth retrying.
  pub fn is_transient(&self) -> bool {
    matches!(self, RequestError::Timeout(_) | RequestError::Network(_))
  }

  pub fn network(message: impl Into<String>) -> Self {
    RequestError::Network(message.into())
  }

  pub fn status(status: u16, message: impl Into<String>) -> Self {
    RequestError::Status {
      status,
      message: message.into(),
    }
  }
}

impl From<reqwest::Error> for RequestError {
  fn from(e: reqwest::Error) -> Self {
    if let Some(status) = e.status() {
      RequestError::status(status.as_u16(), e.to_string())
    } else if e.is_decode() {
      RequestError::Decode(e.to_string())
    } else if e.is_builder() {
      RequestError::Invalid(e.to_string())
    } else {
      // Connect, timeout at the transport layer, body read failures
      RequestError::Network(e.to_string())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_transient_classification() {
    assert!(RequestError::Timeout(Duration::from_secs(10)).is_transient());
    assert!(RequestError::network("connection reset").is_transient());
    assert!(!RequestError::status(500, "boom").is_transient());
    assert!(!RequestError::status(404, "missing").is_transient());
    assert!(!RequestError::Decode("bad json".to_string()).is_transient());
    assert!(!RequestError::Offline.is_transient());
  }
}
