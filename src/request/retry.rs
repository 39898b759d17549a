use serde::Deserialize;
use std::time::Duration;

/// Bounded exponential backoff.
///
/// The delay before retry `n` (1-indexed) is `min(base_delay * 2^n, max_delay)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
  /// Retries after the initial attempt
  pub max_retries: u32,
  #[serde(with = "millis")]
  pub base_delay: Duration,
  #[serde(with = "millis")]
  pub max_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: 3,
      base_delay: Duration::from_millis(1_000),
      max_delay: Duration::from_millis(30_000),
    }
  }
}

impl RetryPolicy {
  /// A policy that makes exactly one attempt.
  pub fn none() -> Self {
    Self {
      max_retries: 0,
      ..Self::default()
    }
  }

  /// Delay to wait before retry number `attempt` (1-indexed).
  pub fn delay_for(&self, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    self
      .base_delay
      .checked_mul(factor)
      .map_or(self.max_delay, |d| d.min(self.max_delay))
  }

  /// Total attempts including the first.
  pub fn max_attempts(&self) -> u32 {
    self.max_retries + 1
  }
}

/// Per-request retry bookkeeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryState {
  pub attempt: u32,
}

impl RetryState {
  /// Advance to the next retry and return how long to wait first, or `None`
  /// if the retry budget is spent.
  pub fn next_delay(&mut self, policy: &RetryPolicy) -> Option<Duration> {
    if self.attempt >= policy.max_retries {
      return None;
    }
    self.attempt += 1;
    Some(policy.delay_for(self.attempt))
  }
}

mod millis {
  use serde::{Deserialize, Deserializer};
  use std::time::Duration;

  pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
  where
    D: Deserializer<'de>,
  {
    let ms = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(ms))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_delay_doubles_until_cap() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.delay_for(1), Duration::from_millis(2_000));
    assert_eq!(policy.delay_for(2), Duration::from_millis(4_000));
    assert_eq!(policy.delay_for(3), Duration::from_millis(8_000));
    assert_eq!(policy.delay_for(4), Duration::from_millis(16_000));
    assert_eq!(policy.delay_for(5), Duration::from_millis(30_000));
    assert_eq!(policy.delay_for(40), Duration::from_millis(30_000));
  }

  #[test]
  fn test_delay_is_non_decreasing() {
    let policy = RetryPolicy::default();
    let delays: Vec<_> = (1..=64).map(|n| policy.delay_for(n)).collect();
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));
  }

  #[test]
  fn test_retry_state_respects_budget() {
    let policy = RetryPolicy::default();
    let mut state = RetryState::default();

    assert_eq!(state.next_delay(&policy), Some(Duration::from_millis(2_000)));
    assert_eq!(state.next_delay(&policy), Some(Duration::from_millis(4_000)));
    assert_eq!(state.next_delay(&policy), Some(Duration::from_millis(8_000)));
    assert_eq!(state.next_delay(&policy), None);
    assert_eq!(state.attempt, 3);
  }

  #[test]
  fn test_none_policy_never_retries() {
    let mut state = RetryState::default();
    assert_eq!(state.next_delay(&RetryPolicy::none()), None);
  }

  #[test]
  fn test_deserialize_from_millis() {
    let policy: RetryPolicy = serde_yaml::from_str("max_retries: 5\nbase_delay: 250\n").unwrap();
    assert_eq!(policy.max_retries, 5);
    assert_eq!(policy.base_delay, Duration::from_millis(250));
    assert_eq!(policy.max_delay, Duration::from_millis(30_000));
  }
}
