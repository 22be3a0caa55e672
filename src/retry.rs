//! Retry scheduling with bounded exponential backoff and jitter.
//!
//! Each identity carries its own attempt counter. Any successful
//! reconciliation resets it; failures after a reset start counting again,
//! so unrelated successes never inherit old failure history.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Default retry configuration.
const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_BASE_DELAY_MS: u64 = 100;
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
const DEFAULT_JITTER_FACTOR: f64 = 0.1;

/// Backoff policy for failed reconciliation attempts.
///
/// Pluggable per controller; this default is bounded exponential backoff
/// with a delay cap and an attempt ceiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts for one failure chain.
    pub max_attempts: u32,
    /// Base delay for exponential backoff (milliseconds).
    pub base_delay_ms: u64,
    /// Delay cap (milliseconds).
    pub max_delay_ms: u64,
    /// Jitter factor added on top of the computed delay (0.0 - 1.0).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with custom bounds.
    pub fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }

    /// Set the jitter factor.
    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    /// Whether another attempt is allowed after `attempt` completed attempts.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the next attempt, given the number of completed
    /// attempts.
    ///
    /// Formula: `min(base * 2^(attempt-1), cap) + jitter`. Jitter spreads
    /// out retries so many identities failing together do not re-arrive as
    /// one thundering herd.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let exponential = self
            .base_delay_ms
            .saturating_mul(2_u64.saturating_pow(exponent));
        let capped = exponential.min(self.max_delay_ms);

        let jitter_ms = if self.jitter_factor > 0.0 {
            let range = (capped as f64) * self.jitter_factor;
            if range >= 1.0 {
                rand::thread_rng().gen_range(0.0..range).floor() as u64
            } else {
                0
            }
        } else {
            0
        };

        Duration::from_millis(capped.saturating_add(jitter_ms))
    }
}

/// Per-identity retry bookkeeping for one failure chain.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    attempts: u32,
    last_failure: Option<String>,
}

impl RetryState {
    /// Create a fresh state with zero attempts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed attempts in the current chain.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Description of the most recent failure, if any.
    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    /// Record a failed attempt.
    pub fn record_failure(&mut self, reason: impl Into<String>) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_failure = Some(reason.into());
    }

    /// Reset after a success or an exhausted chain. A later failure starts
    /// a new chain from zero.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.last_failure = None;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay_ms, 100);
        assert_eq!(policy.max_delay_ms, 30_000);
    }

    #[test]
    fn test_should_retry_respects_ceiling() {
        let policy = RetryPolicy::new(3, 10, 1000);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = RetryPolicy::new(5, 100, 10_000).with_jitter(0.0);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::new(10, 100, 500).with_jitter(0.0);
        assert_eq!(policy.delay_for(5), Duration::from_millis(500));
        assert_eq!(policy.delay_for(9), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::new(5, 100, 10_000).with_jitter(0.2);
        let delay = policy.delay_for(2);
        assert!(delay >= Duration::from_millis(200));
        assert!(delay < Duration::from_millis(240));
    }

    #[test]
    fn test_retry_state_counts_and_resets() {
        let mut state = RetryState::new();
        assert_eq!(state.attempts(), 0);

        state.record_failure("first");
        state.record_failure("second");
        assert_eq!(state.attempts(), 2);
        assert_eq!(state.last_failure(), Some("second"));

        state.reset();
        assert_eq!(state.attempts(), 0);
        assert!(state.last_failure().is_none());
    }
}
