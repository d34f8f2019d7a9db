//! Retry policy: when and how a failed job re-enters the queue.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Leave the job in `Failed` until a manual retry.
    GiveUp,
    /// Re-queue the job after the given delay.
    RetryAfter(Duration),
}

/// Exponential backoff policy with caps.
///
/// The delay is served as a scheduled re-queue by the orchestrator,
/// never as a sleep inside a worker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum automatic attempts after a failure; once consumed the job
    /// stays `Failed` until a manual retry resets the budget.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first automatic retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Growth factor applied per attempt.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Upper bound on the backoff delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    300_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Decide whether a job that just failed gets another automatic attempt.
    ///
    /// `attempts` is the number of attempts consumed since the last manual
    /// retry (1 = the attempt that just failed). `transient` comes from the
    /// error classification; permanent errors never retry automatically.
    pub fn decide(&self, attempts: u32, transient: bool) -> RetryDecision {
        if !transient || attempts > self.max_retries {
            return RetryDecision::GiveUp;
        }

        RetryDecision::RetryAfter(self.delay_for(attempts))
    }

    /// Backoff delay before attempt `attempts + 1`.
    ///
    /// `base * multiplier^(attempts - 1)`, capped at the maximum delay.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(32);
        let raw = self.base_delay_ms as f64 * self.multiplier.powi(exponent as i32);
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_second_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 5,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
        }
    }

    #[test]
    fn test_delays_grow_exponentially() {
        let p = one_second_policy();
        assert_eq!(p.delay_for(1), Duration::from_secs(1));
        assert_eq!(p.delay_for(2), Duration::from_secs(2));
        assert_eq!(p.delay_for(3), Duration::from_secs(4));
        assert_eq!(p.delay_for(4), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_is_capped() {
        let p = RetryPolicy {
            max_retries: 20,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 5_000,
        };
        assert_eq!(p.delay_for(10), Duration::from_secs(5));
    }

    #[test]
    fn test_permanent_errors_never_retry() {
        let p = one_second_policy();
        assert_eq!(p.decide(1, false), RetryDecision::GiveUp);
    }

    #[test]
    fn test_gives_up_past_max_retries() {
        let p = RetryPolicy {
            max_retries: 2,
            ..one_second_policy()
        };
        assert!(matches!(p.decide(1, true), RetryDecision::RetryAfter(_)));
        assert!(matches!(p.decide(2, true), RetryDecision::RetryAfter(_)));
        assert_eq!(p.decide(3, true), RetryDecision::GiveUp);
    }

    #[test]
    fn test_third_attempt_waits_cumulative_three_seconds() {
        // Two failures with base 1s and multiplier 2: the job waits 1s
        // then 2s, so the third attempt starts no earlier than ~3s
        // after the first failure.
        let p = one_second_policy();
        let first = match p.decide(1, true) {
            RetryDecision::RetryAfter(d) => d,
            _ => panic!("expected retry"),
        };
        let second = match p.decide(2, true) {
            RetryDecision::RetryAfter(d) => d,
            _ => panic!("expected retry"),
        };
        assert_eq!(first + second, Duration::from_secs(3));
    }

    #[test]
    fn test_toml_round_trip_with_defaults() {
        let parsed: RetryPolicy = toml::from_str("").unwrap();
        assert_eq!(parsed, RetryPolicy::default());

        let parsed: RetryPolicy = toml::from_str("max_retries = 2\nbase_delay_ms = 500").unwrap();
        assert_eq!(parsed.max_retries, 2);
        assert_eq!(parsed.base_delay_ms, 500);
        assert_eq!(parsed.multiplier, 2.0);
    }
}
