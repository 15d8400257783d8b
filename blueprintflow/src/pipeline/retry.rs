//! Backoff between retry rounds.
//!
//! The engine sleeps for [`RetryBackoff::delay_for`] before dispatching a
//! retry round. The default has a zero base delay and never sleeps.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^(round - 1)
    #[default]
    Exponential,
    /// delay = base * round
    Linear,
    /// delay = base
    Constant,
}

/// Jitter strategy applied on top of the backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
    /// Random from base to min(max, previous * 3)
    Decorrelated,
}

/// Delay policy between retry rounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryBackoff {
    /// Base delay in milliseconds. Zero disables backoff.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub strategy: BackoffStrategy,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            base_delay_ms: 0,
            max_delay_ms: 30_000,
            strategy: BackoffStrategy::Exponential,
            jitter: JitterStrategy::None,
        }
    }
}

impl RetryBackoff {
    /// Creates a backoff policy with the given base delay.
    #[must_use]
    pub fn new(base_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            ..Self::default()
        }
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Returns true if the policy never sleeps.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.base_delay_ms == 0
    }

    fn raw_delay(&self, round: u32) -> u64 {
        let base = self.base_delay_ms;
        let step = round.max(1);
        let delay = match self.strategy {
            BackoffStrategy::Exponential => {
                base.saturating_mul(2u64.saturating_pow(step - 1))
            }
            BackoffStrategy::Linear => base.saturating_mul(u64::from(step)),
            BackoffStrategy::Constant => base,
        };
        delay.min(self.max_delay_ms)
    }

    /// Delay before the given retry round (1 for the first retry).
    #[must_use]
    pub fn delay_for(&self, round: u32) -> Duration {
        if self.is_disabled() {
            return Duration::ZERO;
        }

        let delay = self.raw_delay(round);
        let jittered = match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
            JitterStrategy::Decorrelated => {
                let base = self.base_delay_ms;
                let prev = if round > 1 { self.raw_delay(round - 1) } else { base };
                let upper = prev.saturating_mul(3).min(self.max_delay_ms);
                if upper <= base {
                    base
                } else {
                    rand::thread_rng().gen_range(base..=upper)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_never_sleeps() {
        let backoff = RetryBackoff::default();
        assert!(backoff.is_disabled());
        assert_eq!(backoff.delay_for(5), Duration::ZERO);
    }

    #[test]
    fn test_exponential_backoff() {
        let backoff = RetryBackoff::new(100);
        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_linear_backoff() {
        let backoff = RetryBackoff::new(100).with_strategy(BackoffStrategy::Linear);
        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(300));
    }

    #[test]
    fn test_constant_backoff() {
        let backoff = RetryBackoff::new(100).with_strategy(BackoffStrategy::Constant);
        assert_eq!(backoff.delay_for(1), backoff.delay_for(4));
    }

    #[test]
    fn test_max_delay_cap() {
        let backoff = RetryBackoff::new(1000).with_max_delay_ms(5000);
        assert_eq!(backoff.delay_for(10), Duration::from_millis(5000));
    }

    #[test]
    fn test_full_jitter_range() {
        let backoff = RetryBackoff::new(1000).with_jitter(JitterStrategy::Full);
        for _ in 0..100 {
            assert!(backoff.delay_for(1).as_millis() <= 1000);
        }
    }

    #[test]
    fn test_decorrelated_jitter_bounds() {
        let backoff = RetryBackoff::new(100)
            .with_max_delay_ms(1000)
            .with_jitter(JitterStrategy::Decorrelated);
        for round in 1..6 {
            let delay = backoff.delay_for(round).as_millis();
            assert!((100..=1000).contains(&delay));
        }
    }

    #[test]
    fn test_backoff_deserializes_snake_case() {
        let backoff: RetryBackoff =
            serde_json::from_str(r#"{"base_delay_ms": 50, "strategy": "linear", "jitter": "equal"}"#)
                .unwrap();
        assert_eq!(backoff.strategy, BackoffStrategy::Linear);
        assert_eq!(backoff.jitter, JitterStrategy::Equal);
        assert_eq!(backoff.max_delay_ms, 30_000);
    }
}
