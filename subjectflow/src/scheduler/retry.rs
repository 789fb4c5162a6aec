//! Retry of failed invocations with configurable backoff and jitter.
//!
//! A retried node keeps its cache reservation between attempts, so waiters
//! on the same fingerprint only ever see the final outcome.

use crate::errors::InvocationError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^(attempt - 1)
    #[default]
    Exponential,
    /// delay = base * attempt
    Linear,
    /// delay = base
    Constant,
}

/// Jitter applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    None,
    /// Random from 0 to delay
    #[default]
    Full,
    /// Half fixed, half random
    Equal,
}

/// Configuration for retry behavior.
///
/// The default performs a single attempt, i.e. no retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts per node (including the initial one).
    pub max_attempts: usize,
    /// Base delay between attempts in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
    /// Exit codes that trigger a retry. Empty means every failure does.
    pub retry_on_exit_codes: Vec<i32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff: BackoffStrategy::Exponential,
            jitter: JitterStrategy::Full,
            retry_on_exit_codes: Vec::new(),
        }
    }
}

impl RetryConfig {
    /// Creates a config that never retries.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }

    /// Restricts retries to the given exit codes.
    #[must_use]
    pub fn with_retry_on_exit_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.retry_on_exit_codes = codes.into_iter().collect();
        self
    }

    /// Returns true if the error is worth another attempt.
    #[must_use]
    pub fn is_retryable(&self, error: &InvocationError) -> bool {
        self.retry_on_exit_codes.is_empty()
            || error
                .exit_code
                .is_some_and(|code| self.retry_on_exit_codes.contains(&code))
    }
}

/// Attempt bookkeeping for one node.
#[derive(Debug, Default)]
pub struct RetryState {
    /// Attempts started so far.
    pub attempt: usize,
}

impl RetryState {
    /// Creates a new retry state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a new attempt and returns its 1-based number.
    pub fn begin_attempt(&mut self) -> usize {
        self.attempt += 1;
        self.attempt
    }

    /// Returns true if `error` should be retried after the current attempt.
    #[must_use]
    pub fn should_retry(&self, config: &RetryConfig, error: &InvocationError) -> bool {
        self.attempt < config.max_attempts && config.is_retryable(error)
    }

    /// Calculates the delay before the next attempt.
    #[must_use]
    pub fn calculate_delay(&self, config: &RetryConfig) -> Duration {
        let base = config.base_delay_ms;
        let max = config.max_delay_ms;
        let step = self.attempt.saturating_sub(1);

        let delay = match config.backoff {
            BackoffStrategy::Exponential => {
                let exponent = u32::try_from(step).unwrap_or(u32::MAX);
                base.saturating_mul(2_u64.saturating_pow(exponent)).min(max)
            }
            BackoffStrategy::Linear => {
                let factor = u64::try_from(step + 1).unwrap_or(u64::MAX);
                base.saturating_mul(factor).min(max)
            }
            BackoffStrategy::Constant => base.min(max),
        };

        let jittered = match config.jitter {
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
        };

        Duration::from_millis(jittered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_never_retries() {
        let config = RetryConfig::default();
        let mut state = RetryState::new();
        state.begin_attempt();

        assert!(!state.should_retry(&config, &InvocationError::exit(Some(1), "")));
    }

    #[test]
    fn test_attempts_are_bounded() {
        let config = RetryConfig::new().with_max_attempts(3);
        let err = InvocationError::exit(Some(1), "");
        let mut state = RetryState::new();

        assert_eq!(state.begin_attempt(), 1);
        assert!(state.should_retry(&config, &err));
        assert_eq!(state.begin_attempt(), 2);
        assert!(state.should_retry(&config, &err));
        assert_eq!(state.begin_attempt(), 3);
        assert!(!state.should_retry(&config, &err));
    }

    #[test]
    fn test_exit_code_filter() {
        let config = RetryConfig::new()
            .with_max_attempts(2)
            .with_retry_on_exit_codes([75]);
        let mut state = RetryState::new();
        state.begin_attempt();

        assert!(state.should_retry(&config, &InvocationError::exit(Some(75), "")));
        assert!(!state.should_retry(&config, &InvocationError::exit(Some(1), "")));
        assert!(!state.should_retry(&config, &InvocationError::new("timed out")));
    }

    #[test]
    fn test_exponential_backoff_without_jitter() {
        let config = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_max_delay_ms(350)
            .with_jitter(JitterStrategy::None);
        let mut state = RetryState::new();

        let delays: Vec<u128> = (0..4)
            .map(|_| {
                state.begin_attempt();
                state.calculate_delay(&config).as_millis()
            })
            .collect();
        assert_eq!(delays, vec![100, 200, 350, 350]);
    }

    #[test]
    fn test_linear_and_constant_backoff() {
        let linear = RetryConfig::new()
            .with_base_delay_ms(10)
            .with_backoff(BackoffStrategy::Linear)
            .with_jitter(JitterStrategy::None);
        let constant = linear.clone().with_backoff(BackoffStrategy::Constant);
        let mut state = RetryState::new();
        state.begin_attempt();
        state.begin_attempt();

        assert_eq!(state.calculate_delay(&linear), Duration::from_millis(20));
        assert_eq!(state.calculate_delay(&constant), Duration::from_millis(10));
    }

    #[test]
    fn test_full_jitter_bounded() {
        let config = RetryConfig::new().with_base_delay_ms(100);
        let mut state = RetryState::new();
        state.begin_attempt();

        for _ in 0..50 {
            assert!(state.calculate_delay(&config) <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: RetryConfig =
            serde_json::from_str(r#"{"max_attempts": 2, "jitter": "equal"}"#).unwrap();
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.jitter, JitterStrategy::Equal);
        assert_eq!(config.backoff, BackoffStrategy::Exponential);
    }
}
