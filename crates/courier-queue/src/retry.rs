//! Retry policies for connecting and publishing.
//!
//! The harness never retries implicitly; callers inject a policy where
//! they want one (see `redis::connect_with_retry`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryStrategy {
    /// No retry.
    None,
    /// Fixed delay between attempts.
    Fixed,
    /// Exponential backoff with optional jitter.
    Exponential,
    /// Linear backoff.
    Linear,
}

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Backoff strategy.
    pub strategy: RetryStrategy,

    /// Maximum number of retry attempts.
    pub max_attempts: u32,

    /// Initial delay in milliseconds.
    pub initial_delay_ms: u64,

    /// Maximum delay in milliseconds.
    pub max_delay_ms: u64,

    /// Backoff multiplier (exponential strategy).
    pub multiplier: f64,

    /// Add random jitter to delays.
    pub jitter: bool,

    /// Jitter factor (0.0 to 1.0).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3)
    }
}

impl RetryPolicy {
    /// Creates a policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            strategy: RetryStrategy::None,
            max_attempts: 0,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            multiplier: 1.0,
            jitter: false,
            jitter_factor: 0.0,
        }
    }

    /// Creates a fixed-delay retry policy.
    #[must_use]
    pub const fn fixed(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            strategy: RetryStrategy::Fixed,
            max_attempts,
            initial_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            multiplier: 1.0,
            jitter: false,
            jitter_factor: 0.0,
        }
    }

    /// Creates an exponential backoff policy with jitter, starting at
    /// 1 second and capped at 1 minute.
    #[must_use]
    pub const fn exponential(max_attempts: u32) -> Self {
        Self {
            strategy: RetryStrategy::Exponential,
            max_attempts,
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            jitter: true,
            jitter_factor: 0.1,
        }
    }

    /// Creates a linear backoff policy: the delay grows by
    /// `increment_ms` per attempt.
    #[must_use]
    pub const fn linear(max_attempts: u32, increment_ms: u64) -> Self {
        Self {
            strategy: RetryStrategy::Linear,
            max_attempts,
            initial_delay_ms: increment_ms,
            max_delay_ms: increment_ms * max_attempts as u64,
            multiplier: 1.0,
            jitter: false,
            jitter_factor: 0.0,
        }
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Enables jitter.
    #[must_use]
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter = true;
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Disables jitter.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self.jitter_factor = 0.0;
        self
    }

    /// Returns true if the given attempt number is allowed.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.strategy != RetryStrategy::None && attempt <= self.max_attempts
    }

    /// Calculate the delay before the given attempt number (1-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.strategy == RetryStrategy::None {
            return Duration::ZERO;
        }

        let base_delay = match self.strategy {
            RetryStrategy::None => 0,
            RetryStrategy::Fixed => self.initial_delay_ms,
            RetryStrategy::Exponential => {
                let exp = attempt.saturating_sub(1);
                (self.initial_delay_ms as f64 * self.multiplier.powi(exp as i32)) as u64
            }
            RetryStrategy::Linear => self.initial_delay_ms.saturating_mul(u64::from(attempt)),
        };

        let capped_delay = base_delay.min(self.max_delay_ms);

        let final_delay = if self.jitter && self.jitter_factor > 0.0 {
            let jitter_range = (capped_delay as f64 * self.jitter_factor) as u64;
            let jitter = rand_jitter(jitter_range);
            capped_delay
                .saturating_add(jitter)
                .saturating_sub(jitter_range / 2)
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay)
    }
}

/// Generate random jitter using a simple LCG.
fn rand_jitter(range: u64) -> u64 {
    use std::time::SystemTime;

    if range == 0 {
        return 0;
    }

    let seed = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    let a: u64 = 6364136223846793005;
    let c: u64 = 1442695040888963407;

    let random = seed.wrapping_mul(a).wrapping_add(c);
    random % range
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_retry() {
        let policy = RetryPolicy::none();
        assert!(!policy.should_retry(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
    }

    #[test]
    fn test_fixed_retry() {
        let policy = RetryPolicy::fixed(3, 5000);

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(3));
        assert!(!policy.should_retry(4));

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(5000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(5000));
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy::exponential(3).without_jitter();

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::linear(3, 1000);

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(3000));
    }

    #[test]
    fn test_max_delay_cap() {
        let policy = RetryPolicy::exponential(10)
            .with_max_delay(Duration::from_secs(10))
            .without_jitter();
        assert!(policy.delay_for_attempt(10) <= Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_near_base_delay() {
        let policy = RetryPolicy::fixed(3, 1000).with_jitter(0.1);

        // Base 1000ms, jitter range 100ms: delay lands in [950, 1050]
        for _ in 0..10 {
            let delay = policy.delay_for_attempt(1).as_millis() as u64;
            assert!((950..=1050).contains(&delay), "delay out of range: {}", delay);
        }
    }

    #[test]
    fn test_jitter_factor_clamped() {
        let policy = RetryPolicy::fixed(1, 100).with_jitter(7.0);
        assert!((policy.jitter_factor - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_policy_serializes() {
        let policy = RetryPolicy::exponential(2);
        let json = serde_json::to_string(&policy).unwrap();
        let parsed: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.max_attempts, 2);
        assert_eq!(parsed.strategy, RetryStrategy::Exponential);
        assert!(parsed.jitter);
    }
}
