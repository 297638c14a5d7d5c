//! Reconnection Backoff Policy
//!
//! Exponential backoff with jitter for WebSocket reconnection. The
//! delay grows per attempt up to a cap and resets to the minimum after
//! a sustained period of healthy operation, so one transient blip never
//! leaves the client stuck at the worst-case delay.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection backoff.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first reconnection attempt.
    pub min_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential growth (e.g. 2.0 doubles each attempt).
    pub multiplier: f64,
    /// Jitter factor as a fraction (e.g. 0.1 = ±10% randomization).
    pub jitter_factor: f64,
    /// Live time after which the delay resets to `min_delay`.
    pub reset_threshold: Duration,
    /// Maximum number of reconnection attempts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
            reset_threshold: Duration::from_secs(60),
            max_attempts: 0, // Unlimited
        }
    }
}

/// Reconnection backoff policy.
///
/// # Example
///
/// ```rust
/// use binance_stream_client::infrastructure::binance::reconnect::{BackoffConfig, BackoffPolicy};
/// use std::time::Duration;
///
/// let mut policy = BackoffPolicy::new(BackoffConfig::default());
///
/// // Delay for the first attempt.
/// let delay = policy.next_delay();
/// assert!(delay.is_some());
///
/// // A long healthy connection resets the schedule.
/// policy.note_uptime(Duration::from_secs(300));
/// ```
#[derive(Debug)]
pub struct BackoffPolicy {
    config: BackoffConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl BackoffPolicy {
    /// Create a new policy.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        let min_delay = config.min_delay;
        Self {
            config,
            current_delay: min_delay,
            attempt_count: 0,
        }
    }

    /// Get the next delay, applying exponential growth with jitter.
    ///
    /// Returns `None` once max attempts have been exhausted.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.config.max_attempts > 0 && self.attempt_count >= self.config.max_attempts {
            return None;
        }

        self.attempt_count += 1;

        let delay_with_jitter = self.apply_jitter(self.current_delay);

        // Grow the delay for subsequent calls, capped at max_delay.
        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.current_delay.as_millis() as f64 * self.config.multiplier).round();
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        } else {
            0
        };
        let capped = next_millis.min(self.config.max_delay.as_millis());
        self.current_delay = Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX));

        Some(delay_with_jitter)
    }

    /// Record how long the previous connection stayed healthy. An
    /// uptime at or above the configured reset threshold resets the
    /// schedule to the minimum delay.
    pub const fn note_uptime(&mut self, uptime: Duration) {
        if uptime.as_millis() >= self.config.reset_threshold.as_millis() {
            self.reset();
        }
    }

    /// Reset the policy to its initial schedule.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.min_delay;
        self.attempt_count = 0;
    }

    /// Get the current attempt count.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Check whether reconnection should continue.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    /// Apply jitter to a duration.
    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter_config() -> BackoffConfig {
        BackoffConfig {
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_factor: 0.0, // No jitter for predictable testing
            reset_threshold: Duration::from_secs(60),
            max_attempts: 0,
        }
    }

    #[test]
    fn default_config_values() {
        let config = BackoffConfig::default();
        assert_eq!(config.min_delay, Duration::from_millis(500));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!((config.multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.reset_threshold, Duration::from_secs(60));
        assert_eq!(config.max_attempts, 0);
    }

    #[test]
    fn exponential_growth() {
        let mut policy = BackoffPolicy::new(no_jitter_config());

        assert_eq!(policy.next_delay().unwrap(), Duration::from_millis(100));
        assert_eq!(policy.next_delay().unwrap(), Duration::from_millis(200));
        assert_eq!(policy.next_delay().unwrap(), Duration::from_millis(400));
        assert_eq!(policy.next_delay().unwrap(), Duration::from_millis(800));
    }

    #[test]
    fn delay_is_capped() {
        let config = BackoffConfig {
            min_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(2000),
            multiplier: 4.0,
            jitter_factor: 0.0,
            reset_threshold: Duration::from_secs(60),
            max_attempts: 0,
        };
        let mut policy = BackoffPolicy::new(config);

        let _ = policy.next_delay();
        assert_eq!(policy.next_delay().unwrap(), Duration::from_millis(2000));
        assert_eq!(policy.next_delay().unwrap(), Duration::from_millis(2000));
    }

    #[test]
    fn max_attempts_exhausts() {
        let config = BackoffConfig {
            max_attempts: 3,
            ..no_jitter_config()
        };
        let mut policy = BackoffPolicy::new(config);

        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert_eq!(policy.attempt_count(), 3);

        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());
    }

    #[test]
    fn sustained_uptime_resets_schedule() {
        let mut policy = BackoffPolicy::new(no_jitter_config());

        let _ = policy.next_delay();
        let _ = policy.next_delay();
        let _ = policy.next_delay();

        // Below the threshold: schedule keeps growing.
        policy.note_uptime(Duration::from_secs(5));
        assert_eq!(policy.next_delay().unwrap(), Duration::from_millis(800));

        // At/above the threshold: back to the minimum.
        policy.note_uptime(Duration::from_secs(60));
        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay().unwrap(), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..100 {
            let mut policy = BackoffPolicy::new(BackoffConfig {
                min_delay: Duration::from_millis(1000),
                jitter_factor: 0.1,
                ..no_jitter_config()
            });

            let millis = policy.next_delay().unwrap().as_millis();
            assert!(millis >= 900, "delay {millis}ms is below minimum 900ms");
            assert!(millis <= 1100, "delay {millis}ms is above maximum 1100ms");
        }
    }

    #[test]
    fn unlimited_attempts() {
        let mut policy = BackoffPolicy::new(no_jitter_config());

        for _ in 0..1000 {
            assert!(policy.should_retry());
            assert!(policy.next_delay().is_some());
        }
    }
}
