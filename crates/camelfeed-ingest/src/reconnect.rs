//! Reconnect policy for the firehose stream.
//!
//! The default is a fixed delay with unbounded retries: a permanent upstream
//! outage shows up as a repeating reconnect-and-fail log pattern rather than
//! process exit. Exponential backoff, a delay cap, a retry limit, and jitter
//! are opt-in through [`ReconnectConfig`].

use std::time::Duration;

/// Default delay between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Reconnect settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay once backoff has grown it.
    pub max_delay: Duration,
    /// Factor applied to the delay after each failed attempt. `1.0` keeps it fixed.
    pub backoff_multiplier: f64,
    /// Give up after this many consecutive attempts. `None` retries forever.
    pub max_retries: Option<u32>,
    /// Spread delays by up to ±25%.
    pub jitter: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::fixed(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectConfig {
    /// Fixed delay, unbounded retries, no jitter.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            max_retries: None,
            jitter: false,
        }
    }

    /// Exponential backoff from `initial_delay` up to `max_delay`, with jitter.
    pub fn exponential(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay: max_delay.max(initial_delay),
            backoff_multiplier: 2.0,
            max_retries: None,
            jitter: true,
        }
    }

    /// Set the retry limit.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Tracks consecutive reconnect attempts and hands out delays.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt: u32,
    current_delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        let current_delay = config.initial_delay;
        Self {
            config,
            attempt: 0,
            current_delay,
        }
    }

    /// Consecutive attempts since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// True once the retry limit has been reached.
    pub fn exhausted(&self) -> bool {
        self.config
            .max_retries
            .is_some_and(|max| self.attempt >= max)
    }

    /// Forget past failures. Called once a connection delivers an event.
    pub fn reset(&mut self) {
        if self.attempt > 0 {
            tracing::debug!("Reconnect policy reset after {} attempts", self.attempt);
        }
        self.attempt = 0;
        self.current_delay = self.config.initial_delay;
    }

    /// Delay before the next attempt, or `None` if retries are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.exhausted() {
            return None;
        }

        self.attempt += 1;
        let base = self.current_delay;

        let delay = if self.config.jitter {
            jittered(base, self.attempt)
        } else {
            base
        };

        let next_ms = (base.as_millis() as f64 * self.config.backoff_multiplier) as u64;
        self.current_delay = Duration::from_millis(next_ms).min(self.config.max_delay);

        Some(delay)
    }
}

/// Deterministic ±25% spread keyed on the attempt number.
fn jittered(delay: Duration, attempt: u32) -> Duration {
    let ms = delay.as_millis() as f64;
    // Fraction in [-0.5, 0.5]
    let fraction = f64::from(attempt.wrapping_mul(7) % 11) / 10.0 - 0.5;
    let jittered_ms = (ms + ms * 0.5 * fraction).max(1.0);
    Duration::from_millis(jittered_ms as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_fixed_and_unbounded() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        for _ in 0..1000 {
            assert_eq!(policy.next_delay(), Some(DEFAULT_RECONNECT_DELAY));
        }
        assert!(!policy.exhausted());
        assert_eq!(policy.attempt(), 1000);
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let config = ReconnectConfig {
            jitter: false,
            ..ReconnectConfig::exponential(Duration::from_millis(100), Duration::from_millis(350))
        };
        let mut policy = ReconnectPolicy::new(config);

        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(350)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(350)));
    }

    #[test]
    fn test_max_retries() {
        let config = ReconnectConfig::fixed(Duration::from_millis(10)).with_max_retries(2);
        let mut policy = ReconnectPolicy::new(config);

        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.exhausted());
        assert!(policy.next_delay().is_none());
    }

    #[test]
    fn test_reset_restores_initial_delay() {
        let config = ReconnectConfig {
            jitter: false,
            ..ReconnectConfig::exponential(Duration::from_millis(100), Duration::from_secs(10))
        }
        .with_max_retries(3);
        let mut policy = ReconnectPolicy::new(config);

        policy.next_delay();
        policy.next_delay();
        policy.next_delay();
        assert!(policy.exhausted());

        policy.reset();
        assert_eq!(policy.attempt(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let base = Duration::from_millis(1000);
        for attempt in 1..50 {
            let d = jittered(base, attempt).as_millis();
            assert!((750..=1250).contains(&d), "attempt {attempt}: {d}ms");
        }
    }
}
