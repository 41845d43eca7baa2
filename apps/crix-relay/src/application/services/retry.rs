//! Retry Policy
//!
//! Fixed-interval retry used by every reconnect loop in the relay. Attempts
//! are unbounded and the interval never grows. An optional jitter factor
//! spreads simultaneous retries without changing the mean interval.

use std::time::Duration;

use rand::Rng;

/// Fixed-interval retry policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    interval: Duration,
    jitter_factor: f64,
}

impl RetryPolicy {
    /// Create a policy with no jitter.
    #[must_use]
    pub const fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            jitter_factor: 0.0,
        }
    }

    /// Apply a jitter factor as a fraction (e.g. 0.1 = ±10%).
    ///
    /// The factor is clamped to `[0.0, 1.0]`.
    #[must_use]
    pub const fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor.clamp(0.0, 1.0);
        self
    }

    /// Base interval between attempts.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Delay before the next attempt.
    #[must_use]
    pub fn next_delay(&self) -> Duration {
        if self.jitter_factor <= 0.0 || self.interval.is_zero() {
            return self.interval;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = self.interval.as_millis() as f64;
        let jitter_range = base_millis * self.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }

    /// Sleep for the next delay.
    pub async fn wait(&self) {
        tokio::time::sleep(self.next_delay()).await;
    }
}
