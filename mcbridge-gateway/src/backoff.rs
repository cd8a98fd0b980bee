//! Exponential reconnect backoff with a cap and jitter.
//!
//! Delays start at the configured minimum and double per consecutive
//! failure up to the cap. Jitter of up to 25% is added so a fleet of
//! bridges does not reconnect in lockstep after a gateway restart, but the
//! delay never drops below the minimum.

use std::time::Duration;

use rand::Rng;

/// Reconnect delay generator.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    min: Duration,
    max: Duration,
    attempt: u32,
}

impl ExponentialBackoff {
    /// Create a backoff ranging from `min` to `max` per attempt.
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        let min = min.max(Duration::from_millis(1));
        Self {
            min,
            max: max.max(min),
            attempt: 0,
        }
    }

    /// Delay before the next attempt. Each call advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.attempt.min(16); // 2^16 × min already dwarfs any cap
        let base = self
            .min
            .saturating_mul(2_u32.saturating_pow(exp))
            .min(self.max);
        self.attempt = self.attempt.saturating_add(1);

        let jitter = base.mul_f64(rand::thread_rng().gen_range(0.0..0.25));
        (base + jitter).clamp(self.min, self.max)
    }

    /// Reset after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of consecutive failures so far.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
