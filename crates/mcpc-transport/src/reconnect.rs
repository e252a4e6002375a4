//! Exponential-backoff reconnection policy shared by the Streamable HTTP
//! listen stream and legacy SSE's listen loop.
//!
//! Pure function, no side effects: `delay(attempt)`. The attempt counter
//! itself is owned by the caller and reset on any successful event
//! delivery.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectOptions {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub growth_factor: f64,
    pub max_retries: u32,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            growth_factor: 2.0,
            max_retries: 5,
        }
    }
}

impl ReconnectOptions {
    /// `delay(attempt) = min(initial * growth^attempt, max)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.as_secs_f64() * self.growth_factor.powi(attempt as i32);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Whether a retry should still be attempted after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn delay_never_exceeds_cap_and_is_monotonic(
            initial_ms in 1u64..5_000,
            max_ms in 5_000u64..60_000,
            growth in 1.01f64..4.0,
            attempt in 0u32..40,
        ) {
            let opts = ReconnectOptions {
                initial_delay: Duration::from_millis(initial_ms),
                max_delay: Duration::from_millis(max_ms),
                growth_factor: growth,
                max_retries: 10,
            };
            let d_n = opts.delay(attempt);
            let d_n1 = opts.delay(attempt + 1);
            prop_assert!(d_n <= opts.max_delay);
            prop_assert!(d_n1 >= d_n);
        }
    }
}
