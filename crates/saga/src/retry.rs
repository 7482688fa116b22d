use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Bounded retry with exponential backoff and jitter for step invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds.
    pub initial_interval_ms: u32,
    /// Upper bound of a single delay in milliseconds.
    pub max_interval_ms: u32,
    pub multiplier: f64,
    /// Jitter fraction in `[0.0, 1.0]`; 0.25 means +/-25%.
    pub jitter_percent: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval_ms: 500,
            max_interval_ms: 10_000,
            multiplier: 2.0,
            jitter_percent: 0.25,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_interval_ms: u32,
        max_interval_ms: u32,
        multiplier: f64,
        jitter_percent: f64,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_interval_ms,
            max_interval_ms,
            multiplier,
            jitter_percent: jitter_percent.clamp(0.0, 1.0),
        }
    }

    /// Retries without waiting. Used by tests and the in-memory demo.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, 0, 0, 1.0, 0.0)
    }

    /// Returns true if another attempt may follow attempt number `attempt` (1-based).
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before retry `retry` (0-based: the first retry is 0).
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        let capped_ms = self.capped_delay_ms(retry);

        let jitter = self.jitter_percent.abs();
        let jitter_factor = if jitter == 0.0 {
            1.0
        } else {
            let mut rng = rand::thread_rng();
            1.0 + rng.gen_range(-jitter..=jitter)
        };

        Duration::from_millis(to_millis(capped_ms * jitter_factor))
    }

    pub fn calculate_delay_without_jitter(&self, retry: u32) -> Duration {
        Duration::from_millis(to_millis(self.capped_delay_ms(retry)))
    }

    fn capped_delay_ms(&self, retry: u32) -> f64 {
        const MAX_EXP: i32 = 30;
        let exp = i32::try_from(retry).map_or(MAX_EXP, |e| e.min(MAX_EXP));
        let base = f64::from(self.initial_interval_ms) * self.multiplier.powi(exp);
        base.min(f64::from(self.max_interval_ms))
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_millis(value: f64) -> u64 {
    if !value.is_finite() || value <= 0.0 {
        0
    } else {
        value.min(f64::from(u32::MAX)) as u64
    }
}
