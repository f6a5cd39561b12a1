// src/tier/retry.rs — Backoff policy for network tiers
//
// Retries: 429, 5xx, timeouts, connection resets (all `TierFailure::Transient`).
// Does NOT retry: rejections, unavailability, or any failure of a local tier.

use std::time::Duration;

use super::TierFailure;
use crate::core::types::Tier;
use crate::infra::config::RetrySettings;

/// Exponential backoff with deterministic jitter and a cap.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            backoff_factor: settings.backoff_factor,
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter_fraction: settings.jitter_fraction.clamp(0.0, 1.0),
        }
    }

    /// Whether a failed call should be followed by another one.
    /// `calls` is how many calls this attempt has made so far.
    pub fn should_retry(&self, tier: Tier, failure: &TierFailure, calls: u32, max_calls: u32) -> bool {
        tier.is_network() && failure.is_retriable() && calls < max_calls
    }

    /// Delay before retry number `retry` (0-indexed). A server-supplied
    /// hint wins over the computed backoff but is still capped.
    pub fn delay_for_attempt(&self, retry: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint.min(self.max_delay);
        }

        let base_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_factor.powi(retry as i32);
        let capped_ms = base_ms.min(self.max_delay.as_millis() as f64);

        let jitter = deterministic_jitter(retry, self.jitter_fraction);
        let final_ms = (capped_ms * jitter).min(self.max_delay.as_millis() as f64);

        Duration::from_millis(final_ms.max(0.0) as u64)
    }
}

/// Multiplier in [1 - fraction, 1 + fraction]; reproducible per retry so
/// paused-clock tests see fixed delays.
fn deterministic_jitter(retry: u32, fraction: f64) -> f64 {
    let hash = (retry.wrapping_mul(2654435761)) as f64 / u32::MAX as f64; // 0.0..1.0
    1.0 + fraction * (2.0 * hash - 1.0)
}
