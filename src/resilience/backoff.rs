//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

use crate::resilience::retries::RetryConfig;

/// Deterministic part of the delay before retry `attempt` (1-based):
/// `min(initial × multiplier^(attempt−1), max)`.
pub fn capped_delay_ms(attempt: u32, config: &RetryConfig) -> u64 {
    if attempt == 0 {
        return 0;
    }
    let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
    let raw = config.initial_delay_ms as f64 * config.backoff_multiplier.powi(exponent);
    // powi overflows to infinity for large attempts; min() clamps it.
    raw.min(config.max_delay_ms as f64) as u64
}

/// Calculate exponential backoff delay with jitter.
///
/// Jitter is uniform in `[0, jitter_factor × capped]`, so the result never
/// exceeds `max_delay_ms × (1 + jitter_factor)`.
pub fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let capped = capped_delay_ms(attempt, config);
    let jitter_range = (capped as f64 * config.jitter_factor).floor() as u64;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..=jitter_range)
    } else {
        0
    };
    Duration::from_millis(capped + jitter)
}

/// Step schedule: attempt 1 uses the first tier, later attempts walk the list
/// and stay on the last tier once it is exhausted.
pub fn tiered_delay(attempt: u32, tiers: &[Duration]) -> Duration {
    if tiers.is_empty() || attempt == 0 {
        return Duration::ZERO;
    }
    let index = (attempt as usize - 1).min(tiers.len() - 1);
    tiers[index]
}
