//! Per-invocation sampling.

use rand::prelude::RngExt;
use rand::rng;

use crate::config::CollectorConfig;

/// Decide whether this invocation is instrumented.
///
/// Disabled configs never sample. Otherwise one random draw is compared against the sample rate,
/// clamped into `[0, 1]`; NaN counts as 0.
pub fn should_instrument(config: &CollectorConfig) -> bool {
    if !config.enabled {
        return false;
    }
    let rate = clamp_rate(config.sample_rate);
    if rate >= 1.0 {
        return true;
    }
    if rate <= 0.0 {
        return false;
    }
    rng().random_range(0.0..1.0) < rate
}

fn clamp_rate(rate: f64) -> f64 {
    if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) }
}
