//! Normalization of raw interaction scores into diagram values.
//!
//! Formulas, with `max` the largest raw value of the series:
//!
//! ```text
//! distance   = 1 - 0.8 * raw / max      (0 -> 1.0, max -> 0.2)
//! intensity  = raw / max                (0 -> 0.0, max -> 1.0)
//! blended    = perception * w + simultaneity * (1 - w)
//! ```
//!
//! A series whose maximum is not positive is divided by 1 instead, so an
//! all-zero series maps to distance 1.0 and intensity 0.0.

use super::v1::AnalyticsPolicyV1;

/// Distance assigned to the strongest observed interaction.
pub const MIN_DISTANCE: f64 = 0.2;

fn series_max(raw: &[f64]) -> f64 {
    let max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max > 0.0 {
        max
    } else {
        1.0
    }
}

/// Map raw scores to distances in `[0.2, 1.0]`.
pub fn distance_series(raw: &[f64]) -> Vec<f64> {
    let max = series_max(raw);
    raw.iter()
        .map(|x| 1.0 - (1.0 - MIN_DISTANCE) * x / max)
        .collect()
}

/// Map raw scores to intensities in `[0.0, 1.0]`.
pub fn connection_series(raw: &[f64]) -> Vec<f64> {
    let max = series_max(raw);
    raw.iter().map(|x| x / max).collect()
}

/// Blend normalized perception and simultaneity distances.
pub fn blended_distance(perception: f64, simultaneity: f64, policy: &AnalyticsPolicyV1) -> f64 {
    perception * policy.perception_weight + simultaneity * policy.simultaneity_weight()
}
