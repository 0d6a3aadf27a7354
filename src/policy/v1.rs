//! AnalyticsPolicy v1: windows, weights and feed tuning for every analytic.
//!
//! ## Float Normalization for Deterministic Hashing
//!
//! Floats are quantized to integers before hashing to avoid cross-platform
//! serialization differences. The quantization factor is 1e6 (multiply by
//! 1,000,000 and round to i64).

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

use crate::canonical::canonical_hash_hex;
use crate::stable::StabilityWindow;
use crate::DEFAULT_POLICY_VERSION;

/// Quantization factor for float normalization.
const FLOAT_QUANTIZATION_FACTOR: f64 = 1_000_000.0;

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    /// Scroll events could still be pending when a stable evaluation runs.
    #[error("scroll cooldown ({cooldown_ms} ms) must be shorter than the stable window ({window_ms} ms)")]
    CooldownNotShorterThanWindow {
        /// Configured cooldown.
        cooldown_ms: i64,
        /// Configured stable window.
        window_ms: i64,
    },

    /// A duration that must be positive was not.
    #[error("{name} must be positive, got {value}")]
    NonPositive {
        /// Field name.
        name: &'static str,
        /// Configured value.
        value: i64,
    },

    /// A weight outside its allowed range.
    #[error("{name} must be within [{min}, {max}], got {value}")]
    WeightOutOfRange {
        /// Field name.
        name: &'static str,
        /// Configured value.
        value: f64,
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },

    /// UTC offset beyond ±18h.
    #[error("timeline UTC offset {0} minutes is out of range")]
    OffsetOutOfRange(i32),
}

/// Analytics policy version 1.
///
/// ## Parameters
///
/// - `stable_window_ms`: idle time after which a revision counts as stable
/// - `scroll_cooldown_ms`: per-user scroll deduplication window
/// - `scroll_queue_capacity`: bound on pending scroll events per document
/// - `format_edit_weight` / `delete_weight`: inline interaction scores
/// - `perception_weight`: share of perception in the blended distance
/// - `exclude_degraded_attribution`: skip fallback-attributed characters
///   when scoring support and perception
/// - `timeline_utc_offset_minutes`: offset of the timeline's calendar days
/// - `poll_interval_ms`, `fetch_retry_*`: revision feed tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsPolicyV1 {
    /// Policy version identifier.
    pub version: String,
    /// Idle window for stable timestamps.
    pub stable_window_ms: i64,
    /// Scroll event cooldown.
    pub scroll_cooldown_ms: i64,
    /// Maximum pending scroll events per document.
    pub scroll_queue_capacity: usize,
    /// Score for formatting another author's text, per character.
    pub format_edit_weight: f64,
    /// Score for deleting another author's text, per character.
    pub delete_weight: f64,
    /// Weight of perception in the distance blend (0.0-1.0).
    pub perception_weight: f64,
    /// Leave fallback-attributed characters out of support and perception.
    pub exclude_degraded_attribution: bool,
    /// Calendar day offset for the timeline.
    pub timeline_utc_offset_minutes: i32,
    /// How often the poller checks document heads.
    pub poll_interval_ms: u64,
    /// Attempts to fetch a missing revision per pass.
    pub fetch_retry_attempts: u32,
    /// First retry delay; doubles per attempt.
    pub fetch_retry_base_delay_ms: u64,
}

/// Quantized policy parameters for deterministic hashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct QuantizedPolicyParams {
    version: String,
    stable_window_ms: i64,
    scroll_cooldown_ms: i64,
    scroll_queue_capacity: usize,
    format_edit_weight: i64,
    delete_weight: i64,
    perception_weight: i64,
    exclude_degraded_attribution: bool,
    timeline_utc_offset_minutes: i32,
}

/// Quantize a float to an i64 for deterministic hashing.
fn quantize_float(value: f64) -> i64 {
    (value * FLOAT_QUANTIZATION_FACTOR).round() as i64
}

impl AnalyticsPolicyV1 {
    /// Get the policy ID.
    pub fn policy_id(&self) -> &str {
        &self.version
    }

    /// Weight of simultaneity in the distance blend.
    pub fn simultaneity_weight(&self) -> f64 {
        1.0 - self.perception_weight
    }

    /// Window for the cohesion analytic's stable timestamps.
    pub fn cohesion_window(&self) -> StabilityWindow {
        StabilityWindow::Idle {
            ms: self.stable_window_ms,
        }
    }

    /// Window for the timeline's day selection.
    pub fn timeline_window(&self) -> StabilityWindow {
        StabilityWindow::CalendarDay {
            utc_offset_minutes: self.timeline_utc_offset_minutes,
        }
    }

    /// Check parameter ranges and the cooldown/window ordering.
    pub fn validate(&self) -> Result<(), PolicyError> {
        for (name, value) in [
            ("stable_window_ms", self.stable_window_ms),
            ("scroll_cooldown_ms", self.scroll_cooldown_ms),
            ("scroll_queue_capacity", self.scroll_queue_capacity as i64),
            ("poll_interval_ms", self.poll_interval_ms as i64),
        ] {
            if value <= 0 {
                return Err(PolicyError::NonPositive { name, value });
            }
        }
        if self.scroll_cooldown_ms >= self.stable_window_ms {
            return Err(PolicyError::CooldownNotShorterThanWindow {
                cooldown_ms: self.scroll_cooldown_ms,
                window_ms: self.stable_window_ms,
            });
        }
        check_range("perception_weight", self.perception_weight, 0.0, 1.0)?;
        check_range("format_edit_weight", self.format_edit_weight, 0.0, f64::MAX)?;
        check_range("delete_weight", self.delete_weight, 0.0, f64::MAX)?;
        if self.timeline_utc_offset_minutes.abs() > 18 * 60 {
            return Err(PolicyError::OffsetOutOfRange(self.timeline_utc_offset_minutes));
        }
        Ok(())
    }

    /// Defaults overridden by environment variables.
    ///
    /// Unparsable values keep the default and log a warning.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            stable_window_ms: env_or("COH_STABLE_WINDOW_MS", d.stable_window_ms),
            scroll_cooldown_ms: env_or("COH_SCROLL_COOLDOWN_MS", d.scroll_cooldown_ms),
            format_edit_weight: env_or("COH_FORMAT_EDIT_WEIGHT", d.format_edit_weight),
            delete_weight: env_or("COH_DELETE_WEIGHT", d.delete_weight),
            perception_weight: env_or("COH_PERCEPTION_WEIGHT", d.perception_weight),
            exclude_degraded_attribution: env_or(
                "COH_EXCLUDE_DEGRADED",
                d.exclude_degraded_attribution,
            ),
            timeline_utc_offset_minutes: env_or(
                "TIMELINE_UTC_OFFSET_MINUTES",
                d.timeline_utc_offset_minutes,
            ),
            poll_interval_ms: env_or("FEED_POLL_INTERVAL_MS", d.poll_interval_ms),
            ..d
        }
    }

    /// Compute a hash of the analytic parameters.
    ///
    /// Feed tuning is left out: it changes when results appear, not what
    /// they are.
    pub fn params_hash(&self) -> String {
        canonical_hash_hex(&self.to_quantized())
    }

    fn to_quantized(&self) -> QuantizedPolicyParams {
        QuantizedPolicyParams {
            version: self.version.clone(),
            stable_window_ms: self.stable_window_ms,
            scroll_cooldown_ms: self.scroll_cooldown_ms,
            scroll_queue_capacity: self.scroll_queue_capacity,
            format_edit_weight: quantize_float(self.format_edit_weight),
            delete_weight: quantize_float(self.delete_weight),
            perception_weight: quantize_float(self.perception_weight),
            exclude_degraded_attribution: self.exclude_degraded_attribution,
            timeline_utc_offset_minutes: self.timeline_utc_offset_minutes,
        }
    }
}

impl Default for AnalyticsPolicyV1 {
    fn default() -> Self {
        Self {
            version: DEFAULT_POLICY_VERSION.to_string(),
            stable_window_ms: 60_000,
            scroll_cooldown_ms: 5_000,
            scroll_queue_capacity: 10_000,
            format_edit_weight: 5.0,
            delete_weight: 0.2,
            perception_weight: 0.5,
            exclude_degraded_attribution: false,
            timeline_utc_offset_minutes: 0,
            poll_interval_ms: 5_000,
            fetch_retry_attempts: 5,
            fetch_retry_base_delay_ms: 200,
        }
    }
}

fn check_range(name: &'static str, value: f64, min: f64, max: f64) -> Result<(), PolicyError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(PolicyError::WeightOutOfRange { name, value, min, max })
    }
}

fn env_or<T: FromStr + std::fmt::Debug>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, default = ?default, "ignoring unparsable setting");
                default
            }
        },
        Err(_) => default,
    }
}
