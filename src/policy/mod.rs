//! Analytics configuration and score normalization.

pub mod v1;
pub mod scoring;

pub use v1::{AnalyticsPolicyV1, PolicyError};
pub use scoring::{blended_distance, connection_series, distance_series, MIN_DISTANCE};
