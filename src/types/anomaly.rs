//! Replay anomalies and their counters.
//!
//! ## Purpose
//!
//! Replay never rejects a revision for an attribution problem, and never
//! surfaces a fetch gap to users. Both still need to be visible to operators,
//! so they are recorded here as structured events and counter increments.
//!
//! | Anomaly | Severity | Effect on replay |
//! |---------|----------|------------------|
//! | AttributionFallback | LOW | Character attributed to the revision author |
//! | MissingRevision | MEDIUM | Catch-up stops at the gap, retried on next pass |
//! | MalformedDelta | HIGH | Revision not applied, checkpoint unchanged |
//! | ReplayOverrun | CRITICAL | Document poisoned until rebuilt |

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::revision::{AuthorId, RevisionIndex};

/// Severity levels for anomalies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Expected noise from upstream editors.
    Low,
    /// Data not available yet; resolves on its own in most cases.
    Medium,
    /// A revision could not be applied.
    High,
    /// A document stopped replaying.
    Critical,
}

impl Severity {
    /// Label value used on counters.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Kind of replay anomaly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Inserted characters carried no usable author attribute.
    AttributionFallback {
        /// Revision author used instead.
        author: AuthorId,
        /// Number of characters attributed through the fallback.
        chars: u64,
    },
    /// A revision's operation stream could not be decoded.
    MalformedDelta {
        /// Offending revision.
        revision: RevisionIndex,
        /// Decoder message.
        reason: String,
    },
    /// The cursor tried to move past the end of the document.
    ReplayOverrun {
        /// Revision being applied when the overrun happened.
        revision: RevisionIndex,
    },
    /// The store did not have a revision below its reported head.
    MissingRevision {
        /// Index that could not be fetched.
        revision: RevisionIndex,
        /// Attempts made before giving up for this pass.
        attempts: u32,
    },
}

impl AnomalyKind {
    /// Get the severity of this anomaly kind.
    pub fn severity(&self) -> Severity {
        match self {
            Self::AttributionFallback { .. } => Severity::Low,
            Self::MissingRevision { .. } => Severity::Medium,
            Self::MalformedDelta { .. } => Severity::High,
            Self::ReplayOverrun { .. } => Severity::Critical,
        }
    }

    /// Counter name for this anomaly kind.
    pub fn metric_name(&self) -> &'static str {
        match self {
            Self::AttributionFallback { .. } => "pad_replay_attribution_fallback_total",
            Self::MissingRevision { .. } => "pad_replay_missing_revision_total",
            Self::MalformedDelta { .. } => "pad_replay_malformed_delta_total",
            Self::ReplayOverrun { .. } => "pad_replay_overrun_total",
        }
    }

    /// Amount the counter moves for this anomaly.
    pub fn weight(&self) -> u64 {
        match self {
            Self::AttributionFallback { chars, .. } => *chars,
            _ => 1,
        }
    }
}

/// A recorded anomaly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    /// Unique anomaly ID.
    pub id: String,
    /// When the anomaly was observed.
    pub timestamp: DateTime<Utc>,
    /// Pad the anomaly belongs to.
    pub pad: String,
    /// Kind of anomaly.
    pub kind: AnomalyKind,
    /// Severity level.
    pub severity: Severity,
    /// Additional context.
    pub context: HashMap<String, String>,
}

impl Anomaly {
    /// Create a new anomaly.
    pub fn new(kind: AnomalyKind, pad: impl Into<String>) -> Self {
        let severity = kind.severity();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            pad: pad.into(),
            kind,
            severity,
            context: HashMap::new(),
        }
    }

    /// Add context to the anomaly.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Log this anomaly as a structured event.
    pub fn log(&self) {
        match self.severity {
            Severity::Low => tracing::debug!(
                anomaly_id = %self.id,
                kind = ?self.kind,
                severity = %self.severity,
                pad = %self.pad,
                context = ?self.context,
                "REPLAY_ANOMALY"
            ),
            Severity::Medium | Severity::High => tracing::warn!(
                anomaly_id = %self.id,
                kind = ?self.kind,
                severity = %self.severity,
                pad = %self.pad,
                context = ?self.context,
                "REPLAY_ANOMALY"
            ),
            Severity::Critical => tracing::error!(
                anomaly_id = %self.id,
                kind = ?self.kind,
                severity = %self.severity,
                pad = %self.pad,
                context = ?self.context,
                "REPLAY_ANOMALY: document replay halted"
            ),
        }
    }
}

/// Metrics counter interface.
///
/// Backends plug in here; the crate itself only ever increments.
pub trait ReplayMetrics: Send + Sync {
    /// Increment a counter by `by`.
    fn increment(&self, metric_name: &str, by: u64, labels: &[(&str, &str)]);

    /// Record an anomaly.
    fn record_anomaly(&self, anomaly: &Anomaly) {
        self.increment(
            anomaly.kind.metric_name(),
            anomaly.kind.weight(),
            &[
                ("severity", anomaly.severity.as_label()),
                ("pad", anomaly.pad.as_str()),
            ],
        );
    }
}

/// No-op metrics implementation.
#[derive(Debug, Default)]
pub struct NoOpMetrics;

impl ReplayMetrics for NoOpMetrics {
    fn increment(&self, _metric_name: &str, _by: u64, _labels: &[(&str, &str)]) {}
}

/// Metrics emitted as structured log events on the `pad_replay::metrics`
/// target, for log-based aggregation.
#[derive(Debug, Default)]
pub struct LogMetrics;

impl ReplayMetrics for LogMetrics {
    fn increment(&self, metric_name: &str, by: u64, labels: &[(&str, &str)]) {
        tracing::info!(
            target: "pad_replay::metrics",
            metric = metric_name,
            by,
            labels = ?labels,
            "counter_increment"
        );
    }
}

/// In-memory metrics for testing.
#[derive(Debug, Default)]
pub struct TestMetrics {
    /// Counter values.
    pub counters: Mutex<HashMap<String, u64>>,
}

impl ReplayMetrics for TestMetrics {
    fn increment(&self, metric_name: &str, by: u64, labels: &[(&str, &str)]) {
        let key = format!("{}:{:?}", metric_name, labels);
        *self.counters.lock().entry(key).or_insert(0) += by;
    }
}

impl TestMetrics {
    /// Get the count for a metric, summed over all label sets.
    pub fn get_count(&self, metric_name: &str) -> u64 {
        self.counters
            .lock()
            .iter()
            .filter(|(k, _)| k.starts_with(metric_name))
            .map(|(_, v)| v)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anomaly_kind_severity() {
        let fallback = AnomalyKind::AttributionFallback {
            author: AuthorId::new("a.1"),
            chars: 3,
        };
        assert_eq!(fallback.severity(), Severity::Low);

        let overrun = AnomalyKind::ReplayOverrun { revision: 4 };
        assert_eq!(overrun.severity(), Severity::Critical);
    }

    #[test]
    fn test_anomaly_creation() {
        let anomaly = Anomaly::new(
            AnomalyKind::MalformedDelta {
                revision: 7,
                reason: "unknown opcode".to_string(),
            },
            "pad-1",
        )
        .with_context("op_string", "?3");

        assert!(!anomaly.id.is_empty());
        assert_eq!(anomaly.severity, Severity::High);
        assert_eq!(anomaly.context.get("op_string"), Some(&"?3".to_string()));
    }

    #[test]
    fn test_record_anomaly_uses_weight() {
        let metrics = TestMetrics::default();
        let anomaly = Anomaly::new(
            AnomalyKind::AttributionFallback {
                author: AuthorId::new("a.1"),
                chars: 4,
            },
            "pad-1",
        );
        metrics.record_anomaly(&anomaly);
        metrics.record_anomaly(&anomaly);
        metrics.record_anomaly(&Anomaly::new(
            AnomalyKind::MissingRevision {
                revision: 2,
                attempts: 5,
            },
            "pad-1",
        ));

        assert_eq!(metrics.get_count("pad_replay_attribution_fallback_total"), 8);
        assert_eq!(metrics.get_count("pad_replay_missing_revision_total"), 1);
        assert_eq!(metrics.get_count("pad_replay_overrun_total"), 0);
    }

    #[test]
    fn test_metric_names() {
        let kind = AnomalyKind::MalformedDelta {
            revision: 1,
            reason: String::new(),
        };
        assert_eq!(kind.metric_name(), "pad_replay_malformed_delta_total");
    }
}
