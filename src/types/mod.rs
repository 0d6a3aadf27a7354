//! Core types shared by the replay engine and the analytics.

pub mod revision;
pub mod pool;
pub mod events;
pub mod anomaly;

pub use revision::{AuthorId, Revision, RevisionIndex, Timestamp};
pub use pool::{AttributePool, PoolEntry, AUTHOR_KEY, HEADING_KEY};
pub use events::{LoginSession, ScrollEvent};
pub use anomaly::{
    Anomaly, AnomalyKind, Severity,
    ReplayMetrics, NoOpMetrics, LogMetrics, TestMetrics,
};
