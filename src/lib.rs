//! # pad-replay-kernel
//!
//! Character-level replay of collaborative pad revisions.
//!
//! The kernel answers one question:
//!
//! > Given the revision history of a pad, **who wrote each character**, and
//! > how did the authors work with each other?
//!
//! ## Core Contract
//!
//! 1. Decode each revision's operation stream and apply it to a per-analytic
//!    copy of the document, one character node per character
//! 2. Attribute every inserted character to an author, falling back to the
//!    revision author when the attributes name none
//! 3. Evaluate expensive analytics only at stable revisions, after which
//!    nobody edited the document for a while
//!
//! ## Architecture
//!
//! ```text
//! RevisionSource → RevisionLog → DocumentReplay<M> → Analytics
//!  (Postgres or Memory)                 ↓             ├─ CohesionAnalyzer
//!                              StableTimestampSelector├─ BlockAnalyzer
//!                                                     └─ TimelineAnalyzer
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Same revisions + same pool + same policy → identical outputs
//! - Revisions apply strictly in index order; a failed revision never moves
//!   the checkpoint
//! - Author iteration order is canonical (by AuthorId)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod codec;
pub mod attribution;
pub mod replay;
pub mod stable;
pub mod policy;
pub mod canonical;
pub mod analytics;
pub mod store;

#[cfg(feature = "runtime")]
pub mod feed;

#[cfg(feature = "service")]
pub mod service;

// Re-exports
pub use types::{
    AuthorId, Revision, RevisionIndex, Timestamp,
    AttributePool, PoolEntry, AUTHOR_KEY, HEADING_KEY,
    LoginSession, ScrollEvent,
    Anomaly, AnomalyKind, Severity, ReplayMetrics, NoOpMetrics, LogMetrics, TestMetrics,
};
pub use codec::{
    decode_operations, encode_operations, parse_attr_refs, CharBank, CodecError, Operation,
    Operations, RawChangeset,
};
pub use attribution::{AttributeResolver, AttributionError};
pub use replay::{
    detect_runs, ApplyStats, CharacterNode, DocumentList, DocumentReplay, InsertContext,
    ListError, NodeId, PlainHooks, ReplayError, ReplayHooks, RetainContext, Run,
};
pub use stable::{calendar_day, StabilityWindow, StablePoint, StableTimestampSelector};
pub use policy::{AnalyticsPolicyV1, PolicyError};
pub use canonical::{to_canonical_bytes, canonical_hash, canonical_hash_hex};
pub use analytics::{
    AuthorBlock, BlockAnalyzer, CatchUpReport, CohesionAnalyzer, CohesionGraph, Parallelogram,
    Rectangle, TimelineAnalyzer, TimelineColumn, TimelineError,
};
pub use analytics::cohesion::{GraphNode, NodeConnection, NodeDistance};
pub use store::{InMemoryRevisionStore, RevisionSource};
#[cfg(feature = "postgres")]
pub use store::{PostgresConfig, PostgresRevisionStore};

#[cfg(feature = "runtime")]
pub use feed::{DocumentRegistry, DocumentStatus, FeedError, PassReport, RevisionLog, TrackedDocument};

// Service re-exports (when service feature is enabled)
#[cfg(feature = "service")]
pub use service::{create_router, PolicyRef, ServiceState};

/// Schema version for all serialized output types.
/// Increment on breaking changes to any output shape.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Default policy version identifier.
pub const DEFAULT_POLICY_VERSION: &str = "analytics_policy_v1";
