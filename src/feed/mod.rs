//! Revision feed: fetching, per-document state and background workers.
//!
//! - [`RevisionLog`]: gap-free prefix of a document's revisions
//! - [`TrackedDocument`]: the log plus one instance of every analytic
//! - [`DocumentRegistry`]: tracked documents keyed by pad, one worker each

pub mod log;
pub mod registry;
pub mod tracked;

use thiserror::Error;

use crate::analytics::TimelineError;
use crate::replay::ReplayError;
use crate::types::RevisionIndex;

/// Errors from a feed pass.
#[derive(Debug, Clone, Error)]
pub enum FeedError {
    /// Store error.
    #[error("Store error: {0}")]
    Store(String),

    /// An analytic could not apply a revision.
    #[error("Pad {pad}: {source}")]
    Replay {
        /// Pad name.
        pad: String,
        /// Replay error.
        source: ReplayError,
    },

    /// The timeline could not be advanced.
    #[error("Pad {pad}: {source}")]
    Timeline {
        /// Pad name.
        pad: String,
        /// Timeline error.
        source: TimelineError,
    },
}

impl FeedError {
    /// Create a store error from any error type.
    pub fn from_store<E: std::error::Error>(e: E) -> Self {
        Self::Store(e.to_string())
    }

    /// True when retrying cannot help until the document is rebuilt.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Store(_) => false,
            Self::Replay { source, .. } => source.is_fatal(),
            Self::Timeline {
                source: TimelineError::Replay(source),
                ..
            } => source.is_fatal(),
            Self::Timeline { .. } => false,
        }
    }

    /// Revision the document cannot get past, for replay errors.
    pub fn stalled_at(&self) -> Option<RevisionIndex> {
        match self {
            Self::Replay { source, .. }
            | Self::Timeline {
                source: TimelineError::Replay(source),
                ..
            } => Some(source.revision()),
            _ => None,
        }
    }
}

pub use log::{RevisionLog, SyncReport};
pub use registry::{DocumentRegistry, RegistryClock};
pub use tracked::{DocumentStatus, PassReport, TrackedDocument};
