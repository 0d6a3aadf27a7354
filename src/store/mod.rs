//! Revision storage backends.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use std::ops::Range;

use crate::types::{AttributePool, Revision, RevisionIndex};

/// Where revisions and attribute pools come from.
///
/// `Ok(None)` means the data is not available yet, not that it never will
/// be. Callers retry later.
#[async_trait]
pub trait RevisionSource: Send + Sync {
    /// Error type for store operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Highest known revision index of `pad`.
    async fn head(&self, pad: &str) -> Result<Option<RevisionIndex>, Self::Error>;

    /// Fetch one revision.
    async fn revision(&self, pad: &str, index: RevisionIndex)
        -> Result<Option<Revision>, Self::Error>;

    /// Fetch a range of revisions, in index order, stopping at the first
    /// missing one.
    async fn revisions(
        &self,
        pad: &str,
        range: Range<RevisionIndex>,
    ) -> Result<Vec<Revision>, Self::Error> {
        let mut out = Vec::new();
        for index in range {
            match self.revision(pad, index).await? {
                Some(revision) => out.push(revision),
                None => break,
            }
        }
        Ok(out)
    }

    /// Current attribute pool of `pad`. Unknown pads have an empty pool.
    async fn attribute_pool(&self, pad: &str) -> Result<AttributePool, Self::Error>;

    /// Every pad with at least one revision, sorted.
    async fn pads(&self) -> Result<Vec<String>, Self::Error>;
}

pub use memory::{InMemoryError, InMemoryRevisionStore};

#[cfg(feature = "postgres")]
pub use postgres::{PostgresConfig, PostgresError, PostgresRevisionStore};
