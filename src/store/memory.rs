//! In-memory revision store for tests and demos.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Range;

use super::RevisionSource;
use crate::types::{AttributePool, AuthorId, Revision, RevisionIndex, Timestamp};

/// Error type for in-memory store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InMemoryError {
    /// A revision with this index was already stored.
    #[error("Pad {pad}: revision {index} already exists")]
    DuplicateRevision {
        /// Pad name.
        pad: String,
        /// Revision index.
        index: RevisionIndex,
    },
}

#[derive(Debug, Clone, Default)]
struct PadData {
    revisions: BTreeMap<RevisionIndex, Revision>,
    pool: AttributePool,
}

/// In-memory revision store.
///
/// Uses BTreeMap for deterministic iteration order. Revisions may be inserted
/// out of order, which leaves gaps readers see as "not yet available".
#[derive(Debug, Default)]
pub struct InMemoryRevisionStore {
    pads: RwLock<BTreeMap<String, PadData>>,
}

impl InMemoryRevisionStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `revision` under its own index.
    pub fn insert_revision(&self, pad: &str, revision: Revision) -> Result<(), InMemoryError> {
        let mut pads = self.pads.write();
        let data = pads.entry(pad.to_string()).or_default();
        if data.revisions.contains_key(&revision.index) {
            return Err(InMemoryError::DuplicateRevision {
                pad: pad.to_string(),
                index: revision.index,
            });
        }
        data.revisions.insert(revision.index, revision);
        Ok(())
    }

    /// Store a revision after the current head and return its index.
    #[allow(clippy::too_many_arguments)]
    pub fn append_revision(
        &self,
        pad: &str,
        author: impl Into<AuthorId>,
        timestamp: Timestamp,
        old_len: u64,
        new_len: u64,
        op_string: &str,
        char_bank: &str,
    ) -> RevisionIndex {
        let mut pads = self.pads.write();
        let data = pads.entry(pad.to_string()).or_default();
        let index = data
            .revisions
            .last_key_value()
            .map_or(0, |(last, _)| last + 1);
        data.revisions.insert(
            index,
            Revision::new(index, author, timestamp, old_len, new_len, op_string, char_bank),
        );
        index
    }

    /// Add an attribute pool entry and return its index.
    pub fn push_attribute(&self, pad: &str, key: &str, value: &str) -> u32 {
        self.pads
            .write()
            .entry(pad.to_string())
            .or_default()
            .pool
            .push(key, value)
    }

    /// Number of stored revisions of `pad`.
    pub fn num_revisions(&self, pad: &str) -> usize {
        self.pads
            .read()
            .get(pad)
            .map_or(0, |data| data.revisions.len())
    }
}

#[async_trait]
impl RevisionSource for InMemoryRevisionStore {
    type Error = InMemoryError;

    async fn head(&self, pad: &str) -> Result<Option<RevisionIndex>, Self::Error> {
        Ok(self
            .pads
            .read()
            .get(pad)
            .and_then(|data| data.revisions.last_key_value().map(|(index, _)| *index)))
    }

    async fn revision(
        &self,
        pad: &str,
        index: RevisionIndex,
    ) -> Result<Option<Revision>, Self::Error> {
        Ok(self
            .pads
            .read()
            .get(pad)
            .and_then(|data| data.revisions.get(&index).cloned()))
    }

    async fn revisions(
        &self,
        pad: &str,
        range: Range<RevisionIndex>,
    ) -> Result<Vec<Revision>, Self::Error> {
        let pads = self.pads.read();
        let Some(data) = pads.get(pad) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for index in range {
            match data.revisions.get(&index) {
                Some(revision) => out.push(revision.clone()),
                None => break,
            }
        }
        Ok(out)
    }

    async fn attribute_pool(&self, pad: &str) -> Result<AttributePool, Self::Error> {
        Ok(self
            .pads
            .read()
            .get(pad)
            .map(|data| data.pool.clone())
            .unwrap_or_default())
    }

    async fn pads(&self) -> Result<Vec<String>, Self::Error> {
        Ok(self
            .pads
            .read()
            .iter()
            .filter(|(_, data)| !data.revisions.is_empty())
            .map(|(pad, _)| pad.clone())
            .collect())
    }
}
