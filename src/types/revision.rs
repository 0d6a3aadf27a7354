//! Revision and author identity types.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

use crate::codec::{decode_operations, Operations};

/// Monotonic per-document revision number. The first revision of a pad is 0.
pub type RevisionIndex = u64;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Identity of an author as recorded by the editor (e.g. `a.Xk3f9`).
///
/// Cheap to clone: every character node of a reconstructed document carries
/// one, so the string is shared behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AuthorId(Arc<str>);

impl AuthorId {
    /// Create an author id.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the empty id, which the pool uses for the blank author slot.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for AuthorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AuthorId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AuthorId {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl AsRef<str> for AuthorId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for AuthorId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for AuthorId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s))
    }
}

/// One immutable revision of a pad.
///
/// Operations are kept in their compact wire form and decoded lazily with
/// [`Revision::operations`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    /// Position of this revision in the pad's history.
    pub index: RevisionIndex,
    /// Author recorded on the revision itself.
    pub author: AuthorId,
    /// When the revision was recorded (ms).
    pub timestamp: Timestamp,
    /// Document length before the revision, in wire units.
    pub raw_old_len: u64,
    /// Document length after the revision, in wire units.
    pub raw_new_len: u64,
    /// Encoded operation records.
    pub op_string: String,
    /// Literal characters consumed by insert records, left to right.
    pub char_bank: String,
}

impl Revision {
    /// Create a revision from its wire fields.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: RevisionIndex,
        author: impl Into<AuthorId>,
        timestamp: Timestamp,
        raw_old_len: u64,
        raw_new_len: u64,
        op_string: impl Into<String>,
        char_bank: impl Into<String>,
    ) -> Self {
        Self {
            index,
            author: author.into(),
            timestamp,
            raw_old_len,
            raw_new_len,
            op_string: op_string.into(),
            char_bank: char_bank.into(),
        }
    }

    /// Decode the operation stream. The iterator is lazy and single-pass.
    pub fn operations(&self) -> Operations<'_> {
        decode_operations(&self.op_string)
    }

    /// A new length of 1 means the revision leaves only the trailing line break.
    pub fn clears_document(&self) -> bool {
        self.raw_new_len == 1
    }
}
