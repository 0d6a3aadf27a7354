//! Append-only attribute pool.

use serde::{Deserialize, Serialize};

use super::revision::AuthorId;

/// Pool key carrying author identity.
pub const AUTHOR_KEY: &str = "author";

/// Pool key carrying a heading size token.
pub const HEADING_KEY: &str = "heading";

/// One `(key, value)` pool entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolEntry {
    /// Attribute key, e.g. `author`.
    pub key: String,
    /// Attribute value. An empty author value is the blank slot.
    pub value: String,
}

impl PoolEntry {
    /// Create an entry.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Append-only mapping `index -> (key, value)`.
///
/// Indices are dense and assigned in insertion order, so `next_index()` is
/// also the number of entries. Existing entries never change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributePool {
    entries: Vec<PoolEntry>,
}

impl AttributePool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a pool from entries in index order.
    pub fn from_entries(entries: impl IntoIterator<Item = PoolEntry>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Index the next pushed entry will receive.
    pub fn next_index(&self) -> u32 {
        self.entries.len() as u32
    }

    /// Look up an entry.
    pub fn get(&self, index: u32) -> Option<&PoolEntry> {
        self.entries.get(index as usize)
    }

    /// Append an entry and return its index.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) -> u32 {
        let index = self.next_index();
        self.entries.push(PoolEntry::new(key, value));
        index
    }

    /// Take over entries a newer snapshot of the same pool has beyond ours.
    ///
    /// Returns the number of entries added. A snapshot shorter than ours adds
    /// nothing.
    pub fn absorb(&mut self, newer: &AttributePool) -> usize {
        let start = self.entries.len();
        if newer.entries.len() <= start {
            return 0;
        }
        self.entries.extend_from_slice(&newer.entries[start..]);
        newer.entries.len() - start
    }

    /// Iterate `(index, entry)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &PoolEntry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i as u32, e))
    }

    /// The blank author slot (author key, empty value), if the pool has one.
    ///
    /// When several exist the last one wins.
    pub fn blank_index(&self) -> Option<u32> {
        self.iter()
            .filter(|(_, e)| e.key == AUTHOR_KEY && e.value.is_empty())
            .map(|(i, _)| i)
            .last()
    }

    /// Every distinct non-blank author in the pool, in index order.
    pub fn authors(&self) -> Vec<AuthorId> {
        let mut out: Vec<AuthorId> = Vec::new();
        for (_, entry) in self.iter() {
            if entry.key == AUTHOR_KEY
                && !entry.value.is_empty()
                && !out.iter().any(|a| a.as_str() == entry.value)
            {
                out.push(AuthorId::new(&entry.value));
            }
        }
        out
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the pool has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_pool() -> AttributePool {
        let mut pool = AttributePool::new();
        pool.push(AUTHOR_KEY, "a.1");
        pool.push(HEADING_KEY, "h1");
        pool.push(AUTHOR_KEY, "");
        pool.push(AUTHOR_KEY, "a.2");
        pool
    }

    #[test]
    fn test_push_assigns_dense_indices() {
        let pool = make_pool();
        assert_eq!(pool.next_index(), 4);
        assert_eq!(pool.get(1).map(|e| e.value.as_str()), Some("h1"));
        assert!(pool.get(4).is_none());
    }

    #[test]
    fn test_blank_index() {
        assert_eq!(make_pool().blank_index(), Some(2));
        assert_eq!(AttributePool::new().blank_index(), None);
    }

    #[test]
    fn test_authors_skip_blank_and_duplicates() {
        let mut pool = make_pool();
        pool.push(AUTHOR_KEY, "a.1");
        let authors: Vec<_> = pool.authors().iter().map(|a| a.to_string()).collect();
        assert_eq!(authors, ["a.1", "a.2"]);
    }

    #[test]
    fn test_absorb_only_appends() {
        let mut old = AttributePool::new();
        old.push(AUTHOR_KEY, "a.1");
        let newer = make_pool();

        assert_eq!(old.absorb(&newer), 3);
        assert_eq!(old, newer);
        assert_eq!(old.absorb(&AttributePool::new()), 0);
        assert_eq!(old.len(), 4);
    }
}
