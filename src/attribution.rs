//! Author and heading resolution against the attribute pool.
//!
//! The resolver keeps a classification of every pool index it has seen.
//! Pools only grow, so the classification is extended on a miss instead of
//! being rebuilt.

use std::collections::HashMap;
use thiserror::Error;

use crate::types::{AttributePool, AuthorId, AUTHOR_KEY, HEADING_KEY};

/// Errors from attribute resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttributionError {
    /// None of the referenced indices names a (non-blank) author.
    #[error("No author attribute among {0:?}")]
    NoAuthorAttribute(Vec<u32>),
}

/// Cached classification of pool indices.
#[derive(Debug, Clone, Default)]
pub struct AttributeResolver {
    authors: HashMap<u32, AuthorId>,
    headings: HashMap<u32, String>,
    blank: Option<u32>,
    seen: u32,
}

impl AttributeResolver {
    /// Create a resolver that has classified nothing yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify every pool entry added since the last refresh.
    pub fn refresh(&mut self, pool: &AttributePool) {
        let next = pool.next_index();
        for index in self.seen..next {
            let Some(entry) = pool.get(index) else { break };
            match entry.key.as_str() {
                AUTHOR_KEY if entry.value.is_empty() => self.blank = Some(index),
                AUTHOR_KEY => {
                    self.authors.insert(index, AuthorId::new(&entry.value));
                }
                HEADING_KEY => {
                    self.headings.insert(index, entry.value.clone());
                }
                _ => {}
            }
        }
        if next > self.seen {
            tracing::trace!(from = self.seen, to = next, "attribute pool refreshed");
            self.seen = next;
        }
    }

    fn refresh_on_miss(&mut self, refs: &[u32], pool: &AttributePool) {
        if refs.iter().any(|&r| r >= self.seen) {
            self.refresh(pool);
        }
    }

    /// First referenced index classified as a non-blank author.
    pub fn resolve_author(
        &mut self,
        refs: &[u32],
        pool: &AttributePool,
    ) -> Result<AuthorId, AttributionError> {
        self.refresh_on_miss(refs, pool);
        refs.iter()
            .filter(|&&r| Some(r) != self.blank)
            .find_map(|r| self.authors.get(r).cloned())
            .ok_or_else(|| AttributionError::NoAuthorAttribute(refs.to_vec()))
    }

    /// First referenced index classified as a heading, as its size token.
    pub fn resolve_heading(&mut self, refs: &[u32], pool: &AttributePool) -> Option<String> {
        self.refresh_on_miss(refs, pool);
        refs.iter().find_map(|r| self.headings.get(r).cloned())
    }

    /// True when the references include the pool's blank author slot.
    pub fn is_blank(&mut self, refs: &[u32], pool: &AttributePool) -> bool {
        self.refresh_on_miss(refs, pool);
        self.blank.is_some_and(|b| refs.contains(&b))
    }

    /// The blank author index, once classified.
    pub fn blank_index(&self) -> Option<u32> {
        self.blank
    }

    /// Number of pool entries classified so far.
    pub fn seen(&self) -> u32 {
        self.seen
    }
}
