//! Apply-one-revision replay shared by every analytic.
//!
//! ## Algorithm
//!
//! For each revision, strictly in index order:
//!
//! 1. Decode the whole op stream and check the char bank covers every insert.
//!    Nothing is mutated if either check fails.
//! 2. Reset the cursor to `head` and dispatch each op:
//!    - `Insert`: resolve the author from the attributes, falling back to the
//!      revision author, and insert one node per char bank character.
//!    - `Retain` without attributes: advance.
//!    - `Retain` with attributes: advance one node at a time and let the hooks
//!      update the node's metadata. Authorship never changes.
//!    - `Delete`: let the hooks inspect each doomed node, then remove them, or
//!      erase the whole document when the revision leaves only the final
//!      line break.
//! 3. Move the checkpoint to this revision.
//!
//! A structural list error means replay and input disagree about the
//! document. The replay is then poisoned and refuses further revisions.

use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use super::list::{CharacterNode, DocumentList, ListError, NodeId};
use crate::attribution::AttributeResolver;
use crate::codec::{CharBank, CodecError, Operation};
use crate::types::{
    Anomaly, AnomalyKind, AttributePool, AuthorId, NoOpMetrics, ReplayMetrics, Revision,
    RevisionIndex,
};

/// Errors from applying a revision.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayError {
    /// The op stream could not be decoded. The revision was not applied.
    #[error("Revision {revision}: {source}")]
    Codec {
        /// Offending revision.
        revision: RevisionIndex,
        /// Decoder error.
        source: CodecError,
    },

    /// A structural list invariant broke mid-revision.
    #[error("Revision {revision}: {source}")]
    List {
        /// Revision being applied.
        revision: RevisionIndex,
        /// List error.
        source: ListError,
    },

    /// Revisions must be applied one after another.
    #[error("Out of order: expected revision {expected}, got {got}")]
    OutOfOrder {
        /// Next index the replay accepts.
        expected: RevisionIndex,
        /// Index that was offered.
        got: RevisionIndex,
    },

    /// Inserts need more characters than the char bank holds.
    #[error("Revision {revision}: char bank holds {available} chars, inserts need {needed}")]
    CharBankExhausted {
        /// Offending revision.
        revision: RevisionIndex,
        /// Characters required by inserts.
        needed: u64,
        /// Characters in the char bank.
        available: u64,
    },

    /// An earlier list error stopped this replay.
    #[error("Replay poisoned at revision {0}")]
    Poisoned(RevisionIndex),
}

impl ReplayError {
    /// True when the replay cannot continue without being rebuilt.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::List { .. } | Self::Poisoned(_))
    }

    /// Revision the error is about.
    pub fn revision(&self) -> RevisionIndex {
        match self {
            Self::Codec { revision, .. }
            | Self::List { revision, .. }
            | Self::CharBankExhausted { revision, .. } => *revision,
            Self::OutOfOrder { got, .. } => *got,
            Self::Poisoned(at) => *at,
        }
    }
}

/// What an insert knows about the characters it creates.
#[derive(Debug, Clone, Copy)]
pub struct InsertContext<'a> {
    /// Revision being applied.
    pub revision: &'a Revision,
    /// Resolved author of the inserted characters.
    pub author: &'a AuthorId,
    /// The author came from the revision because attributes named none.
    pub degraded: bool,
    /// Heading token from the attributes.
    pub heading: Option<&'a str>,
}

/// What a retain-with-attributes applies to each node it walks.
#[derive(Debug, Clone, Copy)]
pub struct RetainContext<'a> {
    /// Revision being applied.
    pub revision: &'a Revision,
    /// Pool indices of the retain.
    pub attrs: &'a [u32],
    /// Heading token from the attributes.
    pub heading: Option<&'a str>,
    /// The attributes include the blank author slot.
    pub blank: bool,
}

/// Per-analytic side effects of replay.
pub trait ReplayHooks<M> {
    /// Metadata for a newly inserted node.
    fn new_meta(&mut self, ctx: &InsertContext<'_>) -> M;

    /// A retain with attributes walked over `node`. Never called for `tail`.
    fn on_retain(&mut self, _node: &mut CharacterNode<M>, _ctx: &RetainContext<'_>) {}

    /// `node` is about to be deleted by `revision`.
    fn on_delete(&mut self, _node: &CharacterNode<M>, _revision: &Revision) {}

    /// `revision` is fully applied and checkpointed.
    fn on_revision_applied(&mut self, _list: &DocumentList<M>, _revision: &Revision) {}
}

/// Hooks that only build default metadata.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainHooks;

impl<M: Default> ReplayHooks<M> for PlainHooks {
    fn new_meta(&mut self, _ctx: &InsertContext<'_>) -> M {
        M::default()
    }
}

/// Counts from applying one revision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    /// Nodes inserted.
    pub inserted: u64,
    /// Nodes removed.
    pub removed: u64,
    /// Inserted nodes attributed to the revision author.
    pub fallback: u64,
}

/// A document reconstructed from its revisions.
pub struct DocumentReplay<M> {
    pad: String,
    list: DocumentList<M>,
    resolver: AttributeResolver,
    checkpoint: Option<RevisionIndex>,
    poisoned: Option<RevisionIndex>,
    rejected: Option<RevisionIndex>,
    attribution_anomalies: BTreeMap<AuthorId, u64>,
    metrics: Arc<dyn ReplayMetrics>,
}

impl<M> std::fmt::Debug for DocumentReplay<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentReplay")
            .field("pad", &self.pad)
            .field("len", &self.list.len())
            .field("checkpoint", &self.checkpoint)
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

impl<M: Clone> Clone for DocumentReplay<M> {
    fn clone(&self) -> Self {
        Self {
            pad: self.pad.clone(),
            list: self.list.clone(),
            resolver: self.resolver.clone(),
            checkpoint: self.checkpoint,
            poisoned: self.poisoned,
            rejected: self.rejected,
            attribution_anomalies: self.attribution_anomalies.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<M: Default> DocumentReplay<M> {
    /// Create an empty replay for `pad`.
    pub fn new(pad: impl Into<String>) -> Self {
        Self::with_metrics(pad, Arc::new(NoOpMetrics))
    }

    /// Create an empty replay reporting anomalies to `metrics`.
    pub fn with_metrics(pad: impl Into<String>, metrics: Arc<dyn ReplayMetrics>) -> Self {
        Self {
            pad: pad.into(),
            list: DocumentList::new(),
            resolver: AttributeResolver::new(),
            checkpoint: None,
            poisoned: None,
            rejected: None,
            attribution_anomalies: BTreeMap::new(),
            metrics,
        }
    }
}

impl<M> DocumentReplay<M> {
    /// Pad this replay reconstructs.
    pub fn pad(&self) -> &str {
        &self.pad
    }

    /// The reconstructed document.
    pub fn list(&self) -> &DocumentList<M> {
        &self.list
    }

    /// Mutable access for metadata updates between revisions.
    pub fn list_mut(&mut self) -> &mut DocumentList<M> {
        &mut self.list
    }

    /// Index of the last fully applied revision.
    pub fn last_applied(&self) -> Option<RevisionIndex> {
        self.checkpoint
    }

    /// Index the replay will accept next.
    pub fn next_index(&self) -> RevisionIndex {
        self.checkpoint.map_or(0, |c| c + 1)
    }

    /// Revision that poisoned this replay, if any.
    pub fn poisoned_at(&self) -> Option<RevisionIndex> {
        self.poisoned
    }

    /// Characters attributed through the fallback, per revision author.
    pub fn attribution_anomalies(&self) -> &BTreeMap<AuthorId, u64> {
        &self.attribution_anomalies
    }

    /// Apply the next revision.
    pub fn apply<H: ReplayHooks<M>>(
        &mut self,
        revision: &Revision,
        pool: &AttributePool,
        hooks: &mut H,
    ) -> Result<ApplyStats, ReplayError> {
        if let Some(at) = self.poisoned {
            return Err(ReplayError::Poisoned(at));
        }
        let expected = self.next_index();
        if revision.index != expected {
            return Err(ReplayError::OutOfOrder {
                expected,
                got: revision.index,
            });
        }

        let ops = match revision.operations().collect::<Result<Vec<_>, _>>() {
            Ok(ops) => ops,
            Err(source) => {
                // Retries of the same revision are reported once.
                if self.rejected.replace(revision.index) != Some(revision.index) {
                    self.report(
                        Anomaly::new(
                            AnomalyKind::MalformedDelta {
                                revision: revision.index,
                                reason: source.to_string(),
                            },
                            &self.pad,
                        )
                        .with_context("op_string", revision.op_string.clone()),
                    );
                }
                return Err(ReplayError::Codec {
                    revision: revision.index,
                    source,
                });
            }
        };

        let needed: u64 = ops
            .iter()
            .filter_map(|op| match op {
                Operation::Insert { count, .. } => Some(*count),
                _ => None,
            })
            .sum();
        let available = CharBank::new(&revision.char_bank).remaining() as u64;
        if needed > available {
            tracing::warn!(
                pad = %self.pad,
                revision = revision.index,
                needed,
                available,
                "char bank too short for inserts"
            );
            return Err(ReplayError::CharBankExhausted {
                revision: revision.index,
                needed,
                available,
            });
        }

        self.list.reset_cursor_to_head();
        let stats = match self.apply_ops(&ops, revision, pool, hooks) {
            Ok(stats) => stats,
            Err(source) => {
                self.poisoned = Some(revision.index);
                self.report(
                    Anomaly::new(AnomalyKind::ReplayOverrun { revision: revision.index }, &self.pad)
                        .with_context("error", source.to_string()),
                );
                return Err(ReplayError::List {
                    revision: revision.index,
                    source,
                });
            }
        };

        self.checkpoint = Some(revision.index);
        self.rejected = None;
        hooks.on_revision_applied(&self.list, revision);

        tracing::trace!(
            pad = %self.pad,
            revision = revision.index,
            inserted = stats.inserted,
            removed = stats.removed,
            len = self.list.len(),
            "revision applied"
        );
        Ok(stats)
    }

    fn apply_ops<H: ReplayHooks<M>>(
        &mut self,
        ops: &[Operation],
        revision: &Revision,
        pool: &AttributePool,
        hooks: &mut H,
    ) -> Result<ApplyStats, ListError> {
        let mut stats = ApplyStats::default();
        let mut bank = CharBank::new(&revision.char_bank);

        for op in ops {
            match op {
                Operation::Insert { count, attrs, .. } => {
                    let (author, degraded) = match self.resolver.resolve_author(attrs, pool) {
                        Ok(author) => (author, false),
                        Err(_) => {
                            if *count > 0 {
                                self.record_fallback(revision, *count);
                                stats.fallback += count;
                            }
                            (revision.author.clone(), true)
                        }
                    };
                    let heading = self.resolver.resolve_heading(attrs, pool);
                    let ctx = InsertContext {
                        revision,
                        author: &author,
                        degraded,
                        heading: heading.as_deref(),
                    };
                    for _ in 0..*count {
                        // Bank length was checked before any mutation.
                        let Some(ch) = bank.next_char() else { break };
                        let meta = hooks.new_meta(&ctx);
                        self.list.insert_after_cursor_and_advance(ch, author.clone(), meta)?;
                        stats.inserted += 1;
                    }
                }
                Operation::Retain { count, attrs: None, .. } => {
                    self.list.advance(*count)?;
                }
                Operation::Retain { count, attrs: Some(attrs), .. } => {
                    let heading = self.resolver.resolve_heading(attrs, pool);
                    let blank = self.resolver.is_blank(attrs, pool);
                    let ctx = RetainContext {
                        revision,
                        attrs,
                        heading: heading.as_deref(),
                        blank,
                    };
                    for _ in 0..*count {
                        self.list.advance(1)?;
                        if self.list.cursor() == NodeId::TAIL {
                            continue;
                        }
                        hooks.on_retain(self.list.current_mut(), &ctx);
                    }
                }
                Operation::Delete { count, .. } => {
                    let count = *count;
                    let mut inspected = 0u64;
                    for node in self.list.after_cursor().take(count as usize) {
                        hooks.on_delete(node, revision);
                        inspected += 1;
                    }
                    if inspected < count {
                        return Err(ListError::RemoveTail);
                    }
                    if revision.clears_document() {
                        stats.removed += self.list.len() as u64;
                        self.list.erase_all();
                    } else {
                        for _ in 0..count {
                            self.list.remove_after_cursor()?;
                        }
                        stats.removed += count;
                    }
                }
            }
        }
        Ok(stats)
    }

    fn record_fallback(&mut self, revision: &Revision, chars: u64) {
        *self
            .attribution_anomalies
            .entry(revision.author.clone())
            .or_insert(0) += chars;
        self.report(
            Anomaly::new(
                AnomalyKind::AttributionFallback {
                    author: revision.author.clone(),
                    chars,
                },
                &self.pad,
            )
            .with_context("revision", revision.index.to_string()),
        );
    }

    fn report(&self, anomaly: Anomaly) {
        anomaly.log();
        self.metrics.record_anomaly(&anomaly);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TestMetrics, AUTHOR_KEY, HEADING_KEY};

    fn make_pool() -> AttributePool {
        let mut pool = AttributePool::new();
        pool.push(AUTHOR_KEY, "alice"); // 0
        pool.push(AUTHOR_KEY, "bob"); // 1
        pool.push(HEADING_KEY, "h1"); // 2
        pool.push(AUTHOR_KEY, ""); // 3
        pool
    }

    fn rev(index: u64, author: &str, old: u64, new: u64, ops: &str, bank: &str) -> Revision {
        Revision::new(index, author, 1_000 * index as i64, old, new, ops, bank)
    }

    #[derive(Default)]
    struct Recorder {
        retained: Vec<char>,
        deleted: Vec<char>,
        applied: Vec<u64>,
    }

    impl ReplayHooks<bool> for Recorder {
        fn new_meta(&mut self, ctx: &InsertContext<'_>) -> bool {
            ctx.degraded
        }

        fn on_retain(&mut self, node: &mut CharacterNode<bool>, _ctx: &RetainContext<'_>) {
            self.retained.push(node.content);
        }

        fn on_delete(&mut self, node: &CharacterNode<bool>, _revision: &Revision) {
            self.deleted.push(node.content);
        }

        fn on_revision_applied(&mut self, _list: &DocumentList<bool>, revision: &Revision) {
            self.applied.push(revision.index);
        }
    }

    #[test]
    fn test_insert_retain_delete() {
        let pool = make_pool();
        let mut replay: DocumentReplay<bool> = DocumentReplay::new("pad");
        let mut hooks = Recorder::default();

        replay
            .apply(&rev(0, "alice", 1, 6, "+5*0", "hello"), &pool, &mut hooks)
            .unwrap();
        replay
            .apply(&rev(1, "bob", 6, 9, "=5+3*1", " yo"), &pool, &mut hooks)
            .unwrap();
        replay
            .apply(&rev(2, "bob", 9, 8, "=1-1", ""), &pool, &mut hooks)
            .unwrap();

        assert_eq!(replay.list().text(), "hllo yo\n");
        assert_eq!(hooks.deleted, vec!['e']);
        assert_eq!(hooks.applied, vec![0, 1, 2]);
        assert_eq!(replay.last_applied(), Some(2));

        let authors: String = replay
            .list()
            .iter()
            .map(|n| n.author.as_str().chars().next().unwrap_or('?'))
            .collect();
        assert_eq!(authors, "aaaabbb");
    }

    #[test]
    fn test_retain_with_attributes_walks_nodes_but_skips_tail() {
        let pool = make_pool();
        let mut replay: DocumentReplay<bool> = DocumentReplay::new("pad");
        let mut hooks = Recorder::default();
        replay
            .apply(&rev(0, "alice", 1, 3, "+2*0", "ab"), &pool, &mut hooks)
            .unwrap();
        replay
            .apply(&rev(1, "bob", 3, 3, "=3*2", ""), &pool, &mut hooks)
            .unwrap();
        assert_eq!(hooks.retained, vec!['a', 'b']);
    }

    #[test]
    fn test_fallback_counts_characters() {
        let pool = make_pool();
        let metrics = Arc::new(TestMetrics::default());
        let mut replay: DocumentReplay<bool> = DocumentReplay::with_metrics("pad", metrics.clone());
        let mut hooks = Recorder::default();

        replay
            .apply(&rev(0, "carol", 1, 4, "+3*3", "xyz"), &pool, &mut hooks)
            .unwrap();

        assert_eq!(replay.attribution_anomalies().get(&AuthorId::new("carol")), Some(&3));
        assert!(replay.list().iter().all(|n| n.meta && n.author.as_str() == "carol"));
        assert_eq!(metrics.get_count("pad_replay_attribution_fallback_total"), 3);
    }

    #[test]
    fn test_clearing_revision_erases_everything() {
        let pool = make_pool();
        let mut replay: DocumentReplay<bool> = DocumentReplay::new("pad");
        let mut hooks = Recorder::default();
        replay
            .apply(&rev(0, "alice", 1, 4, "+3*0", "abc"), &pool, &mut hooks)
            .unwrap();
        let stats = replay
            .apply(&rev(1, "alice", 4, 1, "-3", ""), &pool, &mut hooks)
            .unwrap();
        assert_eq!(replay.list().text(), "\n");
        assert_eq!(stats.removed, 3);
        assert_eq!(hooks.deleted, vec!['a', 'b', 'c']);
    }

    #[test]
    fn test_out_of_order_is_rejected() {
        let pool = make_pool();
        let mut replay: DocumentReplay<bool> = DocumentReplay::new("pad");
        let err = replay
            .apply(&rev(1, "alice", 1, 2, "+1*0", "a"), &pool, &mut PlainHooks)
            .unwrap_err();
        assert_eq!(err, ReplayError::OutOfOrder { expected: 0, got: 1 });
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_malformed_delta_leaves_list_untouched() {
        let pool = make_pool();
        let mut replay: DocumentReplay<bool> = DocumentReplay::new("pad");
        replay
            .apply(&rev(0, "alice", 1, 3, "+2*0", "ab"), &pool, &mut PlainHooks)
            .unwrap();

        let err = replay
            .apply(&rev(1, "alice", 3, 4, "=1?1+1*0", "c"), &pool, &mut PlainHooks)
            .unwrap_err();
        assert!(matches!(err, ReplayError::Codec { revision: 1, .. }));
        assert_eq!(replay.list().text(), "ab\n");
        assert_eq!(replay.last_applied(), Some(0));
    }

    #[test]
    fn test_short_char_bank_is_rejected_before_mutation() {
        let pool = make_pool();
        let mut replay: DocumentReplay<bool> = DocumentReplay::new("pad");
        let err = replay
            .apply(&rev(0, "alice", 1, 4, "+3*0", "ab"), &pool, &mut PlainHooks)
            .unwrap_err();
        assert!(matches!(err, ReplayError::CharBankExhausted { needed: 3, available: 2, .. }));
        assert!(replay.list().is_empty());
    }

    #[test]
    fn test_overrun_poisons_replay() {
        let pool = make_pool();
        let metrics = Arc::new(TestMetrics::default());
        let mut replay: DocumentReplay<bool> = DocumentReplay::with_metrics("pad", metrics.clone());
        let err = replay
            .apply(&rev(0, "alice", 1, 1, "=5", ""), &pool, &mut PlainHooks)
            .unwrap_err();
        assert!(err.is_fatal());

        let next = replay
            .apply(&rev(0, "alice", 1, 2, "+1*0", "a"), &pool, &mut PlainHooks)
            .unwrap_err();
        assert_eq!(next, ReplayError::Poisoned(0));
        assert_eq!(metrics.get_count("pad_replay_overrun_total"), 1);
    }

    #[test]
    fn test_delete_past_end_is_a_list_error() {
        let pool = make_pool();
        let mut replay: DocumentReplay<bool> = DocumentReplay::new("pad");
        replay
            .apply(&rev(0, "alice", 1, 2, "+1*0", "a"), &pool, &mut PlainHooks)
            .unwrap();
        let err = replay
            .apply(&rev(1, "alice", 2, 2, "-2", ""), &pool, &mut PlainHooks)
            .unwrap_err();
        assert!(matches!(err, ReplayError::List { source: ListError::RemoveTail, .. }));
    }

    #[test]
    fn test_large_delete_inspects_each_node_once() {
        let pool = make_pool();
        let mut replay: DocumentReplay<bool> = DocumentReplay::new("pad");
        let mut hooks = Recorder::default();
        let n: u64 = 50_000;
        let bank = "x".repeat(n as usize);
        let insert = Operation::Insert { count: n, lines: 0, attrs: vec![0] }.to_string();
        replay
            .apply(&rev(0, "alice", 1, n + 1, &insert, &bank), &pool, &mut hooks)
            .unwrap();

        let delete = crate::codec::encode_operations(&[
            Operation::Retain { count: 1, lines: 0, attrs: None },
            Operation::Delete { count: n - 1, lines: 0 },
        ]);
        let stats = replay
            .apply(&rev(1, "bob", n + 1, 2, &delete, ""), &pool, &mut hooks)
            .unwrap();

        assert_eq!(stats.removed, n - 1);
        assert_eq!(hooks.deleted.len() as u64, n - 1);
        assert_eq!(replay.list().text(), "x\n");
    }

    #[test]
    fn test_malformed_revision_is_reported_once() {
        let pool = make_pool();
        let metrics = Arc::new(TestMetrics::default());
        let mut replay: DocumentReplay<bool> = DocumentReplay::with_metrics("pad", metrics.clone());
        let bad = rev(0, "alice", 1, 2, "+1?0", "a");

        for _ in 0..3 {
            assert!(replay.apply(&bad, &pool, &mut PlainHooks).is_err());
        }
        assert_eq!(metrics.get_count("pad_replay_malformed_delta_total"), 1);

        replay
            .apply(&rev(0, "alice", 1, 2, "+1*0", "a"), &pool, &mut PlainHooks)
            .unwrap();
        assert!(replay
            .apply(&rev(1, "alice", 2, 3, "=1+1?", "b"), &pool, &mut PlainHooks)
            .is_err());
        assert_eq!(metrics.get_count("pad_replay_malformed_delta_total"), 2);
    }

    #[test]
    fn test_empty_insert_records_no_fallback() {
        let pool = make_pool();
        let metrics = Arc::new(TestMetrics::default());
        let mut replay: DocumentReplay<bool> = DocumentReplay::with_metrics("pad", metrics.clone());
        let stats = replay
            .apply(&rev(0, "carol", 1, 1, "+0*3", ""), &pool, &mut PlainHooks)
            .unwrap();
        assert_eq!(stats.fallback, 0);
        assert!(replay.attribution_anomalies().is_empty());
        assert_eq!(metrics.get_count("pad_replay_attribution_fallback_total"), 0);
    }
}
