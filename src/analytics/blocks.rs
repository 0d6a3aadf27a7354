//! Author block segmentation for the minimap.
//!
//! The document is cut into maximal runs of characters with the same author
//! and the same `ignore_color` flag. Characters whose author came from the
//! revision fallback, or whose colors were reset with the blank author, are
//! drawn without author color.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::replay::{
    detect_runs, CharacterNode, DocumentReplay, InsertContext, ReplayError, ReplayHooks,
    RetainContext,
};
use crate::types::{AttributePool, AuthorId, NoOpMetrics, ReplayMetrics, Revision, RevisionIndex};

/// Per-character minimap state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockMeta {
    /// Draw without author color.
    pub ignore_color: bool,
    /// Heading type (`h1`..`h4`) when the character starts a heading.
    pub heading: Option<String>,
}

struct BlockHooks;

impl ReplayHooks<BlockMeta> for BlockHooks {
    fn new_meta(&mut self, ctx: &InsertContext<'_>) -> BlockMeta {
        BlockMeta {
            ignore_color: ctx.degraded,
            heading: ctx.heading.map(str::to_owned),
        }
    }

    fn on_retain(&mut self, node: &mut CharacterNode<BlockMeta>, ctx: &RetainContext<'_>) {
        node.meta.ignore_color = ctx.blank;
        node.meta.heading = ctx.heading.map(str::to_owned);
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// One minimap block.
///
/// Index fields are relative to the block start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorBlock {
    /// Author of every character in the block.
    pub author: AuthorId,
    /// Number of characters.
    pub block_length: usize,
    /// Draw without author color.
    #[serde(default, skip_serializing_if = "is_false")]
    pub ignore_color: bool,
    /// Line breaks inside the block.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub line_break_indices: Vec<usize>,
    /// Heading starts inside the block.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub heading_start_indices: Vec<usize>,
    /// Heading type per heading start.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub heading_types: BTreeMap<usize, String>,
}

/// Replays a document to its latest revision and segments it into blocks.
#[derive(Debug, Clone)]
pub struct BlockAnalyzer {
    replay: DocumentReplay<BlockMeta>,
    blocks: Vec<AuthorBlock>,
}

impl BlockAnalyzer {
    /// Create an analyzer for `pad`.
    pub fn new(pad: impl Into<String>) -> Self {
        Self::with_metrics(pad, Arc::new(NoOpMetrics))
    }

    /// Create an analyzer reporting replay anomalies to `metrics`.
    pub fn with_metrics(pad: impl Into<String>, metrics: Arc<dyn ReplayMetrics>) -> Self {
        Self {
            replay: DocumentReplay::with_metrics(pad, metrics),
            blocks: Vec::new(),
        }
    }

    /// Apply every revision not applied yet. Returns how many were applied.
    ///
    /// Blocks are recomputed only when the document changed.
    pub fn catch_up(
        &mut self,
        revisions: &[Revision],
        pool: &AttributePool,
    ) -> Result<usize, ReplayError> {
        let start = self.replay.next_index() as usize;
        let mut applied = 0;
        let mut result = Ok(());
        for revision in revisions.iter().skip(start) {
            if let Err(e) = self.replay.apply(revision, pool, &mut BlockHooks) {
                result = Err(e);
                break;
            }
            applied += 1;
        }
        if applied > 0 {
            self.blocks = self.segment();
        }
        result.map(|()| applied)
    }

    fn segment(&self) -> Vec<AuthorBlock> {
        detect_runs(
            self.replay.list(),
            |node| (node.author.clone(), node.meta.ignore_color),
            |node| node.meta.heading.clone(),
        )
        .into_iter()
        .map(|run| {
            let (author, ignore_color) = run.value;
            AuthorBlock {
                author,
                block_length: run.length,
                ignore_color,
                line_break_indices: run.line_breaks,
                heading_start_indices: run.markers.iter().map(|(i, _)| *i).collect(),
                heading_types: run.markers.into_iter().collect(),
            }
        })
        .collect()
    }

    /// Blocks of the latest applied revision. Empty for an empty document.
    pub fn blocks(&self) -> &[AuthorBlock] {
        &self.blocks
    }

    /// Last applied revision.
    pub fn last_applied(&self) -> Option<RevisionIndex> {
        self.replay.last_applied()
    }

    /// Fallback-attributed characters per revision author.
    pub fn attribution_anomalies(&self) -> &BTreeMap<AuthorId, u64> {
        self.replay.attribution_anomalies()
    }

    /// The private replay.
    pub fn replay(&self) -> &DocumentReplay<BlockMeta> {
        &self.replay
    }
}
