//! Maximal runs of consecutive nodes sharing a key.

use serde::Serialize;

use super::list::{CharacterNode, DocumentList};

/// A run of consecutive content nodes with an equal key.
///
/// Indices in `line_breaks` and `markers` are relative to the run start.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Run<V, Mk> {
    /// The shared key.
    pub value: V,
    /// Absolute position of the first node in the document.
    pub start: usize,
    /// Number of nodes in the run.
    pub length: usize,
    /// Relative positions of line breaks.
    pub line_breaks: Vec<usize>,
    /// Relative positions of marked nodes, with their marker.
    pub markers: Vec<(usize, Mk)>,
}

impl<V, Mk> Run<V, Mk> {
    /// Absolute position of the last node (inclusive).
    pub fn end(&self) -> usize {
        self.start + self.length.saturating_sub(1)
    }
}

/// Scan the content nodes of `list` (never `tail`) into maximal runs.
///
/// `key` computes the grouping value for a node; `marker` may tag a node
/// with extra data recorded in the run.
pub fn detect_runs<M, V, Mk, K, F>(list: &DocumentList<M>, mut key: K, mut marker: F) -> Vec<Run<V, Mk>>
where
    V: PartialEq,
    K: FnMut(&CharacterNode<M>) -> V,
    F: FnMut(&CharacterNode<M>) -> Option<Mk>,
{
    let mut runs: Vec<Run<V, Mk>> = Vec::new();
    for (position, node) in list.iter().enumerate() {
        let value = key(node);
        let extend = runs.last().is_some_and(|run| run.value == value);
        if !extend {
            runs.push(Run {
                value,
                start: position,
                length: 0,
                line_breaks: Vec::new(),
                markers: Vec::new(),
            });
        }
        let Some(run) = runs.last_mut() else { continue };
        let offset = run.length;
        if node.content == '\n' {
            run.line_breaks.push(offset);
        }
        if let Some(mark) = marker(node) {
            run.markers.push((offset, mark));
        }
        run.length += 1;
    }
    runs
}
