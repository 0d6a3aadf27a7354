//! Paragraph split and main-contributor detection.

use std::collections::BTreeMap;

use crate::replay::DocumentList;
use crate::types::AuthorId;

/// A run of non-line-break characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paragraph {
    /// Position of the first character.
    pub start: usize,
    /// Position of the terminating line break (or the document end).
    pub end: usize,
    /// Characters per author.
    pub contributors: BTreeMap<AuthorId, u64>,
    /// Author owning strictly more than half of the paragraph.
    pub main_contributor: Option<AuthorId>,
}

impl Paragraph {
    /// Number of characters.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Always false; empty paragraphs are never produced.
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// True when `position` belongs to this paragraph.
    pub fn contains(&self, position: usize) -> bool {
        (self.start..self.end).contains(&position)
    }
}

/// Split the document on line breaks, skipping empty paragraphs.
pub fn detect_paragraphs<M>(list: &DocumentList<M>) -> Vec<Paragraph> {
    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    let mut contributors: BTreeMap<AuthorId, u64> = BTreeMap::new();

    let mut close = |start: &mut Option<usize>, contributors: &mut BTreeMap<AuthorId, u64>, end| {
        if let Some(s) = start.take() {
            out.push(Paragraph {
                start: s,
                end,
                main_contributor: main_contributor(contributors, end - s),
                contributors: std::mem::take(contributors),
            });
        }
    };

    let mut position = 0;
    for node in list.iter() {
        if node.content == '\n' {
            close(&mut start, &mut contributors, position);
        } else {
            start.get_or_insert(position);
            *contributors.entry(node.author.clone()).or_insert(0) += 1;
        }
        position += 1;
    }
    close(&mut start, &mut contributors, position);
    out
}

fn main_contributor(contributors: &BTreeMap<AuthorId, u64>, len: usize) -> Option<AuthorId> {
    contributors
        .iter()
        .find(|(_, &count)| count as f64 > len as f64 * 0.5)
        .map(|(author, _)| author.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_list(text: &str, authors: &str) -> DocumentList<()> {
        let mut list = DocumentList::new();
        for (c, a) in text.chars().zip(authors.chars()) {
            list.insert_after_cursor_and_advance(c, AuthorId::new(a.to_string()), ())
                .unwrap();
        }
        list
    }

    #[test]
    fn test_strict_majority() {
        let list = make_list("xxxxxxyyyy", "XXXXXXYYYY");
        let paragraphs = detect_paragraphs(&list);
        assert_eq!(paragraphs.len(), 1);
        assert_eq!(paragraphs[0].main_contributor, Some(AuthorId::new("X")));

        let list = make_list("xxxxxyyyyy", "XXXXXYYYYY");
        let paragraphs = detect_paragraphs(&list);
        assert_eq!(paragraphs[0].main_contributor, None);
    }

    #[test]
    fn test_split_on_line_breaks_skips_empty() {
        let list = make_list("ab\n\ncd\n", "AAAABBB");
        let paragraphs = detect_paragraphs(&list);
        assert_eq!(paragraphs.len(), 2);
        assert_eq!((paragraphs[0].start, paragraphs[0].end), (0, 2));
        assert_eq!((paragraphs[1].start, paragraphs[1].end), (4, 6));
        assert_eq!(paragraphs[1].len(), 2);
        assert!(paragraphs[1].contains(5));
        assert!(!paragraphs[1].contains(6));
    }

    #[test]
    fn test_last_paragraph_ends_at_document_end() {
        let list = make_list("ab\ncde", "AAABBB");
        let paragraphs = detect_paragraphs(&list);
        assert_eq!(paragraphs.len(), 2);
        assert_eq!((paragraphs[1].start, paragraphs[1].end), (3, 6));
        assert_eq!(paragraphs[1].main_contributor, Some(AuthorId::new("B")));
    }

    #[test]
    fn test_empty_document() {
        let list: DocumentList<()> = DocumentList::new();
        assert!(detect_paragraphs(&list).is_empty());
    }
}
