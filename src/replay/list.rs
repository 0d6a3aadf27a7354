//! Cursor-addressed character list backed by an arena.
//!
//! Nodes live in a `Vec` and link to each other by slot index. Slot 0 is the
//! `head` sentinel and slot 1 is the `tail` sentinel, which carries the line
//! break every document ends with. Removed slots go on a free list and are
//! reused by later inserts.

use thiserror::Error;

use crate::types::AuthorId;

/// Errors from structural list operations.
///
/// None of these are reachable when replaying well-formed revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ListError {
    /// The cursor would have moved past `tail`.
    #[error("Cursor overrun: cannot advance past the tail")]
    Overrun,

    /// Insert was attempted with the cursor on `tail`.
    #[error("Cannot insert after the tail")]
    InsertAfterTail,

    /// Removal would have removed `tail`.
    #[error("Cannot remove the tail")]
    RemoveTail,
}

/// Address of a node in a [`DocumentList`].
///
/// Ids are only meaningful for the list that produced them, and only until
/// the node is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// The `head` sentinel.
    pub const HEAD: NodeId = NodeId(0);
    /// The `tail` sentinel.
    pub const TAIL: NodeId = NodeId(1);
}

/// One character of the document.
#[derive(Debug, Clone, PartialEq)]
pub struct CharacterNode<M> {
    /// Exactly one character.
    pub content: char,
    /// Who wrote it.
    pub author: AuthorId,
    /// Per-analytic metadata.
    pub meta: M,
}

#[derive(Debug, Clone)]
struct Slot<M> {
    node: Option<CharacterNode<M>>,
    prev: usize,
    next: usize,
}

/// Ordered character list with `head`/`tail` sentinels and one cursor.
#[derive(Debug, Clone)]
pub struct DocumentList<M> {
    slots: Vec<Slot<M>>,
    free: Vec<usize>,
    cursor: usize,
    len: usize,
}

const HEAD: usize = 0;
const TAIL: usize = 1;

impl<M: Default> Default for DocumentList<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Default> DocumentList<M> {
    /// Create an empty document (`head -> tail`).
    pub fn new() -> Self {
        let sentinel = |content| CharacterNode {
            content,
            author: AuthorId::new(""),
            meta: M::default(),
        };
        Self {
            slots: vec![
                Slot {
                    node: Some(sentinel('\u{0}')),
                    prev: HEAD,
                    next: TAIL,
                },
                Slot {
                    node: Some(sentinel('\n')),
                    prev: HEAD,
                    next: TAIL,
                },
            ],
            free: Vec::new(),
            cursor: HEAD,
            len: 0,
        }
    }
}

impl<M> DocumentList<M> {
    /// Drop every content node and put the cursor on `head`.
    pub fn erase_all(&mut self) {
        self.slots.truncate(2);
        self.slots[HEAD].next = TAIL;
        self.slots[TAIL].prev = HEAD;
        self.free.clear();
        self.cursor = HEAD;
        self.len = 0;
    }

    /// Current cursor position.
    pub fn cursor(&self) -> NodeId {
        NodeId(self.cursor)
    }

    /// Put the cursor back on `head`.
    pub fn reset_cursor_to_head(&mut self) {
        self.cursor = HEAD;
    }

    /// Move the cursor `n` nodes forward. Landing on `tail` is allowed.
    pub fn advance(&mut self, n: u64) -> Result<(), ListError> {
        for _ in 0..n {
            if self.cursor == TAIL {
                return Err(ListError::Overrun);
            }
            self.cursor = self.slots[self.cursor].next;
        }
        Ok(())
    }

    /// Insert a node after the cursor and move the cursor onto it.
    pub fn insert_after_cursor_and_advance(
        &mut self,
        content: char,
        author: AuthorId,
        meta: M,
    ) -> Result<NodeId, ListError> {
        if self.cursor == TAIL {
            return Err(ListError::InsertAfterTail);
        }
        let prev = self.cursor;
        let next = self.slots[prev].next;
        let slot = Slot {
            node: Some(CharacterNode { content, author, meta }),
            prev,
            next,
        };
        let id = match self.free.pop() {
            Some(id) => {
                self.slots[id] = slot;
                id
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        };
        self.slots[prev].next = id;
        self.slots[next].prev = id;
        self.cursor = id;
        self.len += 1;
        Ok(NodeId(id))
    }

    /// Remove the node after the cursor and return it.
    pub fn remove_after_cursor(&mut self) -> Result<CharacterNode<M>, ListError> {
        let id = self.slots[self.cursor].next;
        if id == TAIL {
            return Err(ListError::RemoveTail);
        }
        let next = self.slots[id].next;
        self.slots[self.cursor].next = next;
        self.slots[next].prev = self.cursor;
        self.free.push(id);
        self.len -= 1;
        self.slots[id].node.take().ok_or(ListError::RemoveTail)
    }

    /// Node at the cursor.
    pub fn current(&self) -> &CharacterNode<M> {
        self.node(self.cursor)
    }

    /// Mutable node at the cursor.
    pub fn current_mut(&mut self) -> &mut CharacterNode<M> {
        self.node_mut(self.cursor)
    }

    /// Content nodes after the cursor, in document order.
    pub fn after_cursor(&self) -> impl Iterator<Item = &CharacterNode<M>> + '_ {
        NodeIds {
            list: self,
            at: self.slots[self.cursor].next,
        }
        .map(move |id| self.node(id.0))
    }

    /// Look up a live node.
    pub fn get(&self, id: NodeId) -> Option<&CharacterNode<M>> {
        self.slots.get(id.0).and_then(|s| s.node.as_ref())
    }

    /// Look up a live node mutably.
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut CharacterNode<M>> {
        self.slots.get_mut(id.0).and_then(|s| s.node.as_mut())
    }

    /// The `tail` sentinel.
    pub fn tail(&self) -> &CharacterNode<M> {
        self.node(TAIL)
    }

    /// Number of content nodes (sentinels excluded).
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when only the sentinels remain.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Ids of content nodes in document order.
    pub fn ids(&self) -> NodeIds<'_, M> {
        NodeIds {
            list: self,
            at: self.slots[HEAD].next,
        }
    }

    /// Content nodes in document order.
    pub fn iter(&self) -> impl Iterator<Item = &CharacterNode<M>> + '_ {
        self.ids().map(move |id| self.node(id.0))
    }

    /// Reconstructed text, including the trailing line break.
    pub fn text(&self) -> String {
        let mut out: String = self.iter().map(|n| n.content).collect();
        out.push(self.tail().content);
        out
    }

    fn node(&self, id: usize) -> &CharacterNode<M> {
        match self.slots[id].node.as_ref() {
            Some(node) => node,
            None => unreachable!("linked slot {id} holds no node"),
        }
    }

    fn node_mut(&mut self, id: usize) -> &mut CharacterNode<M> {
        match self.slots[id].node.as_mut() {
            Some(node) => node,
            None => unreachable!("linked slot {id} holds no node"),
        }
    }
}

/// Iterator over content node ids.
#[derive(Debug)]
pub struct NodeIds<'a, M> {
    list: &'a DocumentList<M>,
    at: usize,
}

impl<M> Iterator for NodeIds<'_, M> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        if self.at == TAIL {
            return None;
        }
        let id = self.at;
        self.at = self.list.slots[id].next;
        Some(NodeId(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn author(s: &str) -> AuthorId {
        AuthorId::new(s)
    }

    fn make_list(text: &str) -> DocumentList<()> {
        let mut list = DocumentList::new();
        for c in text.chars() {
            list.insert_after_cursor_and_advance(c, author("a"), ()).unwrap();
        }
        list
    }

    #[test]
    fn test_new_list_is_just_a_line_break() {
        let list: DocumentList<()> = DocumentList::new();
        assert!(list.is_empty());
        assert_eq!(list.text(), "\n");
        assert_eq!(list.cursor(), NodeId::HEAD);
    }

    #[test]
    fn test_insert_and_text() {
        let list = make_list("abc");
        assert_eq!(list.text(), "abc\n");
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_advance_onto_tail_is_allowed() {
        let mut list = make_list("ab");
        list.reset_cursor_to_head();
        list.advance(3).unwrap();
        assert_eq!(list.cursor(), NodeId::TAIL);
        assert_eq!(list.advance(1), Err(ListError::Overrun));
    }

    #[test]
    fn test_insert_after_tail_fails() {
        let mut list = make_list("a");
        list.reset_cursor_to_head();
        list.advance(2).unwrap();
        assert_eq!(
            list.insert_after_cursor_and_advance('x', author("a"), ()),
            Err(ListError::InsertAfterTail)
        );
    }

    #[test]
    fn test_remove_after_cursor() {
        let mut list = make_list("abc");
        list.reset_cursor_to_head();
        list.advance(1).unwrap();
        let removed = list.remove_after_cursor().unwrap();
        assert_eq!(removed.content, 'b');
        assert_eq!(list.text(), "ac\n");
        list.advance(1).unwrap();
        assert_eq!(list.remove_after_cursor(), Err(ListError::RemoveTail));
    }

    #[test]
    fn test_removed_slots_are_reused() {
        let mut list = make_list("abc");
        list.reset_cursor_to_head();
        list.remove_after_cursor().unwrap();
        list.insert_after_cursor_and_advance('z', author("b"), ()).unwrap();
        assert_eq!(list.text(), "zbc\n");
        assert_eq!(list.slots.len(), 5);
    }

    #[test]
    fn test_erase_all() {
        let mut list = make_list("hello");
        list.erase_all();
        assert_eq!(list.text(), "\n");
        assert!(list.is_empty());
        assert_eq!(list.cursor(), NodeId::HEAD);
    }

    #[test]
    fn test_after_cursor() {
        let mut list = make_list("abc");
        list.reset_cursor_to_head();
        list.advance(1).unwrap();
        let rest: String = list.after_cursor().map(|n| n.content).collect();
        assert_eq!(rest, "bc");

        list.advance(2).unwrap();
        assert_eq!(list.after_cursor().count(), 0);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Reset,
        Advance(u64),
        Insert(char),
        Remove,
        Erase,
    }

    fn step_strategy() -> impl Strategy<Value = Step> {
        prop_oneof![
            Just(Step::Reset),
            (0u64..4).prop_map(Step::Advance),
            proptest::char::range('a', 'e').prop_map(Step::Insert),
            Just(Step::Remove),
            Just(Step::Erase),
        ]
    }

    proptest! {
        #[test]
        fn list_matches_vec_model(steps in proptest::collection::vec(step_strategy(), 0..80)) {
            let mut list: DocumentList<()> = DocumentList::new();
            // Model: content chars plus a cursor position, 0 = head, len+1 = tail.
            let mut model: Vec<char> = Vec::new();
            let mut cursor = 0usize;

            for step in steps {
                match step {
                    Step::Reset => {
                        list.reset_cursor_to_head();
                        cursor = 0;
                    }
                    Step::Advance(n) => {
                        let ok = cursor + n as usize <= model.len() + 1;
                        prop_assert_eq!(list.advance(n).is_ok(), ok);
                        if !ok {
                            list.reset_cursor_to_head();
                            cursor = 0;
                        } else {
                            cursor += n as usize;
                        }
                    }
                    Step::Insert(c) => {
                        let ok = cursor <= model.len();
                        prop_assert_eq!(list.insert_after_cursor_and_advance(c, author("a"), ()).is_ok(), ok);
                        if ok {
                            model.insert(cursor, c);
                            cursor += 1;
                        }
                    }
                    Step::Remove => {
                        let ok = cursor < model.len();
                        prop_assert_eq!(list.remove_after_cursor().is_ok(), ok);
                        if ok {
                            model.remove(cursor);
                        }
                    }
                    Step::Erase => {
                        list.erase_all();
                        model.clear();
                        cursor = 0;
                    }
                }
                let mut expected: String = model.iter().collect();
                expected.push('\n');
                prop_assert_eq!(list.text(), expected);
                prop_assert_eq!(list.len(), model.len());
            }
        }
    }
}
