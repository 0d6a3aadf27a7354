//! Pairwise interaction accumulators.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::types::{AuthorId, LoginSession};

/// Whether `(a, b)` and `(b, a)` are the same entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PairMode {
    /// Unordered pairs (perception, simultaneity).
    Symmetric,
    /// Ordered pairs, `from -> to` (support).
    Directional,
}

/// Scores for every pair of authors seen so far.
///
/// Registering a new author creates zero entries against every known author,
/// so the map is always fully populated over the author set.
#[derive(Debug, Clone, Serialize)]
pub struct InteractionAccumulator {
    mode: PairMode,
    authors: BTreeSet<AuthorId>,
    #[serde(skip)]
    scores: BTreeMap<(AuthorId, AuthorId), f64>,
}

impl InteractionAccumulator {
    /// Accumulator over unordered pairs.
    pub fn symmetric() -> Self {
        Self::new(PairMode::Symmetric)
    }

    /// Accumulator over ordered pairs.
    pub fn directional() -> Self {
        Self::new(PairMode::Directional)
    }

    fn new(mode: PairMode) -> Self {
        Self {
            mode,
            authors: BTreeSet::new(),
            scores: BTreeMap::new(),
        }
    }

    fn key(&self, a: &AuthorId, b: &AuthorId) -> (AuthorId, AuthorId) {
        match self.mode {
            PairMode::Symmetric if b < a => (b.clone(), a.clone()),
            _ => (a.clone(), b.clone()),
        }
    }

    /// Add an author with zero scores against everyone known.
    pub fn register(&mut self, author: &AuthorId) {
        if self.authors.contains(author) {
            return;
        }
        let others: Vec<AuthorId> = self.authors.iter().cloned().collect();
        for other in &others {
            let k = self.key(author, other);
            self.scores.insert(k, 0.0);
            if self.mode == PairMode::Directional {
                self.scores.insert((other.clone(), author.clone()), 0.0);
            }
        }
        self.authors.insert(author.clone());
    }

    /// Add `value` to the pair. Interactions of an author with themself are
    /// ignored.
    pub fn notify(&mut self, from: &AuthorId, to: &AuthorId, value: f64) {
        if from == to {
            return;
        }
        self.register(from);
        self.register(to);
        let k = self.key(from, to);
        *self.scores.entry(k).or_insert(0.0) += value;
    }

    /// Score of a pair, zero when either author is unknown.
    pub fn get(&self, from: &AuthorId, to: &AuthorId) -> f64 {
        self.scores.get(&self.key(from, to)).copied().unwrap_or(0.0)
    }

    /// Authors seen so far, sorted.
    pub fn authors(&self) -> &BTreeSet<AuthorId> {
        &self.authors
    }

    /// Every stored pair and its score.
    pub fn scores(&self) -> impl Iterator<Item = (&(AuthorId, AuthorId), f64)> {
        self.scores.iter().map(|(k, v)| (k, *v))
    }

    /// Pairing mode.
    pub fn mode(&self) -> PairMode {
        self.mode
    }
}

/// Pairwise co-presence of login sessions, in milliseconds.
#[derive(Debug, Clone)]
pub struct SessionOverlap {
    sessions: BTreeSet<LoginSession>,
    scores: InteractionAccumulator,
}

impl Default for SessionOverlap {
    fn default() -> Self {
        Self {
            sessions: BTreeSet::new(),
            scores: InteractionAccumulator::symmetric(),
        }
    }
}

impl SessionOverlap {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add sessions, scoring each new one against every session seen before.
    ///
    /// Sessions delivered twice are counted once. Returns how many were new.
    pub fn receive(&mut self, sessions: impl IntoIterator<Item = LoginSession>) -> usize {
        let mut added = 0;
        for session in sessions {
            if self.sessions.contains(&session) {
                continue;
            }
            self.scores.register(&session.user);
            for other in &self.sessions {
                if other.user == session.user {
                    continue;
                }
                let shared = session.overlap_ms(other);
                if shared > 0 {
                    self.scores.notify(&session.user, &other.user, shared as f64);
                }
            }
            self.sessions.insert(session);
            added += 1;
        }
        added
    }

    /// Overlap between two users.
    pub fn get(&self, a: &AuthorId, b: &AuthorId) -> f64 {
        self.scores.get(a, b)
    }

    /// Underlying accumulator.
    pub fn accumulator(&self) -> &InteractionAccumulator {
        &self.scores
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> AuthorId {
        AuthorId::new(s)
    }

    #[test]
    fn test_symmetric_pairs_share_an_entry() {
        let mut acc = InteractionAccumulator::symmetric();
        acc.notify(&id("b"), &id("a"), 1.0);
        acc.notify(&id("a"), &id("b"), 2.0);
        assert_eq!(acc.get(&id("a"), &id("b")), 3.0);
        assert_eq!(acc.get(&id("b"), &id("a")), 3.0);
    }

    #[test]
    fn test_directional_pairs_are_distinct() {
        let mut acc = InteractionAccumulator::directional();
        acc.notify(&id("a"), &id("b"), 5.0);
        assert_eq!(acc.get(&id("a"), &id("b")), 5.0);
        assert_eq!(acc.get(&id("b"), &id("a")), 0.0);
    }

    #[test]
    fn test_registration_zero_fills() {
        let mut acc = InteractionAccumulator::directional();
        acc.register(&id("a"));
        acc.register(&id("b"));
        acc.register(&id("c"));
        // 3 authors, 6 ordered pairs.
        assert_eq!(acc.scores().count(), 6);
        assert!(acc.scores().all(|(_, v)| v == 0.0));

        let mut sym = InteractionAccumulator::symmetric();
        sym.register(&id("a"));
        sym.register(&id("b"));
        sym.register(&id("c"));
        assert_eq!(sym.scores().count(), 3);
    }

    #[test]
    fn test_self_interaction_ignored() {
        let mut acc = InteractionAccumulator::symmetric();
        acc.notify(&id("a"), &id("a"), 1.0);
        assert!(acc.authors().is_empty());
        assert_eq!(acc.scores().count(), 0);
    }

    #[test]
    fn test_session_overlap() {
        let mut overlap = SessionOverlap::new();
        overlap.receive([
            LoginSession::new("A", 0, 100),
            LoginSession::new("B", 50, 200),
            LoginSession::new("A", 150, 300),
        ]);
        // 50 from the first A session, 50 from the second.
        assert_eq!(overlap.get(&id("A"), &id("B")), 100.0);
    }

    #[test]
    fn test_same_user_sessions_never_overlap() {
        let mut overlap = SessionOverlap::new();
        overlap.receive([LoginSession::new("A", 0, 100), LoginSession::new("A", 0, 100)]);
        overlap.receive([LoginSession::new("A", 10, 90)]);
        assert_eq!(overlap.accumulator().scores().count(), 0);
    }

    #[test]
    fn test_duplicate_sessions_count_once() {
        let mut overlap = SessionOverlap::new();
        let a = LoginSession::new("A", 0, 100);
        let b = LoginSession::new("B", 50, 200);
        assert_eq!(overlap.receive([a.clone(), b.clone()]), 2);
        assert_eq!(overlap.receive([b]), 0);
        assert_eq!(overlap.get(&id("A"), &id("B")), 50.0);
    }
}
