//! Cohesion diagram output.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::interactions::{InteractionAccumulator, SessionOverlap};
use crate::canonical::canonical_hash_hex;
use crate::policy::{blended_distance, connection_series, distance_series, AnalyticsPolicyV1};
use crate::types::AuthorId;

/// One author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Author id.
    pub id: AuthorId,
}

/// Diagram distance between two authors, for `source < target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDistance {
    /// Lower author id.
    pub source: AuthorId,
    /// Higher author id.
    pub target: AuthorId,
    /// Distance in `[0.2, 1.0]`.
    pub dist: f64,
}

/// Support flowing from `source` to `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConnection {
    /// Supporting author.
    pub source: AuthorId,
    /// Supported author.
    pub target: AuthorId,
    /// Intensity in `[0.0, 1.0]`.
    pub intensity: f64,
}

/// Nodes, pairwise distances and directed connections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CohesionGraph {
    /// Authors, sorted.
    pub nodes: Vec<GraphNode>,
    /// One entry per unordered pair.
    pub distances: Vec<NodeDistance>,
    /// One entry per ordered pair.
    pub connections: Vec<NodeConnection>,
}

impl CohesionGraph {
    /// The graph with no authors.
    pub fn empty() -> Self {
        Self::default()
    }

    /// True when there is nothing to draw.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Content fingerprint, for change detection by clients.
    pub fn fingerprint(&self) -> String {
        canonical_hash_hex(self)
    }
}

/// Normalize the accumulators into a graph over `authors`.
pub fn build_graph(
    authors: &BTreeSet<AuthorId>,
    support: &InteractionAccumulator,
    perception: &InteractionAccumulator,
    simultaneity: &SessionOverlap,
    policy: &AnalyticsPolicyV1,
) -> CohesionGraph {
    if authors.len() < 2 {
        return CohesionGraph::empty();
    }
    let sorted: Vec<&AuthorId> = authors.iter().collect();

    let ordered: Vec<(&AuthorId, &AuthorId)> = sorted
        .iter()
        .flat_map(|a| sorted.iter().filter(move |b| a != *b).map(move |b| (*a, *b)))
        .collect();
    let raw_support: Vec<f64> = ordered.iter().map(|(a, b)| support.get(a, b)).collect();

    let unordered: Vec<(&AuthorId, &AuthorId)> = sorted
        .iter()
        .enumerate()
        .flat_map(|(i, a)| sorted[i + 1..].iter().map(move |b| (*a, *b)))
        .collect();
    let raw_perception: Vec<f64> = unordered.iter().map(|(a, b)| perception.get(a, b)).collect();
    let raw_simultaneity: Vec<f64> = unordered
        .iter()
        .map(|(a, b)| simultaneity.get(a, b))
        .collect();

    let intensity = connection_series(&raw_support);
    let perception_dist = distance_series(&raw_perception);
    let simultaneity_dist = distance_series(&raw_simultaneity);

    CohesionGraph {
        nodes: sorted
            .iter()
            .map(|id| GraphNode { id: (*id).clone() })
            .collect(),
        distances: unordered
            .iter()
            .enumerate()
            .map(|(i, (a, b))| NodeDistance {
                source: (*a).clone(),
                target: (*b).clone(),
                dist: blended_distance(perception_dist[i], simultaneity_dist[i], policy),
            })
            .collect(),
        connections: ordered
            .iter()
            .zip(intensity)
            .map(|((a, b), intensity)| NodeConnection {
                source: (*a).clone(),
                target: (*b).clone(),
                intensity,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LoginSession;

    fn id(s: &str) -> AuthorId {
        AuthorId::new(s)
    }

    fn authors(names: &[&str]) -> BTreeSet<AuthorId> {
        names.iter().map(|n| id(n)).collect()
    }

    #[test]
    fn test_fewer_than_two_authors_is_empty() {
        let graph = build_graph(
            &authors(&["a"]),
            &InteractionAccumulator::directional(),
            &InteractionAccumulator::symmetric(),
            &SessionOverlap::new(),
            &AnalyticsPolicyV1::default(),
        );
        assert!(graph.is_empty());
        assert!(graph.distances.is_empty());
    }

    #[test]
    fn test_pair_counts_and_boundaries() {
        let mut support = InteractionAccumulator::directional();
        support.notify(&id("a"), &id("b"), 4.0);
        support.notify(&id("b"), &id("c"), 1.0);
        let mut perception = InteractionAccumulator::symmetric();
        perception.notify(&id("a"), &id("b"), 2.0);
        let mut overlap = SessionOverlap::new();
        overlap.receive([LoginSession::new("a", 0, 100), LoginSession::new("b", 50, 200)]);

        let graph = build_graph(
            &authors(&["c", "b", "a"]),
            &support,
            &perception,
            &overlap,
            &AnalyticsPolicyV1::default(),
        );

        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.nodes[0].id, id("a"));
        assert_eq!(graph.connections.len(), 6);
        assert_eq!(graph.distances.len(), 3);

        let conn = |s: &str, t: &str| {
            graph
                .connections
                .iter()
                .find(|c| c.source == id(s) && c.target == id(t))
                .map(|c| c.intensity)
        };
        assert_eq!(conn("a", "b"), Some(1.0));
        assert_eq!(conn("b", "c"), Some(0.25));
        assert_eq!(conn("b", "a"), Some(0.0));

        // a-b is the maximum of both series.
        let ab = &graph.distances[0];
        assert_eq!((ab.source.as_str(), ab.target.as_str()), ("a", "b"));
        assert!((ab.dist - 0.2).abs() < 1e-9);
        // b-c never interacted.
        let bc = graph
            .distances
            .iter()
            .find(|d| d.source == id("b") && d.target == id("c"))
            .map(|d| d.dist);
        assert_eq!(bc, Some(1.0));
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let empty = CohesionGraph::empty();
        let mut other = CohesionGraph::empty();
        assert_eq!(empty.fingerprint(), other.fingerprint());
        other.nodes.push(GraphNode { id: id("a") });
        assert_ne!(empty.fingerprint(), other.fingerprint());
    }
}
