//! Golden tests for the replay kernel.
//!
//! These tests verify determinism and correctness of document replay.

use std::sync::Arc;

use pad_replay_kernel::{
    canonical_hash_hex, decode_operations, parse_attr_refs, AnalyticsPolicyV1, AttributePool,
    BlockAnalyzer, CodecError, CohesionAnalyzer, DocumentReplay, LoginSession, Operation,
    PlainHooks, ReplayError, Revision, StableTimestampSelector, TestMetrics, AUTHOR_KEY,
    HEADING_KEY,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn make_pool() -> AttributePool {
    let mut pool = AttributePool::new();
    pool.push(AUTHOR_KEY, "A"); // 0
    pool.push(AUTHOR_KEY, "B"); // 1
    pool.push(HEADING_KEY, "h1"); // 2
    pool.push(AUTHOR_KEY, ""); // 3
    pool
}

/// "hello world" by A, a comma by B, then A deletes " world".
fn greeting_history() -> Vec<Revision> {
    vec![
        Revision::new(0, "A", 0, 1, 12, "+b*0", "hello world"),
        Revision::new(1, "B", 1_000, 12, 13, "=5+1*1", ","),
        Revision::new(2, "A", 2_000, 13, 7, "=6-6", ""),
    ]
}

fn replay_all(revisions: &[Revision], pool: &AttributePool) -> DocumentReplay<()> {
    let mut replay = DocumentReplay::new("golden");
    for revision in revisions {
        replay.apply(revision, pool, &mut PlainHooks).unwrap();
    }
    replay
}

fn authors(replay: &DocumentReplay<()>) -> String {
    replay
        .list()
        .iter()
        .map(|node| node.author.as_str())
        .collect::<Vec<_>>()
        .join("")
}

// ─────────────────────────────────────────────────────────────────────────────
// DETERMINISM TESTS
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_replay_is_idempotent() {
    let pool = make_pool();
    let revisions = greeting_history();

    let first = replay_all(&revisions, &pool);
    let second = replay_all(&revisions, &pool);

    assert_eq!(first.list().text(), second.list().text());
    assert_eq!(authors(&first), authors(&second));
    assert_eq!(first.last_applied(), second.last_applied());
}

#[test]
fn test_cohesion_graph_fingerprint_is_stable() {
    let pool = make_pool();
    let revisions = vec![
        Revision::new(0, "A", 0, 1, 11, "+a*0", "aaaaaaaaaa"),
        Revision::new(1, "B", 120_000, 11, 15, "=a+4*1", "bbbb"),
    ];

    let mut fingerprints = Vec::new();
    for _ in 0..10 {
        let mut analyzer = CohesionAnalyzer::new("golden", AnalyticsPolicyV1::default());
        analyzer.receive_login_sessions(vec![
            LoginSession::new("A", 0, 100),
            LoginSession::new("B", 50, 200),
        ]);
        analyzer.catch_up(&revisions, &pool, 600_000).unwrap();
        fingerprints.push(analyzer.graph().fingerprint());
    }

    for (i, fingerprint) in fingerprints.iter().enumerate() {
        assert_eq!(
            &fingerprints[0], fingerprint,
            "Graph fingerprint must be deterministic (run {} differs from run 0)",
            i
        );
    }
}

#[test]
fn test_policy_change_changes_params_hash() {
    let policy1 = AnalyticsPolicyV1::default();
    let policy2 = AnalyticsPolicyV1 {
        format_edit_weight: 3.0,
        ..Default::default()
    };
    assert_ne!(policy1.params_hash(), policy2.params_hash());
    assert_eq!(policy1.params_hash(), AnalyticsPolicyV1::default().params_hash());
    assert_eq!(canonical_hash_hex(&policy1).len(), 16);
}

// ─────────────────────────────────────────────────────────────────────────────
// CORRECTNESS TESTS
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_text_and_authorship() {
    let pool = make_pool();
    let revisions = greeting_history();

    let replay = replay_all(&revisions[..2], &pool);
    assert_eq!(replay.list().text(), "hello, world\n");
    assert_eq!(authors(&replay), "AAAAABAAAAAA");

    let replay = replay_all(&revisions, &pool);
    assert_eq!(replay.list().text(), "hello,\n");
    assert_eq!(authors(&replay), "AAAAAB");
    assert_eq!(replay.last_applied(), Some(2));
}

#[test]
fn test_document_always_ends_with_line_break() {
    let pool = make_pool();
    let mut revisions = greeting_history();
    revisions.push(Revision::new(3, "B", 3_000, 7, 1, "-6", ""));

    let mut replay = DocumentReplay::<()>::new("golden");
    for revision in &revisions {
        replay.apply(revision, &pool, &mut PlainHooks).unwrap();
        assert!(replay.list().text().ends_with('\n'));
    }
    assert!(replay.list().is_empty());
    assert_eq!(replay.list().text(), "\n");
}

#[test]
fn test_malformed_revision_keeps_checkpoint() {
    let pool = make_pool();
    let revisions = greeting_history();
    let mut replay = replay_all(&revisions[..1], &pool);

    let bad = Revision::new(1, "B", 1_000, 12, 13, "=5?1*1", ",");
    let err = replay.apply(&bad, &pool, &mut PlainHooks).unwrap_err();
    assert!(matches!(err, ReplayError::Codec { revision: 1, .. }));
    assert!(!err.is_fatal());
    assert_eq!(replay.last_applied(), Some(0));
    assert_eq!(replay.list().text(), "hello world\n");

    // The good revision 1 still applies afterwards.
    replay.apply(&revisions[1], &pool, &mut PlainHooks).unwrap();
    assert_eq!(replay.last_applied(), Some(1));
}

#[test]
fn test_revisions_apply_in_order_only() {
    let pool = make_pool();
    let revisions = greeting_history();
    let mut replay = DocumentReplay::<()>::new("golden");

    let err = replay.apply(&revisions[1], &pool, &mut PlainHooks).unwrap_err();
    assert_eq!(err, ReplayError::OutOfOrder { expected: 0, got: 1 });
    assert_eq!(replay.last_applied(), None);
}

#[test]
fn test_fallback_attribution_is_counted() {
    let pool = make_pool();
    let metrics = Arc::new(TestMetrics::default());
    let mut replay = DocumentReplay::<()>::with_metrics("golden", metrics.clone());

    // Heading and blank author only: no usable author attribute.
    let revision = Revision::new(0, "C", 0, 1, 4, "+3*2*3", "xyz");
    let stats = replay.apply(&revision, &pool, &mut PlainHooks).unwrap();

    assert_eq!(stats.fallback, 3);
    assert_eq!(authors(&replay), "CCC");
    assert_eq!(replay.attribution_anomalies().values().sum::<u64>(), 3);
    assert_eq!(metrics.get_count("pad_replay_attribution_fallback_total"), 3);
}

#[test]
fn test_attribute_reference_parsing() {
    assert_eq!(parse_attr_refs("*5*c").unwrap(), vec![5, 12]);
    assert_eq!(parse_attr_refs("*5*12").unwrap(), vec![5, 38]);
    assert_eq!(parse_attr_refs("**5*c").unwrap(), vec![5, 12]);
    assert!(matches!(
        parse_attr_refs("*5*!"),
        Err(CodecError::MalformedDelta { .. })
    ));
}

#[test]
fn test_decoded_operations() {
    let ops: Vec<Operation> = decode_operations("=5:1+2*0-3")
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(
        ops,
        vec![
            Operation::Retain {
                count: 5,
                lines: 1,
                attrs: None
            },
            Operation::Insert {
                count: 2,
                lines: 0,
                attrs: vec![0]
            },
            Operation::Delete { count: 3, lines: 0 },
        ]
    );
}

#[test]
fn test_run_length_blocks() {
    let pool = make_pool();
    let revisions = vec![
        Revision::new(0, "A", 0, 1, 4, "+3*0", "aaa"),
        Revision::new(1, "B", 1, 4, 6, "=3+2*1", "bb"),
        Revision::new(2, "A", 2, 6, 7, "=5+1*0", "a"),
    ];
    let mut analyzer = BlockAnalyzer::new("golden");
    analyzer.catch_up(&revisions, &pool).unwrap();

    let blocks: Vec<(&str, usize)> = analyzer
        .blocks()
        .iter()
        .map(|b| (b.author.as_str(), b.block_length))
        .collect();
    assert_eq!(blocks, [("A", 3), ("B", 2), ("A", 1)]);
}

#[test]
fn test_stable_selection_is_incremental() {
    let mut selector = StableTimestampSelector::idle(60_000);

    let points = selector.select(&[0, 10_000, 200_000], 210_000);
    let indices: Vec<u64> = points.iter().map(|p| p.index).collect();
    assert_eq!(indices, [1]);

    // Nothing new until the latest revision settles.
    assert!(selector.select(&[0, 10_000, 200_000], 250_000).is_empty());
    let points = selector.select(&[0, 10_000, 200_000], 260_001);
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].index, 2);
    assert_eq!(selector.points().len(), 2);
}

#[test]
fn test_two_authors_without_interaction_are_far_apart() {
    let pool = make_pool();
    let revisions = vec![
        Revision::new(0, "A", 0, 1, 3, "+1*0+1:1*0", "a\n"),
        Revision::new(1, "B", 120_000, 3, 4, "=2+1*1", "b"),
    ];
    let mut analyzer = CohesionAnalyzer::new("golden", AnalyticsPolicyV1::default());
    analyzer.catch_up(&revisions, &pool, 600_000).unwrap();

    let graph = analyzer.graph();
    assert_eq!(graph.nodes.len(), 2);
    assert_eq!(graph.distances.len(), 1);
    assert!((graph.distances[0].dist - 1.0).abs() < 1e-9);
    assert!(graph.connections.iter().all(|c| c.intensity == 0.0));
}
