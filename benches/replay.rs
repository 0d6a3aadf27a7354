//! Performance benchmarks for document replay.
//!
//! Run with: `cargo bench --bench replay`
//!
//! ## Performance Targets
//!
//! | Operation | Target | Notes |
//! |-----------|--------|-------|
//! | Decode op string | <5µs | Short typing revision |
//! | Full replay | Linear in revisions | Plain hooks |
//! | Cohesion catch-up | <2x full replay | Stable evaluation included |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use pad_replay_kernel::{
    decode_operations, encode_operations, AnalyticsPolicyV1, AttributePool, BlockAnalyzer,
    CohesionAnalyzer, DocumentReplay, Operation, PlainHooks, Revision, AUTHOR_KEY,
};

const AUTHORS: [&str; 3] = ["alice", "bob", "carol"];

fn make_pool() -> AttributePool {
    let mut pool = AttributePool::new();
    for author in AUTHORS {
        pool.push(AUTHOR_KEY, author);
    }
    pool
}

/// Typing history: every revision appends one word, every tenth ends a
/// paragraph. Authors rotate and revisions are two minutes apart.
fn make_history(count: usize) -> Vec<Revision> {
    let mut revisions = Vec::with_capacity(count);
    let mut len: u64 = 0;
    let mut lines: u64 = 0;

    for i in 0..count {
        let author = i % AUTHORS.len();
        let breaks = (i % 10 == 9) as u64;
        let bank = if breaks == 1 { "word\n" } else { "word " };

        let mut ops = Vec::with_capacity(2);
        if len > 0 {
            ops.push(Operation::Retain {
                count: len,
                lines,
                attrs: None,
            });
        }
        ops.push(Operation::Insert {
            count: bank.len() as u64,
            lines: breaks,
            attrs: vec![author as u32],
        });

        revisions.push(Revision::new(
            i as u64,
            AUTHORS[author],
            i as i64 * 120_000,
            len + 1,
            len + 1 + bank.len() as u64,
            &encode_operations(&ops),
            bank,
        ));
        len += bank.len() as u64;
        lines += breaks;
    }
    revisions
}

/// Benchmark op string decoding.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for (name, op_string) in [
        ("typing", "=1k:3+1*0"),
        ("paste", "=1k:3+2s:8*0*1=9-4:1"),
        ("format", "=5*2*3=2k:4*1=c"),
    ] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("ops", name), op_string, |b, s| {
            b.iter(|| {
                decode_operations(black_box(s))
                    .collect::<Result<Vec<_>, _>>()
                    .map(|ops| ops.len())
            })
        });
    }

    group.finish();
}

/// Benchmark replaying a whole history with no analytics attached.
fn bench_full_replay(c: &mut Criterion) {
    let pool = make_pool();
    let mut group = c.benchmark_group("full_replay");

    for count in [100, 1_000, 5_000] {
        let revisions = make_history(count);

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(
            BenchmarkId::new("revisions", count),
            &revisions,
            |b, revisions| {
                b.iter(|| {
                    let mut replay = DocumentReplay::<()>::new("bench");
                    for revision in revisions {
                        replay
                            .apply(black_box(revision), &pool, &mut PlainHooks)
                            .map_err(|e| e.to_string())?;
                    }
                    Ok::<_, String>(replay.list().len())
                })
            },
        );
    }

    group.finish();
}

/// Benchmark analytics catching up on a settled history.
fn bench_analytics(c: &mut Criterion) {
    let pool = make_pool();
    let mut group = c.benchmark_group("analytics");

    for count in [100, 1_000] {
        let revisions = make_history(count);
        let now = count as i64 * 120_000 + 600_000;

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(
            BenchmarkId::new("cohesion", count),
            &revisions,
            |b, revisions| {
                b.iter(|| {
                    let mut analyzer =
                        CohesionAnalyzer::new("bench", AnalyticsPolicyV1::default());
                    analyzer
                        .catch_up(black_box(revisions), &pool, now)
                        .map(|report| report.applied)
                })
            },
        );
        group.bench_with_input(
            BenchmarkId::new("blocks", count),
            &revisions,
            |b, revisions| {
                b.iter(|| {
                    let mut analyzer = BlockAnalyzer::new("bench");
                    analyzer.catch_up(black_box(revisions), &pool)
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_decode, bench_full_replay, bench_analytics);

criterion_main!(benches);
