//! Benchmark suite for whole-partition consistency checks.
//!
//! Covers the full pipeline: streaming bridge ingest, index build, and the
//! three scans over clean and corrupted synthetic trees.
//!
//! Run: cargo bench --bench check_bench

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use hfsck::{CheckOptions, ConsistencyChecker, MemoryStore, NodeId, NodeRecord, PartitionSource};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn build_tree(node_count: u64) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new("bench"));
    for i in 1..=node_count {
        let children: Vec<NodeId> = [2 * i, 2 * i + 1]
            .into_iter()
            .filter(|&c| c <= node_count)
            .map(|c| NodeId(c as u128))
            .collect();
        store.add_node(NodeRecord {
            id: NodeId(i as u128),
            parent: if i == 1 {
                NodeId::NO_PARENT
            } else {
                NodeId((i / 2) as u128)
            },
            children,
            references: Vec::new(),
        });
    }
    store
}

fn check(store: &Arc<MemoryStore>) {
    let mut checker = ConsistencyChecker::new(CheckOptions::default());
    let report = checker
        .check(
            Arc::clone(store) as Arc<dyn PartitionSource>,
            store.as_ref(),
        )
        .unwrap();
    assert!(report.clean || report.queued_repairs > 0);
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_clean_tree(c: &mut Criterion) {
    let mut group = c.benchmark_group("check_clean_tree");
    for size in [1_000u64, 10_000, 100_000] {
        let store = build_tree(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &store, |b, store| {
            b.iter(|| check(store));
        });
    }
    group.finish();
}

fn bench_corrupted_tree(c: &mut Criterion) {
    let store = build_tree(10_000);
    // Every 100th leaf-ish node points at a parent that does not exist.
    for i in (9_000..10_000u64).step_by(100) {
        store.add_node(NodeRecord {
            id: NodeId(i as u128),
            parent: NodeId(5_000_000 + i as u128),
            children: Vec::new(),
            references: Vec::new(),
        });
    }

    c.bench_function("check_tree_with_orphans", |b| {
        b.iter(|| check(&store));
    });
}

criterion_group!(benches, bench_clean_tree, bench_corrupted_tree);
criterion_main!(benches);
