//! Conflict resolution and placement benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use replikv::common::{select_replicas, DeletionStrategy, Object, PropertyValue, RecordDigest};
use replikv::coordinator::resolver::{resolve, Reply, ReplicaResponse};
use uuid::Uuid;

fn responses(n: usize) -> Vec<ReplicaResponse> {
    (0..n)
        .map(|i| {
            let node = format!("node{}", i);
            if i % 3 == 0 {
                return ReplicaResponse::new(node, Reply::from_digest(Some(RecordDigest::tombstone(50))));
            }
            let mut obj = Object::new("Paragraph", Uuid::nil())
                .with_property("contents", PropertyValue::Text("x".repeat(64)));
            obj.created_at = 1;
            obj.last_update = 40 + i as u64;
            ReplicaResponse::new(
                node,
                Reply::Found {
                    digest: obj.digest(),
                    object: Some(obj),
                },
            )
        })
        .collect()
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");
    for n in [3usize, 5, 9] {
        let input = responses(n);
        for strategy in [
            DeletionStrategy::DeleteOnConflict,
            DeletionStrategy::TimeBasedResolution,
        ] {
            group.bench_with_input(
                BenchmarkId::new(strategy.to_string(), n),
                &input,
                |b, input| b.iter(|| resolve(black_box(strategy), black_box(input))),
            );
        }
    }
    group.finish();
}

fn bench_placement(c: &mut Criterion) {
    let nodes: Vec<String> = (0..16).map(|i| format!("node{}", i)).collect();
    let key = format!("tenant/Paragraph/{}", Uuid::new_v4());

    c.bench_function("hrw_select_3_of_16", |b| {
        b.iter(|| select_replicas(black_box(&key), black_box(&nodes), 3));
    });
}

criterion_group!(benches, bench_resolve, bench_placement);
criterion_main!(benches);
