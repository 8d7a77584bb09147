//! Performance benchmarks for keysync-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use keysync_engine::{
    compute_diff, prefix_range_end, Connection, KeyCollection, KeysDiff, MemoryStore, RangeKey,
    RetryPolicy,
};

fn collection(prefix: &str, size: usize, variant: &str) -> KeyCollection {
    (0..size)
        .map(|i| {
            let key = format!("{prefix}service/{i:06}/config");
            let value = format!("value-{i}-{variant}");
            (key.clone(), RangeKey::detached(key, value))
        })
        .collect()
}

fn bench_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_diff");

    for size in [100, 1_000, 10_000].iter() {
        // Identical sides
        group.bench_with_input(BenchmarkId::new("in_sync", size), size, |b, &size| {
            let src = collection("/src/", size, "a");
            let dst = collection("/dst/", size, "a");
            b.iter(|| compute_diff(black_box(&src), "/src/", black_box(&dst), "/dst/"))
        });

        // Every value differs
        group.bench_with_input(BenchmarkId::new("all_changed", size), size, |b, &size| {
            let src = collection("/src/", size, "a");
            let dst = collection("/dst/", size, "b");
            b.iter(|| compute_diff(black_box(&src), "/src/", black_box(&dst), "/dst/"))
        });

        // Half the destination is stale, half the source is new
        group.bench_with_input(BenchmarkId::new("half_overlap", size), size, |b, &size| {
            let src = collection("/src/", size, "a");
            let dst: KeyCollection = collection("/dst/", size * 2, "a")
                .into_iter()
                .skip(size / 2)
                .collect();
            b.iter(|| compute_diff(black_box(&src), "/src/", black_box(&dst), "/dst/"))
        });
    }

    group.finish();
}

fn bench_memory_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_sync");

    for size in [100, 1_000].iter() {
        group.bench_with_input(BenchmarkId::new("diff_and_apply", size), size, |b, &size| {
            b.iter(|| {
                let store = MemoryStore::with_keys(
                    collection("/src/", size, "a")
                        .into_values()
                        .map(|k| (k.key, k.value)),
                );
                let conn = Connection::new(store, RetryPolicy::default());
                let diff = conn.diff_prefixes("/src/", "/dst/").unwrap_or_else(|_| KeysDiff::new());
                conn.apply_diff_to_prefix(black_box("/dst/"), black_box(&diff))
            })
        });
    }

    group.finish();
}

fn bench_range_end(c: &mut Criterion) {
    c.bench_function("prefix_range_end", |b| {
        b.iter(|| prefix_range_end(black_box(b"/registry/services/endpoints/")))
    });
}

criterion_group!(benches, bench_diff, bench_memory_sync, bench_range_end);
criterion_main!(benches);
