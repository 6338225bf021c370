//! Node pool benchmarks
//!
//! Measures single-node churn and bulk allocation against the pool.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use relocmem::{ArenaSegment, NodeAllocator};

fn bench_single_node_churn(c: &mut Criterion) {
    let seg = ArenaSegment::new(4 * 1024 * 1024).unwrap();
    let alloc = NodeAllocator::<[u64; 4], _>::new(&seg).unwrap();

    c.bench_function("allocate_deallocate_one", |b| {
        b.iter(|| {
            let node = alloc.allocate_one().unwrap();
            unsafe { alloc.deallocate_one(black_box(node)) };
        });
    });
}

fn bench_bulk(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk");
    let seg = ArenaSegment::new(16 * 1024 * 1024).unwrap();
    let alloc = NodeAllocator::<[u64; 4], _>::new(&seg).unwrap();

    for count in [16, 256, 4096].iter() {
        group.bench_with_input(BenchmarkId::new("allocate_many", count), count, |b, &count| {
            b.iter(|| {
                let chain = alloc.allocate_many(black_box(count)).unwrap();
                unsafe { alloc.deallocate_many(chain) };
            });
        });

        group.bench_with_input(BenchmarkId::new("one_by_one", count), count, |b, &count| {
            let mut nodes = Vec::with_capacity(count);
            b.iter(|| {
                nodes.extend((0..count).map(|_| alloc.allocate_one().unwrap()));
                for node in nodes.drain(..) {
                    unsafe { alloc.deallocate_one(node) };
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_single_node_churn, bench_bulk);
criterion_main!(benches);
