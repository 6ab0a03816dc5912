//! # Arena Benchmark
//!
//! Fixed slot tables against the measuring heap, plus the cost of a full
//! deactivation pass over a linked graph.
//!
//! Run with: `cargo bench --package tally_core`

// Benchmarks don't need docs and may have intentionally unused code
#![allow(missing_docs)]
#![allow(dead_code)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tally_core::{Arena, ArenaResult, CapacityPlan, Deactivator, Handle, Link, Payload, TypeSet};

/// Objects per iteration.
const OBJECT_COUNT: usize = 10_000;

struct Node {
    value: u64,
    next: Link<Node>,
}

impl Payload for Node {
    fn release_links(&mut self) {
        self.next.clear();
    }

    fn deactivate_links(&mut self, deactivator: &mut Deactivator<'_>) -> ArenaResult<()> {
        deactivator.deactivate_link(&mut self.next)
    }
}

fn types() -> TypeSet {
    TypeSet::builder()
        .register_named::<u64>("word")
        .register_named::<Node>("node")
        .build()
        .expect("benchmark types")
}

fn fixed_arena(types: &TypeSet, count: usize) -> Arena {
    Arena::fixed(types, &CapacityPlan::uniform(types.names(), count)).expect("benchmark plan")
}

fn alloc_and_clear(arena: &Arena, count: usize) {
    let mut handles: Vec<Handle<u64>> = Vec::with_capacity(count);
    for i in 0..count {
        handles.push(arena.alloc(i as u64));
    }
    for handle in &mut handles {
        handle.clear();
    }
}

/// Benchmark: allocate and release words in bulk.
fn bench_alloc_clear(c: &mut Criterion) {
    let types = types();
    let mut group = c.benchmark_group("alloc_clear");

    for count in [1_000, OBJECT_COUNT] {
        let fixed = fixed_arena(&types, count);
        group.bench_with_input(BenchmarkId::new("fixed", count), &count, |b, &count| {
            b.iter(|| alloc_and_clear(black_box(&fixed), count));
        });

        let measuring = Arena::measuring(&types);
        group.bench_with_input(BenchmarkId::new("measuring", count), &count, |b, &count| {
            b.iter(|| alloc_and_clear(black_box(&measuring), count));
        });
    }

    group.finish();
}

/// Benchmark: interleaved alloc/free keeping one object live.
fn bench_slot_reuse(c: &mut Criterion) {
    let types = types();
    let arena = fixed_arena(&types, 1);

    c.bench_function("slot_reuse_10k", |b| {
        b.iter(|| {
            for i in 0..OBJECT_COUNT as u64 {
                let mut word = arena.alloc(i);
                black_box(*word.get());
                word.clear();
            }
        });
    });
}

/// Benchmark: deactivate a linked list into mementos.
fn bench_deactivation(c: &mut Criterion) {
    let types = types();

    c.bench_function("deactivate_list_10k", |b| {
        b.iter(|| {
            let mut arena = fixed_arena(&types, OBJECT_COUNT);
            let mut head = Link::Null;
            for value in 0..OBJECT_COUNT as u64 {
                head = Link::Live(arena.alloc(Node { value, next: head }));
            }

            let mut deactivator = Deactivator::new(&mut arena).expect("active arena");
            deactivator.deactivate_link(&mut head).expect("deactivation");
            let ledger = deactivator.finish();
            black_box(ledger.len())
        });
    });
}

criterion_group!(benches, bench_alloc_clear, bench_slot_reuse, bench_deactivation);
criterion_main!(benches);
