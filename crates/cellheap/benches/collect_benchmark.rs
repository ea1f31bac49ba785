//! Collection cycle benchmarks: sweep-heavy, mark-heavy, and mixed heaps.

use std::cell::RefCell;
use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};

use cellheap::{Gc, Heap, Trace};

#[derive(Trace)]
struct Node {
    value: usize,
    next: RefCell<Option<Gc<Node>>>,
}

fn chain(heap: &Heap, length: usize) -> Gc<Node> {
    let mut head = heap.allocate(Node {
        value: 0,
        next: RefCell::new(None),
    });
    for value in 1..length {
        let node = heap.allocate(Node {
            value,
            next: RefCell::new(Some(head)),
        });
        head = node;
    }
    head
}

fn benchmark_sweep_garbage(c: &mut Criterion) {
    let mut group = c.benchmark_group("collect");
    group.sample_size(20);

    for &count in &[1_000usize, 8_000] {
        group.bench_function(format!("sweep_{count}_dead"), |b| {
            b.iter(|| {
                let heap = Heap::new();
                let _ = black_box(chain(&heap, count));
                heap.collect_garbage();
                black_box(heap.last_gc_metrics().cells_reclaimed)
            });
        });
    }
    group.finish();
}

fn benchmark_mark_survivors(c: &mut Criterion) {
    let mut group = c.benchmark_group("collect");
    group.sample_size(20);

    for &count in &[1_000usize, 8_000] {
        group.bench_function(format!("mark_{count}_live"), |b| {
            let heap = Heap::new();
            let _root = heap.root(chain(&heap, count));
            b.iter(|| {
                heap.collect_garbage();
                black_box(heap.last_gc_metrics().cells_marked)
            });
        });
    }
    group.finish();
}

fn benchmark_mixed_heap(c: &mut Criterion) {
    let mut group = c.benchmark_group("collect");
    group.sample_size(20);

    group.bench_function("mixed_half_live_8000", |b| {
        b.iter(|| {
            let heap = Heap::new();
            let _root = heap.root(chain(&heap, 4_000));
            let _ = black_box(chain(&heap, 4_000));
            heap.collect_garbage();
            black_box(heap.last_gc_metrics().cells_surviving)
        });
    });
    group.finish();
}

fn benchmark_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate");

    group.bench_function("fresh_cells_1000", |b| {
        b.iter(|| {
            let heap = Heap::new();
            for value in 0..1_000 {
                let _ = black_box(heap.allocate(Node {
                    value,
                    next: RefCell::new(None),
                }));
            }
        });
    });

    group.bench_function("recycled_slots_1000", |b| {
        let heap = Heap::new();
        b.iter(|| {
            for value in 0..1_000 {
                let _ = black_box(heap.allocate(Node {
                    value,
                    next: RefCell::new(None),
                }));
            }
            heap.collect_garbage();
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    benchmark_sweep_garbage,
    benchmark_mark_survivors,
    benchmark_mixed_heap,
    benchmark_allocation
);
criterion_main!(benches);
