//! Randomized graphs: survival after a cycle must match reachability
//! computed independently over the same adjacency lists.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use cellheap::{Gc, Heap, Trace};

#[derive(Trace)]
struct Node {
    index: usize,
    edges: RefCell<Vec<Gc<Node>>>,
    dropped: Rc<Cell<bool>>,
}

impl Drop for Node {
    fn drop(&mut self) {
        assert!(!self.dropped.get(), "destructor ran twice");
        self.dropped.set(true);
    }
}

/// Minimal deterministic generator, enough to shape a graph.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.0 >> 33
    }

    fn below(&mut self, bound: usize) -> usize {
        (self.next() as usize) % bound
    }
}

/// Reachability over plain index adjacency, independent of the collector.
fn reachable(adjacency: &[Vec<usize>], roots: &[usize]) -> Vec<bool> {
    let mut seen = vec![false; adjacency.len()];
    let mut stack: Vec<usize> = roots.to_vec();
    while let Some(index) = stack.pop() {
        if seen[index] {
            continue;
        }
        seen[index] = true;
        stack.extend(&adjacency[index]);
    }
    seen
}

fn run_graph(seed: u64, node_count: usize, edges_per_node: usize, root_count: usize) {
    let mut rng = Lcg(seed);
    let heap = Heap::new();

    let mut drop_flags = Vec::with_capacity(node_count);
    let mut cells = Vec::with_capacity(node_count);
    for index in 0..node_count {
        let dropped = Rc::new(Cell::new(false));
        drop_flags.push(Rc::clone(&dropped));
        cells.push(heap.allocate(Node {
            index,
            edges: RefCell::new(Vec::new()),
            dropped,
        }));
    }

    let mut adjacency = vec![Vec::new(); node_count];
    for from in 0..node_count {
        for _ in 0..rng.below(edges_per_node + 1) {
            let to = rng.below(node_count);
            adjacency[from].push(to);
            cells[from].edges.borrow_mut().push(cells[to]);
        }
    }

    let mut root_indices = Vec::with_capacity(root_count);
    let mut handles = Vec::with_capacity(root_count);
    for _ in 0..root_count {
        let index = rng.below(node_count);
        root_indices.push(index);
        handles.push(heap.root(cells[index]));
    }

    // The construction-time pointer table is not a root.
    drop(cells);

    heap.collect_garbage();

    let expected = reachable(&adjacency, &root_indices);
    let mut expected_live = 0;
    for (index, flag) in drop_flags.iter().enumerate() {
        assert_eq!(
            flag.get(),
            !expected[index],
            "node {index} survival disagrees with reachability (seed {seed})"
        );
        if expected[index] {
            expected_live += 1;
        }
    }
    assert_eq!(heap.stats().live_cells, expected_live);
    assert_eq!(heap.last_gc_metrics().cells_marked, expected_live);

    // Surviving edges are still intact.
    for handle in &handles {
        for edge in handle.edges.borrow().iter() {
            assert!(Gc::is_live(edge));
            assert!(edge.index < node_count);
        }
    }

    drop(handles);
    heap.collect_garbage();
    assert!(drop_flags.iter().all(|flag| flag.get()));
    assert_eq!(heap.stats().live_cells, 0);
}

#[test]
fn sparse_graph_matches_reference_reachability() {
    run_graph(0x5EED_0001, 200, 2, 10);
}

#[test]
fn dense_graph_matches_reference_reachability() {
    run_graph(0x5EED_0002, 150, 6, 5);
}

#[test]
fn mostly_unrooted_graph_matches_reference_reachability() {
    run_graph(0x5EED_0003, 300, 3, 1);
}

#[test]
fn graph_with_many_roots_matches_reference_reachability() {
    run_graph(0x5EED_0004, 100, 4, 40);
}
