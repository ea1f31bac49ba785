//! Rooting surfaces: handles, the ambient-root callback, collection
//! deferral, and heap teardown.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use cellheap::{Gc, Heap, Trace};

#[derive(Trace)]
struct Payload {
    value: u32,
    drops: Rc<Cell<usize>>,
}

impl Drop for Payload {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

fn payload(heap: &Heap, value: u32, drops: &Rc<Cell<usize>>) -> Gc<Payload> {
    heap.allocate(Payload {
        value,
        drops: Rc::clone(drops),
    })
}

#[test]
fn cloned_handle_keeps_cell_alive_after_original_drops() {
    let heap = Heap::new();
    let drops = Rc::new(Cell::new(0));

    let original = heap.root(payload(&heap, 7, &drops));
    let clone = original.clone();
    assert_eq!(heap.handle_count(), 2);

    drop(original);
    assert_eq!(heap.handle_count(), 1);
    heap.collect_garbage();
    assert_eq!(drops.get(), 0);
    assert_eq!(clone.value, 7);

    drop(clone);
    assert_eq!(heap.handle_count(), 0);
    heap.collect_garbage();
    assert_eq!(drops.get(), 1);
}

#[test]
fn handle_releases_its_root_slot_on_drop() {
    let heap = Heap::new();
    let drops = Rc::new(Cell::new(0));

    {
        let _scoped = heap.root(payload(&heap, 1, &drops));
        assert_eq!(heap.handle_count(), 1);
    }
    assert_eq!(heap.handle_count(), 0);

    heap.collect_garbage();
    assert_eq!(drops.get(), 1);
}

#[test]
fn ambient_root_callback_keeps_native_state_alive() {
    let heap = Heap::new();
    let drops = Rc::new(Cell::new(0));

    // Stand-in for interpreter-owned state not covered by handles.
    let global_slot: Rc<RefCell<Option<Gc<Payload>>>> = Rc::new(RefCell::new(None));
    {
        let global_slot = Rc::clone(&global_slot);
        heap.set_ambient_root_callback(move |visitor| {
            if let Some(cell) = global_slot.borrow().as_ref() {
                visitor.visit_root(cell);
            }
        });
    }

    *global_slot.borrow_mut() = Some(payload(&heap, 42, &drops));
    heap.collect_garbage();
    assert_eq!(drops.get(), 0);
    assert_eq!(heap.last_gc_metrics().roots, 1);
    assert_eq!(global_slot.borrow().as_ref().unwrap().value, 42);

    // Emptying the native slot makes the cell unreachable on the next cycle.
    *global_slot.borrow_mut() = None;
    heap.collect_garbage();
    assert_eq!(drops.get(), 1);
    assert_eq!(heap.stats().live_cells, 0);
}

#[test]
fn cleared_ambient_callback_no_longer_roots() {
    let heap = Heap::new();
    let drops = Rc::new(Cell::new(0));

    let slot = Rc::new(RefCell::new(Some(payload(&heap, 1, &drops))));
    {
        let slot = Rc::clone(&slot);
        heap.set_ambient_root_callback(move |visitor| {
            if let Some(cell) = slot.borrow().as_ref() {
                visitor.visit_root(cell);
            }
        });
    }

    heap.collect_garbage();
    assert_eq!(drops.get(), 0);

    heap.clear_ambient_root_callback();
    heap.collect_garbage();
    assert_eq!(drops.get(), 1);

    *slot.borrow_mut() = None;
}

#[test]
fn deferred_collections_run_when_the_last_guard_drops() {
    let heap = Heap::new();
    let drops = Rc::new(Cell::new(0));
    heap.set_collect_on_every_allocation(true);

    let outer = heap.defer_gc();
    let inner = heap.defer_gc();

    // Each allocation requests a cycle; all requests are postponed, so the
    // unrooted intermediate cells survive the wiring window.
    for i in 0..5 {
        let _ = payload(&heap, i, &drops);
    }
    assert_eq!(drops.get(), 0);
    assert_eq!(heap.stats().live_cells, 5);

    drop(inner);
    assert_eq!(drops.get(), 0, "outer guard still defers");

    drop(outer);
    assert_eq!(drops.get(), 5, "pending cycle runs at depth zero");
    assert_eq!(heap.stats().live_cells, 0);
}

#[test]
fn defer_guard_without_pending_request_collects_nothing() {
    let heap = Heap::new();
    let drops = Rc::new(Cell::new(0));

    let before = heap.last_gc_metrics().total_collections;
    {
        let _guard = heap.defer_gc();
        let _ = payload(&heap, 1, &drops);
    }
    assert_eq!(heap.last_gc_metrics().total_collections, before);
    assert_eq!(drops.get(), 0);
}

#[test]
fn heap_teardown_destructs_every_cell() {
    let drops = Rc::new(Cell::new(0));

    let heap = Heap::new();
    let rooted = heap.root(payload(&heap, 1, &drops));
    for i in 0..10 {
        let _ = payload(&heap, i, &drops);
    }

    // Teardown sweeps rooted and unrooted cells alike.
    drop(heap);
    assert_eq!(drops.get(), 11);

    // The handle outlives the heap; dropping it afterwards is inert.
    drop(rooted);
}
