//! The heap: size-class block management and the allocation surface.
//!
//! A [`Heap`] is explicit runtime-context state: one per interpreter realm,
//! created at start-up and torn down (sweeping everything unconditionally)
//! at shutdown. It is `!Send` and `!Sync`; a multithreaded embedder gives
//! each thread its own heap and never shares cells across them.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::ptr::NonNull;
use std::rc::Rc;

use crate::block::{HeapBlock, BLOCK_SIZE, MIN_CELL_SIZE};
use crate::cell::{vtable_of, CellHeader, GcBox};
use crate::gc::{teardown_block, CollectorState};
use crate::metrics::{GcMetrics, HeapStats};
use crate::ptr::Gc;
use crate::roots::{Handle, RootSet, RootVisitor};
use crate::trace::Trace;

/// After this many allocations since the last cycle, the next allocation
/// runs a collection first.
pub const ALLOCATIONS_PER_COLLECTION: usize = 10_000;

/// Round a cell size up to its size class: the next power of two, at least
/// [`MIN_CELL_SIZE`].
fn size_class(size: usize) -> usize {
    let class = size.next_power_of_two().max(MIN_CELL_SIZE);
    assert!(
        HeapBlock::capacity_for(class) > 0,
        "cell of {size} bytes does not fit in a heap block"
    );
    class
}

// ============================================================================
// CellAllocator - all blocks of one size class
// ============================================================================

/// Owns every block of a single size class.
pub(crate) struct CellAllocator {
    cell_size: usize,
    pub(crate) blocks: Vec<NonNull<HeapBlock>>,
}

impl CellAllocator {
    const fn new(cell_size: usize) -> Self {
        Self {
            cell_size,
            blocks: Vec::new(),
        }
    }

    /// First-fit over the existing blocks' free lists. `None` means every
    /// block of this class is exhausted.
    fn allocate(&mut self) -> Option<NonNull<u8>> {
        for &block in &self.blocks {
            // SAFETY: The allocator owns its blocks exclusively.
            if let Some(slot) = unsafe { &mut *block.as_ptr() }.allocate() {
                return Some(slot);
            }
        }
        None
    }

    /// Allocate one more block for this class. `None` if the backing
    /// allocation fails.
    fn add_block(&mut self) -> Option<NonNull<HeapBlock>> {
        let block = HeapBlock::try_new(self.cell_size)?;
        self.blocks.push(block);
        Some(block)
    }
}

// ============================================================================
// Heap
// ============================================================================

/// A garbage-collected cell heap.
///
/// Allocate with [`Heap::allocate`], keep cells alive with [`Heap::root`]
/// or the ambient-root callback, reclaim with [`Heap::collect_garbage`].
pub struct Heap {
    pub(crate) allocators: RefCell<Vec<CellAllocator>>,
    /// Base addresses of every owned block, for O(1) validation of pointers
    /// discovered during marking.
    pub(crate) block_registry: RefCell<HashSet<usize>>,
    /// Shared with every [`Handle`] so release needs no heap reference.
    pub(crate) roots: Rc<RefCell<RootSet>>,
    pub(crate) ambient_roots: RefCell<Option<Box<dyn Fn(&mut RootVisitor<'_>)>>>,
    pub(crate) state: Cell<CollectorState>,
    pub(crate) allocations_since_cycle: Cell<usize>,
    collect_on_every_allocation: Cell<bool>,
    pub(crate) defer_depth: Cell<usize>,
    pub(crate) pending_collection: Cell<bool>,
    pub(crate) total_collections: Cell<usize>,
    pub(crate) last_metrics: Cell<GcMetrics>,
}

impl Heap {
    /// Create an empty heap. Blocks are allocated lazily, per size class,
    /// on first demand.
    #[must_use]
    pub fn new() -> Self {
        Self {
            allocators: RefCell::new(Vec::new()),
            block_registry: RefCell::new(HashSet::new()),
            roots: Rc::new(RefCell::new(RootSet::new())),
            ambient_roots: RefCell::new(None),
            state: Cell::new(CollectorState::Idle),
            allocations_since_cycle: Cell::new(0),
            collect_on_every_allocation: Cell::new(false),
            defer_depth: Cell::new(0),
            pending_collection: Cell::new(false),
            total_collections: Cell::new(0),
            last_metrics: Cell::new(GcMetrics::new()),
        }
    }

    /// Construct a cell in place and return an unrooted pointer to it.
    ///
    /// The cell is unreachable until the caller roots it or stores it in an
    /// already-reachable cell, so any collection before that point sweeps
    /// it. Root first (or hold a [`DeferGc`] guard) when allocating several
    /// cells that reference each other.
    ///
    /// # Panics
    ///
    /// Panics if called while a cycle is running (in particular from a cell
    /// destructor), or if `T` does not fit in a block. Aborts via
    /// [`std::alloc::handle_alloc_error`] if backing memory is unavailable
    /// even after a forced collection; a managed heap has no graceful
    /// degradation path.
    pub fn allocate<T: Trace + 'static>(&self, value: T) -> Gc<T> {
        assert_eq!(
            self.state.get(),
            CollectorState::Idle,
            "allocation during a collection cycle"
        );

        if self.collect_on_every_allocation.get()
            || self.allocations_since_cycle.get() >= ALLOCATIONS_PER_COLLECTION
        {
            self.collect_garbage();
        }

        let cell_size = size_class(std::mem::size_of::<GcBox<T>>());
        debug_assert!(std::mem::align_of::<GcBox<T>>() <= cell_size);
        let slot = self.allocate_slot(cell_size);

        let gc_box = slot.cast::<GcBox<T>>();
        // SAFETY: The slot is exclusively ours, cell_size-aligned, and
        // cell_size >= size_of::<GcBox<T>>().
        unsafe {
            gc_box.as_ptr().write(GcBox {
                header: CellHeader::new(vtable_of::<T>()),
                value,
            });
        }
        self.allocations_since_cycle
            .set(self.allocations_since_cycle.get() + 1);

        // SAFETY: Just initialized as a live cell.
        unsafe { Gc::from_gc_box(gc_box) }
    }

    fn allocate_slot(&self, cell_size: usize) -> NonNull<u8> {
        if let Some(slot) = self.try_existing_slot(cell_size) {
            return slot;
        }
        if let Some(slot) = self.try_new_block_slot(cell_size) {
            return slot;
        }
        // Backing memory refused. One forced cycle, then retry both paths;
        // a second refusal is fatal.
        self.collect_garbage();
        if let Some(slot) = self
            .try_existing_slot(cell_size)
            .or_else(|| self.try_new_block_slot(cell_size))
        {
            return slot;
        }
        std::alloc::handle_alloc_error(HeapBlock::layout())
    }

    fn try_existing_slot(&self, cell_size: usize) -> Option<NonNull<u8>> {
        let mut allocators = self.allocators.borrow_mut();
        let index = Self::allocator_index(&mut allocators, cell_size);
        allocators[index].allocate()
    }

    fn try_new_block_slot(&self, cell_size: usize) -> Option<NonNull<u8>> {
        let mut allocators = self.allocators.borrow_mut();
        let index = Self::allocator_index(&mut allocators, cell_size);
        let block = allocators[index].add_block()?;
        self.block_registry
            .borrow_mut()
            .insert(block.as_ptr() as usize);
        allocators[index].allocate()
    }

    fn allocator_index(allocators: &mut Vec<CellAllocator>, cell_size: usize) -> usize {
        allocators
            .iter()
            .position(|a| a.cell_size == cell_size)
            .unwrap_or_else(|| {
                allocators.push(CellAllocator::new(cell_size));
                allocators.len() - 1
            })
    }

    /// Root `cell` for the lifetime of the returned [`Handle`].
    pub fn root<T: Trace + 'static>(&self, cell: Gc<T>) -> Handle<T> {
        Handle::new(Rc::clone(&self.roots), cell)
    }

    /// Register the runtime's ambient-root enumeration, invoked once per
    /// cycle. It must report every cell reachable from native interpreter
    /// state (global bindings, live call-frame values) not covered by a
    /// [`Handle`].
    pub fn set_ambient_root_callback(&self, callback: impl Fn(&mut RootVisitor<'_>) + 'static) {
        *self.ambient_roots.borrow_mut() = Some(Box::new(callback));
    }

    /// Remove the ambient-root callback.
    pub fn clear_ambient_root_callback(&self) {
        *self.ambient_roots.borrow_mut() = None;
    }

    /// Postpone triggered collections while the returned guard is alive.
    ///
    /// Useful while wiring up a clump of fresh cells that reference each
    /// other before any of them is reachable. A collection requested in the
    /// meantime runs when the last guard drops.
    pub fn defer_gc(&self) -> DeferGc<'_> {
        self.defer_depth.set(self.defer_depth.get() + 1);
        DeferGc { heap: self }
    }

    /// Debug switch: run a full cycle before every allocation. Makes
    /// rooting bugs fail deterministically at the allocation nearest the
    /// mistake.
    pub fn set_collect_on_every_allocation(&self, enabled: bool) {
        self.collect_on_every_allocation.set(enabled);
    }

    /// Where the collector currently is; `Idle` outside
    /// [`Heap::collect_garbage`].
    #[must_use]
    pub fn collector_state(&self) -> CollectorState {
        self.state.get()
    }

    /// Statistics from the most recent cycle.
    #[must_use]
    pub fn last_gc_metrics(&self) -> GcMetrics {
        self.last_metrics.get()
    }

    /// Number of currently registered handles.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        self.roots.borrow().len()
    }

    /// Snapshot of heap occupancy.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let allocators = self.allocators.borrow();
        let mut stats = HeapStats::default();
        for allocator in allocators.iter() {
            for &block in &allocator.blocks {
                // SAFETY: The heap owns its blocks exclusively.
                let block = unsafe { block.as_ref() };
                stats.blocks += 1;
                stats.cells += block.cell_count() as usize;
                let mut live = 0;
                block.for_each_live_cell(|_| live += 1);
                stats.live_cells += live;
                stats.heap_bytes += BLOCK_SIZE;
            }
        }
        stats.free_cells = stats.cells - stats.live_cells;
        stats
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        // Teardown sweeps everything unconditionally. Destructors must not
        // allocate or touch roots, same as during a normal sweep.
        self.state.set(CollectorState::Sweeping);
        let allocators = self.allocators.get_mut();
        for allocator in allocators.iter_mut() {
            for &block in &allocator.blocks {
                // SAFETY: The heap owns its blocks exclusively and is being
                // destroyed; no cell will be referenced afterwards.
                unsafe { teardown_block(block) };
            }
        }
        for allocator in allocators.iter_mut() {
            for block in allocator.blocks.drain(..) {
                // SAFETY: Every live cell was destructed above.
                unsafe { HeapBlock::destroy(block) };
            }
        }
    }
}

// ============================================================================
// DeferGc - collection postponement guard
// ============================================================================

/// Guard returned by [`Heap::defer_gc`]. While at least one guard is alive,
/// triggered collections are recorded instead of run; the last guard to
/// drop runs the pending cycle.
pub struct DeferGc<'a> {
    heap: &'a Heap,
}

impl Drop for DeferGc<'_> {
    fn drop(&mut self) {
        let depth = self.heap.defer_depth.get() - 1;
        self.heap.defer_depth.set(depth);
        if depth == 0 && self.heap.pending_collection.get() {
            self.heap.collect_garbage();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::Visitor;

    struct Plain {
        value: u64,
    }

    // SAFETY: No Gc edges.
    unsafe impl Trace for Plain {
        fn trace(&self, _visitor: &mut impl Visitor) {}
    }

    #[test]
    fn size_class_rounds_to_power_of_two() {
        assert_eq!(size_class(1), MIN_CELL_SIZE);
        assert_eq!(size_class(16), 16);
        assert_eq!(size_class(17), 32);
        assert_eq!(size_class(100), 128);
        assert_eq!(size_class(2048), 2048);
    }

    #[test]
    #[should_panic(expected = "does not fit in a heap block")]
    fn oversized_cell_panics() {
        let _ = size_class(BLOCK_SIZE);
    }

    #[test]
    fn allocation_creates_one_block_per_class() {
        let heap = Heap::new();
        let a = heap.allocate(Plain { value: 1 });
        let b = heap.allocate(Plain { value: 2 });

        assert_eq!(a.value, 1);
        assert_eq!(b.value, 2);
        assert!(!Gc::ptr_eq(&a, &b));

        let stats = heap.stats();
        assert_eq!(stats.blocks, 1);
        assert_eq!(stats.live_cells, 2);
        assert_eq!(stats.heap_bytes, BLOCK_SIZE);
    }

    #[test]
    fn kind_reports_concrete_type_name() {
        let heap = Heap::new();
        let cell = heap.allocate(Plain { value: 7 });
        assert!(Gc::kind(&cell).contains("Plain"));
    }

    #[test]
    fn stats_track_reclamation() {
        let heap = Heap::new();
        for i in 0..10 {
            let _ = heap.allocate(Plain { value: i });
        }
        assert_eq!(heap.stats().live_cells, 10);

        heap.collect_garbage();
        assert_eq!(heap.stats().live_cells, 0);
        assert_eq!(heap.last_gc_metrics().cells_reclaimed, 10);
    }

    #[test]
    fn rooted_cell_survives_collect_on_every_allocation() {
        let heap = Heap::new();
        heap.set_collect_on_every_allocation(true);

        let first = heap.root(heap.allocate(Plain { value: 1 }));
        // Each of these allocations runs a full cycle first.
        for i in 0..5 {
            let _ = heap.allocate(Plain { value: i });
        }
        assert_eq!(first.value, 1);
        assert_eq!(heap.stats().live_cells, 2);
    }
}
