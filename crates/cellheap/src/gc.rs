//! The mark-and-sweep collection cycle.
//!
//! A cycle is one synchronous, stop-the-world pass over the heap:
//! `Idle -> CollectingRoots -> Marking -> Sweeping -> Idle`. The mutator
//! performs no allocation and no root mutation while a cycle runs; both are
//! asserted.

use std::collections::HashSet;
use std::ptr::NonNull;
use std::time::Instant;

use crate::block::{HeapBlock, BLOCK_MASK, MAGIC_HEAP_BLOCK};
use crate::cell::{CellHeader, FLAG_LIVE, FLAG_MARKED};
use crate::heap::Heap;
use crate::metrics::{GcMetrics, PhaseTimer};
use crate::ptr::Gc;
use crate::roots::RootVisitor;
use crate::trace::{Trace, Visitor};

#[cfg(feature = "tracing")]
use crate::tracing::internal::GcPhase;

/// Where the collector currently is in its state machine.
///
/// Exposed for diagnostics; outside [`Heap::collect_garbage`] the state is
/// always `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    /// No cycle in progress.
    Idle,
    /// Snapshotting handles and ambient roots.
    CollectingRoots,
    /// Tracing the live object graph.
    Marking,
    /// Destructing and reclaiming unmarked cells.
    Sweeping,
}

// ============================================================================
// MarkingVisitor - worklist traversal
// ============================================================================

/// The visitor driving the mark phase.
///
/// Holds a LIFO worklist of discovered cells; the mark-bit guard in
/// [`Self::mark`] is what terminates traversal over arbitrary reference
/// cycles.
pub struct MarkingVisitor<'h> {
    blocks: &'h HashSet<usize>,
    worklist: Vec<NonNull<CellHeader>>,
    cells_marked: usize,
}

impl<'h> MarkingVisitor<'h> {
    pub(crate) fn new(blocks: &'h HashSet<usize>) -> Self {
        Self {
            blocks,
            worklist: Vec::new(),
            cells_marked: 0,
        }
    }

    /// Mark one cell and queue it for edge traversal.
    ///
    /// A pointer that does not land in a block this heap owns, or lands on a
    /// slot that is not a live cell, is heap corruption (an unreported edge
    /// already destroyed the target, or the mutator fabricated a pointer).
    /// There is no safe way to continue; halt immediately.
    pub(crate) fn mark(&mut self, cell: NonNull<CellHeader>) {
        let block_addr = cell.as_ptr() as usize & BLOCK_MASK;
        assert!(
            self.blocks.contains(&block_addr),
            "heap corruption: traversal reached {:p}, which is outside every owned block",
            cell.as_ptr()
        );
        // SAFETY: Registry membership means a live HeapBlock header sits at
        // the masked address.
        let magic = unsafe { (*(block_addr as *const HeapBlock)).magic() };
        assert_eq!(
            magic, MAGIC_HEAP_BLOCK,
            "heap corruption: block header clobbered at {block_addr:#x}"
        );

        // Raw flag read first; a free slot has no valid header to reference.
        // SAFETY: The slot is inside an owned block.
        let flags = unsafe { *cell.as_ptr().cast::<u8>() };
        assert_ne!(
            flags & FLAG_LIVE,
            0,
            "heap corruption: traversal reached swept cell {:p}",
            cell.as_ptr()
        );
        if flags & FLAG_MARKED != 0 {
            return;
        }

        // SAFETY: Just verified the slot holds a live cell.
        unsafe { cell.as_ref() }.set_marked();
        self.cells_marked += 1;
        self.worklist.push(cell);
    }

    /// Trace until the worklist is empty.
    pub(crate) fn drain(&mut self) {
        while let Some(cell) = self.worklist.pop() {
            // SAFETY: Only live, marked cells enter the worklist, so the
            // header and its vtable are valid.
            let trace = unsafe { cell.as_ref() }.vtable().trace;
            // SAFETY: The vtable was built for this cell's concrete type.
            unsafe { trace(cell, self) };
        }
    }

    pub(crate) const fn cells_marked(&self) -> usize {
        self.cells_marked
    }
}

impl Visitor for MarkingVisitor<'_> {
    #[inline]
    fn visit<T: Trace + 'static>(&mut self, cell: &Gc<T>) {
        self.mark(Gc::erased(cell));
    }
}

// ============================================================================
// Sweeping
// ============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SweepTally {
    pub(crate) cells_reclaimed: usize,
    pub(crate) cells_surviving: usize,
    pub(crate) bytes_reclaimed: usize,
    pub(crate) bytes_surviving: usize,
}

/// Sweep one block: destruct every live unmarked cell and return its slot
/// to the free list; clear the mark bit on every survivor so the next cycle
/// starts clean.
///
/// # Safety
///
/// The caller must own `block` exclusively and be past the mark phase (mark
/// bits are authoritative).
pub(crate) unsafe fn sweep_block(block: NonNull<HeapBlock>, tally: &mut SweepTally) {
    // SAFETY: Exclusive ownership per the contract.
    let block = unsafe { &mut *block.as_ptr() };
    for i in 0..block.cell_count() {
        if block.slot_flags(i) & FLAG_LIVE == 0 {
            continue;
        }
        let cell = block.cell_at(i);
        // SAFETY: The live flag was just observed set.
        let header = unsafe { cell.as_ref() };
        if header.is_marked() {
            header.clear_marked();
            tally.cells_surviving += 1;
            tally.bytes_surviving += header.vtable().cell_size;
        } else {
            let vtable = header.vtable();
            tally.cells_reclaimed += 1;
            tally.bytes_reclaimed += vtable.cell_size;
            // SAFETY: The cell is live and unmarked, so nothing reachable
            // references it; the destructor runs exactly once, here.
            unsafe { (vtable.drop)(cell) };
            // SAFETY: The destructor has run and the cell is unreachable.
            unsafe { block.deallocate(cell) };
        }
    }
}

/// Destruct every remaining live cell in `block`, marks ignored. Used by
/// heap teardown, which reclaims unconditionally.
///
/// # Safety
///
/// Same ownership contract as [`sweep_block`]; additionally no `Gc` into
/// this block may be dereferenced afterwards.
pub(crate) unsafe fn teardown_block(block: NonNull<HeapBlock>) {
    // SAFETY: Exclusive ownership per the contract.
    let block = unsafe { &mut *block.as_ptr() };
    for i in 0..block.cell_count() {
        if block.slot_flags(i) & FLAG_LIVE == 0 {
            continue;
        }
        let cell = block.cell_at(i);
        // SAFETY: The live flag was just observed set.
        let vtable = unsafe { cell.as_ref() }.vtable();
        // SAFETY: Teardown destructs each live cell exactly once.
        unsafe { (vtable.drop)(cell) };
        // SAFETY: The destructor has run.
        unsafe { block.deallocate(cell) };
    }
}

// ============================================================================
// Cycle orchestration
// ============================================================================

impl Heap {
    /// Run one full synchronous mark-and-sweep cycle.
    ///
    /// Safe to call at any point the mutator is not mid-construction or
    /// mid-destruction of a cell. While a [`DeferGc`](crate::DeferGc) guard
    /// is alive the cycle is postponed instead and runs when the last guard
    /// drops.
    ///
    /// # Panics
    ///
    /// Panics on re-entrant invocation (e.g. from a cell destructor) and on
    /// any corruption discovered during traversal.
    pub fn collect_garbage(&self) {
        if self.defer_depth.get() > 0 {
            self.pending_collection.set(true);
            return;
        }
        assert_eq!(
            self.state.get(),
            CollectorState::Idle,
            "re-entrant collection cycle"
        );

        let gc_id = crate::tracing::internal::next_gc_id();
        #[cfg(feature = "tracing")]
        let _cycle_span = crate::tracing::internal::trace_gc_cycle(gc_id);
        #[cfg(not(feature = "tracing"))]
        let _ = gc_id;

        let cycle_start = Instant::now();
        let mut timer = PhaseTimer::new();

        // Roots are frozen for the whole cycle; the snapshot below is
        // authoritative.
        self.roots.borrow_mut().seal();

        self.state.set(CollectorState::CollectingRoots);
        timer.start();
        let mut root_cells: Vec<NonNull<CellHeader>> = Vec::new();
        {
            #[cfg(feature = "tracing")]
            let _span = crate::tracing::internal::trace_phase(GcPhase::Roots);
            root_cells.extend(self.roots.borrow().iter());
            if let Some(callback) = self.ambient_roots.borrow().as_ref() {
                let mut visitor = RootVisitor::new(&mut root_cells);
                callback(&mut visitor);
            }
        }
        timer.end_roots();
        let roots = root_cells.len();

        self.state.set(CollectorState::Marking);
        timer.start();
        let cells_marked = {
            #[cfg(feature = "tracing")]
            let _span = crate::tracing::internal::trace_phase(GcPhase::Mark);
            let registry = self.block_registry.borrow();
            let mut visitor = MarkingVisitor::new(&registry);
            for cell in root_cells {
                visitor.mark(cell);
            }
            visitor.drain();
            visitor.cells_marked()
        };
        timer.end_mark();

        self.state.set(CollectorState::Sweeping);
        timer.start();
        let mut tally = SweepTally::default();
        {
            #[cfg(feature = "tracing")]
            let _span = crate::tracing::internal::trace_phase(GcPhase::Sweep);
            let allocators = self.allocators.borrow();
            for allocator in allocators.iter() {
                for &block in &allocator.blocks {
                    // SAFETY: The heap owns its blocks exclusively and the
                    // mark phase has completed.
                    unsafe { sweep_block(block, &mut tally) };
                }
            }
        }
        timer.end_sweep();

        self.state.set(CollectorState::Idle);
        self.roots.borrow_mut().unseal();
        self.allocations_since_cycle.set(0);
        self.pending_collection.set(false);
        self.total_collections.set(self.total_collections.get() + 1);

        let metrics = GcMetrics {
            duration: cycle_start.elapsed(),
            roots_duration: timer.roots,
            mark_duration: timer.mark,
            sweep_duration: timer.sweep,
            roots,
            cells_marked,
            cells_reclaimed: tally.cells_reclaimed,
            cells_surviving: tally.cells_surviving,
            bytes_reclaimed: tally.bytes_reclaimed,
            bytes_surviving: tally.bytes_surviving,
            total_collections: self.total_collections.get(),
        };
        self.last_metrics.set(metrics);

        #[cfg(feature = "tracing")]
        crate::tracing::internal::log_cycle_end(gc_id, &metrics);
    }
}
