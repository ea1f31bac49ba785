//! `Gc<T>`: an unrooted pointer to a heap cell.

use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::cell::{CellHeader, GcBox, FLAG_LIVE, FLAG_MARKED};
use crate::trace::Trace;

/// A copyable pointer to a cell owned by a [`Heap`](crate::Heap).
///
/// `Gc<T>` is the edge type of the object graph: it is what cell kinds store
/// in their fields and report from [`Trace::trace`]. It does **not** root its
/// target. A cell stays alive only while it is reachable from the root set
/// (a [`Handle`](crate::Handle) or the runtime's ambient roots); a bare
/// `Gc<T>` held across a collection point without such a path is a dangling
/// pointer after the next cycle.
///
/// Cells never move, so the address identity of a `Gc<T>` is stable for the
/// cell's whole lifetime.
///
/// `Gc<T>` is `!Send` and `!Sync`; cells belong to exactly one heap and one
/// thread.
pub struct Gc<T: Trace + 'static> {
    ptr: NonNull<GcBox<T>>,
    _marker: PhantomData<*const T>,
}

impl<T: Trace + 'static> Gc<T> {
    /// # Safety
    ///
    /// `ptr` must point to a live, initialized `GcBox<T>` inside a heap
    /// block.
    pub(crate) const unsafe fn from_gc_box(ptr: NonNull<GcBox<T>>) -> Self {
        Self {
            ptr,
            _marker: PhantomData,
        }
    }

    /// The type-erased cell header, for root registration and marking.
    pub(crate) fn erased(this: &Self) -> NonNull<CellHeader> {
        this.ptr.cast()
    }

    /// Returns `true` if both pointers refer to the same cell.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        a.ptr == b.ptr
    }

    /// Raw pointer to the cell's value, for identity comparisons and logging.
    #[must_use]
    pub fn as_ptr(this: &Self) -> *const T {
        // SAFETY: `value` is in bounds of the same allocation as the header.
        unsafe { std::ptr::addr_of!((*this.ptr.as_ptr()).value) }
    }

    /// The concrete type name of the cell, for diagnostics.
    ///
    /// The cell must still be live.
    #[must_use]
    pub fn kind(this: &Self) -> &'static str {
        assert!(Self::is_live(this), "kind() on a swept cell");
        // SAFETY: Just checked the slot is live, so the header is valid.
        unsafe { this.ptr.cast::<CellHeader>().as_ref() }
            .vtable()
            .type_name
    }

    /// Debug accessor: is this cell's mark bit currently set?
    ///
    /// Outside a collection cycle this is always `false` for live cells
    /// (sweeping resets the bit). Only meaningful while the owning heap is
    /// alive.
    #[must_use]
    pub fn is_marked(this: &Self) -> bool {
        Self::flags(this) & FLAG_MARKED != 0
    }

    /// Debug accessor: does this slot still hold a constructed cell?
    ///
    /// Only meaningful while the owning heap is alive. A `false` result
    /// means the cell was swept and the `Gc` must not be dereferenced.
    #[must_use]
    pub fn is_live(this: &Self) -> bool {
        Self::flags(this) & FLAG_LIVE != 0
    }

    fn flags(this: &Self) -> u8 {
        // Raw read of the flag byte only: a swept slot overlays the header
        // with a free-list node, so no `CellHeader` reference may be formed
        // here. The byte itself stays inside the block allocation, which
        // lives as long as the heap.
        // SAFETY: The flag byte is the first byte of the slot in both the
        // live and the free layout.
        unsafe { *this.ptr.as_ptr().cast::<u8>() }
    }
}

impl<T: Trace + 'static> Copy for Gc<T> {}

impl<T: Trace + 'static> Clone for Gc<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Trace + 'static> std::ops::Deref for Gc<T> {
    type Target = T;

    fn deref(&self) -> &T {
        debug_assert!(Self::is_live(self), "deref of a swept cell");
        // SAFETY: Construction guarantees the pointer targets an initialized
        // GcBox<T>; liveness across collections is the mutator's rooting
        // obligation (see the type-level docs).
        unsafe { &self.ptr.as_ref().value }
    }
}

impl<T: Trace + std::fmt::Debug + 'static> std::fmt::Debug for Gc<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        (**self).fmt(f)
    }
}

impl<T: Trace + std::fmt::Display + 'static> std::fmt::Display for Gc<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        (**self).fmt(f)
    }
}
