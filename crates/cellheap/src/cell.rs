//! Cell headers and the type-erased slot layout.
//!
//! Every occupied heap slot starts with a [`CellHeader`]: one flag byte
//! (live/marked) followed by a pointer to a per-type vtable. The vtable is
//! what lets the collector trace and destruct cells whose concrete type has
//! been erased.

use std::cell::Cell;
use std::ptr::NonNull;

use crate::gc::MarkingVisitor;
use crate::trace::Trace;

/// Set while the slot holds a constructed cell (as opposed to a free-list node).
pub(crate) const FLAG_LIVE: u8 = 1 << 0;

/// Set during the mark phase, meaning "found reachable this cycle".
pub(crate) const FLAG_MARKED: u8 = 1 << 1;

// ============================================================================
// CellHeader - per-slot metadata
// ============================================================================

/// Metadata at the start of every occupied slot.
///
/// A `CellHeader` reference may only be formed for a live slot: free slots
/// overlay this memory with a [`FreeCell`], whose `vtable` bytes are garbage.
/// Block iteration therefore reads the flag byte raw before handing out a
/// header pointer.
#[repr(C)]
pub(crate) struct CellHeader {
    flags: Cell<u8>,
    vtable: &'static CellVTable,
}

impl CellHeader {
    /// Header for a freshly constructed cell: live, unmarked.
    pub(crate) const fn new(vtable: &'static CellVTable) -> Self {
        Self {
            flags: Cell::new(FLAG_LIVE),
            vtable,
        }
    }

    pub(crate) fn is_live(&self) -> bool {
        self.flags.get() & FLAG_LIVE != 0
    }

    pub(crate) fn is_marked(&self) -> bool {
        self.flags.get() & FLAG_MARKED != 0
    }

    pub(crate) fn set_marked(&self) {
        self.flags.set(self.flags.get() | FLAG_MARKED);
    }

    pub(crate) fn clear_marked(&self) {
        self.flags.set(self.flags.get() & !FLAG_MARKED);
    }

    pub(crate) fn vtable(&self) -> &'static CellVTable {
        debug_assert!(self.is_live());
        self.vtable
    }
}

/// A free slot, overlaying the header area with the intrusive free list.
///
/// The flag byte sits at offset 0 in both layouts, so a raw read of the
/// first byte distinguishes the two without forming a reference.
#[repr(C)]
pub(crate) struct FreeCell {
    pub(crate) flags: u8,
    _pad: [u8; 3],
    /// Index of the next free slot in the owning block, if any.
    pub(crate) next: Option<u32>,
}

impl FreeCell {
    pub(crate) const fn new(next: Option<u32>) -> Self {
        Self {
            flags: 0,
            _pad: [0; 3],
            next,
        }
    }
}

// ============================================================================
// GcBox - the concrete slot layout for a cell of type T
// ============================================================================

/// Header-first slot layout for a cell holding a `T`.
#[repr(C)]
pub(crate) struct GcBox<T> {
    pub(crate) header: CellHeader,
    pub(crate) value: T,
}

// ============================================================================
// CellVTable - type-erased trace and drop hooks
// ============================================================================

/// Per-type hooks stored in every live cell's header.
///
/// `trace` and `drop` are monomorphized function pointers taking the
/// concrete [`MarkingVisitor`], so a single pointer-sized field covers all
/// cell kinds.
pub(crate) struct CellVTable {
    /// Report the cell's outgoing edges to the mark phase.
    pub(crate) trace: unsafe fn(NonNull<CellHeader>, &mut MarkingVisitor<'_>),
    /// Run the cell's destructor in place. Called exactly once, from the
    /// sweep phase or heap teardown.
    pub(crate) drop: unsafe fn(NonNull<CellHeader>),
    /// Concrete type name, for diagnostics.
    pub(crate) type_name: &'static str,
    /// `size_of::<GcBox<T>>()`, for byte accounting.
    pub(crate) cell_size: usize,
}

/// The vtable for cells of type `T`.
pub(crate) fn vtable_of<T: Trace + 'static>() -> &'static CellVTable {
    use std::any::TypeId;
    use std::collections::HashMap;
    use std::sync::{Mutex, OnceLock};

    // `std::any::type_name` is not const-callable on stable, so vtables are
    // built once per type at runtime and leaked (equivalent to a `static`).
    static REGISTRY: OnceLock<Mutex<HashMap<TypeId, &'static CellVTable>>> = OnceLock::new();

    let registry = REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = registry.lock().unwrap();
    map.entry(TypeId::of::<T>()).or_insert_with(|| {
        Box::leak(Box::new(CellVTable {
            trace: trace_cell::<T>,
            drop: drop_cell::<T>,
            type_name: std::any::type_name::<T>(),
            cell_size: std::mem::size_of::<GcBox<T>>(),
        }))
    })
}

/// # Safety
///
/// `cell` must point to a live `GcBox<T>`.
unsafe fn trace_cell<T: Trace + 'static>(
    cell: NonNull<CellHeader>,
    visitor: &mut MarkingVisitor<'_>,
) {
    let gc_box = cell.cast::<GcBox<T>>();
    // SAFETY: Caller guarantees the slot holds a live GcBox<T>.
    unsafe { (*gc_box.as_ptr()).value.trace(visitor) };
}

/// # Safety
///
/// `cell` must point to a live `GcBox<T>` whose destructor has not yet run.
unsafe fn drop_cell<T: Trace + 'static>(cell: NonNull<CellHeader>) {
    let gc_box = cell.cast::<GcBox<T>>();
    // SAFETY: Caller guarantees the slot holds a live GcBox<T>.
    unsafe { std::ptr::drop_in_place(std::ptr::addr_of_mut!((*gc_box.as_ptr()).value)) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_flag_transitions() {
        let header = CellHeader::new(vtable_of::<u64>());
        assert!(header.is_live());
        assert!(!header.is_marked());

        header.set_marked();
        assert!(header.is_marked());
        assert!(header.is_live());

        header.clear_marked();
        assert!(!header.is_marked());
    }

    #[test]
    fn flag_byte_is_first_in_both_layouts() {
        assert_eq!(std::mem::offset_of!(CellHeader, flags), 0);
        assert_eq!(std::mem::offset_of!(FreeCell, flags), 0);
    }

    #[test]
    fn vtable_records_type_identity() {
        let vtable = vtable_of::<String>();
        assert!(vtable.type_name.contains("String"));
        assert_eq!(vtable.cell_size, std::mem::size_of::<GcBox<String>>());
    }
}
