//! Fixed-size heap blocks.
//!
//! A block is one 16 KiB allocation, aligned to its own size so any interior
//! pointer maps back to the block header by masking. Each block holds slots
//! of a single cell size; free slots are threaded into an intrusive singly
//! linked list stored in the slot memory itself, so there is no bookkeeping
//! beyond one index per free slot.

use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;

use crate::cell::{CellHeader, FreeCell, FLAG_LIVE};

/// Total byte size of one block, header included.
pub(crate) const BLOCK_SIZE: usize = 16 * 1024;

/// Mask for extracting the block base address from a cell pointer.
pub(crate) const BLOCK_MASK: usize = !(BLOCK_SIZE - 1);

/// Magic number validating that a masked address really is a block header.
pub(crate) const MAGIC_HEAP_BLOCK: u32 = 0x4345_4C42; // "CELB"

/// Smallest supported cell size. Slots must at least fit a free-list node.
pub(crate) const MIN_CELL_SIZE: usize = 16;

// ============================================================================
// HeapBlock - header at the base of every block
// ============================================================================

/// Metadata at the base of a block. The slots follow, starting at
/// [`HeapBlock::header_size`] so they stay aligned to the cell size.
#[repr(C)]
pub(crate) struct HeapBlock {
    magic: u32,
    cell_size: u32,
    cell_count: u32,
    free_head: Option<u32>,
}

impl HeapBlock {
    /// The allocation layout of every block: size and alignment both
    /// `BLOCK_SIZE`, so masking a cell address yields the block base.
    pub(crate) fn layout() -> Layout {
        Layout::from_size_align(BLOCK_SIZE, BLOCK_SIZE).expect("invalid block layout")
    }

    /// Header size rounded up to a multiple of `cell_size`, keeping every
    /// slot `cell_size`-aligned within the block.
    pub(crate) const fn header_size(cell_size: usize) -> usize {
        (std::mem::size_of::<Self>() + cell_size - 1) & !(cell_size - 1)
    }

    /// How many cells of `cell_size` fit in one block.
    pub(crate) const fn capacity_for(cell_size: usize) -> usize {
        let header = Self::header_size(cell_size);
        if header >= BLOCK_SIZE {
            0
        } else {
            (BLOCK_SIZE - header) / cell_size
        }
    }

    /// Allocate and initialize a block for `cell_size` cells, threading all
    /// slots onto the free list. Returns `None` if the backing allocation
    /// fails; the heap decides whether that is fatal.
    ///
    /// # Panics
    ///
    /// Panics if `cell_size` is not a power of two of at least
    /// [`MIN_CELL_SIZE`], or leaves no room for a single cell. Both are
    /// precondition violations in the caller, not runtime conditions.
    pub(crate) fn try_new(cell_size: usize) -> Option<NonNull<Self>> {
        assert!(
            cell_size.is_power_of_two() && cell_size >= MIN_CELL_SIZE,
            "invalid cell size {cell_size}"
        );
        let cell_count = Self::capacity_for(cell_size);
        assert!(
            cell_count > 0,
            "cell size {cell_size} does not fit in a heap block"
        );

        // SAFETY: The layout is valid and non-zero sized.
        let ptr = unsafe { alloc(Self::layout()) };
        let base = NonNull::new(ptr)?;

        // SAFETY: The allocation is BLOCK_SIZE-aligned, which exceeds the
        // header's alignment requirement.
        #[allow(clippy::cast_ptr_alignment)]
        let header = base.cast::<Self>();
        #[allow(clippy::cast_possible_truncation)]
        // SAFETY: We just allocated this memory.
        unsafe {
            header.as_ptr().write(Self {
                magic: MAGIC_HEAP_BLOCK,
                cell_size: cell_size as u32,
                cell_count: cell_count as u32,
                free_head: Some(0),
            });
        }

        // Thread every slot onto the free list in address order.
        let header_size = Self::header_size(cell_size);
        for i in 0..cell_count {
            #[allow(clippy::cast_possible_truncation)]
            let next = if i + 1 < cell_count {
                Some((i + 1) as u32)
            } else {
                None
            };
            // SAFETY: Slot i is in bounds of the fresh allocation and
            // cell_size-aligned, which satisfies FreeCell's alignment.
            #[allow(clippy::cast_ptr_alignment)]
            unsafe {
                base.as_ptr()
                    .add(header_size + i * cell_size)
                    .cast::<FreeCell>()
                    .write(FreeCell::new(next));
            }
        }

        Some(header)
    }

    /// Free the block's backing memory.
    ///
    /// # Safety
    ///
    /// `block` must have come from [`HeapBlock::try_new`] and no cell inside
    /// it may be referenced afterwards. Live cells are not destructed here;
    /// the heap sweeps them first.
    pub(crate) unsafe fn destroy(block: NonNull<Self>) {
        // SAFETY: Per the contract, this pointer is the base of a block
        // allocation made with the same layout.
        unsafe { dealloc(block.as_ptr().cast::<u8>(), Self::layout()) };
    }

    /// The block containing `cell`, recovered by masking its address.
    pub(crate) fn from_cell(cell: NonNull<CellHeader>) -> NonNull<Self> {
        let base = cell.as_ptr() as usize & BLOCK_MASK;
        // SAFETY: Masking a non-null interior pointer cannot produce zero,
        // since the block base is itself a non-null address.
        unsafe { NonNull::new_unchecked(base as *mut Self) }
    }

    pub(crate) const fn cell_size(&self) -> usize {
        self.cell_size as usize
    }

    pub(crate) const fn cell_count(&self) -> u32 {
        self.cell_count
    }

    pub(crate) const fn magic(&self) -> u32 {
        self.magic
    }

    fn slot_ptr(&self, index: u32) -> *mut u8 {
        debug_assert!(index < self.cell_count);
        let base = std::ptr::from_ref(self) as usize & BLOCK_MASK;
        let offset = Self::header_size(self.cell_size()) + index as usize * self.cell_size();
        (base + offset) as *mut u8
    }

    /// Type-erased pointer to slot `index`. Check [`Self::slot_flags`]
    /// before treating it as a live cell header.
    pub(crate) fn cell_at(&self, index: u32) -> NonNull<CellHeader> {
        // SAFETY: slot_ptr is a non-null interior pointer of the block.
        unsafe { NonNull::new_unchecked(self.slot_ptr(index).cast::<CellHeader>()) }
    }

    /// Raw read of a slot's flag byte. Valid for both live cells and free
    /// slots, since the flag byte leads both layouts.
    pub(crate) fn slot_flags(&self, index: u32) -> u8 {
        // SAFETY: The slot is in bounds and its first byte is initialized in
        // both the live and the free layout.
        unsafe { *self.slot_ptr(index) }
    }

    /// Pop the head of the free list in O(1). Returns `None` when the block
    /// is exhausted. The returned slot memory is uninitialized from the
    /// caller's perspective.
    pub(crate) fn allocate(&mut self) -> Option<NonNull<u8>> {
        let index = self.free_head?;
        let slot = self.slot_ptr(index);
        // SAFETY: Free-list membership means the slot holds a FreeCell.
        #[allow(clippy::cast_ptr_alignment)]
        let free = unsafe { slot.cast::<FreeCell>().read() };
        debug_assert_eq!(free.flags & FLAG_LIVE, 0);
        self.free_head = free.next;
        // SAFETY: slot_ptr never returns null.
        Some(unsafe { NonNull::new_unchecked(slot) })
    }

    /// Push a slot back onto the free list in O(1). Called only from the
    /// sweep phase (or heap teardown) after the cell's destructor ran.
    ///
    /// # Safety
    ///
    /// `cell` must address a slot of this block whose destructor has already
    /// run, and must not be reachable from any live cell.
    pub(crate) unsafe fn deallocate(&mut self, cell: NonNull<CellHeader>) {
        let base = std::ptr::from_ref(self) as usize & BLOCK_MASK;
        let offset = cell.as_ptr() as usize - base - Self::header_size(self.cell_size());
        debug_assert_eq!(offset % self.cell_size(), 0, "unaligned cell pointer");
        #[allow(clippy::cast_possible_truncation)]
        let index = (offset / self.cell_size()) as u32;
        debug_assert!(index < self.cell_count);

        // Overlay the slot with a free-list node; this also clears the live
        // flag, upholding the occupied-xor-free invariant.
        // SAFETY: The slot is in bounds and sufficiently aligned, and per
        // the contract nothing references its previous contents.
        #[allow(clippy::cast_ptr_alignment)]
        unsafe {
            cell.as_ptr()
                .cast::<FreeCell>()
                .write(FreeCell::new(self.free_head));
        }
        self.free_head = Some(index);
    }

    /// Invoke `f` for every slot currently holding a live cell.
    pub(crate) fn for_each_live_cell(&self, mut f: impl FnMut(NonNull<CellHeader>)) {
        for i in 0..self.cell_count {
            if self.slot_flags(i) & FLAG_LIVE != 0 {
                f(self.cell_at(i));
            }
        }
    }
}
