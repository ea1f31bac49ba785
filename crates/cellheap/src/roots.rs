//! Root tracking.
//!
//! The root set is everything the collector treats as reachable by
//! definition: every live [`Handle`] plus whatever the embedding runtime
//! reports through its ambient-root callback. Registration and release are
//! O(1) slab operations and are mutator-only; the set is sealed for the
//! duration of a collection cycle.

use std::cell::RefCell;
use std::ptr::NonNull;
use std::rc::Rc;

use crate::cell::CellHeader;
use crate::ptr::Gc;
use crate::trace::Trace;

// ============================================================================
// RootSet - slab of erased root pointers
// ============================================================================

/// Slab of currently registered roots.
///
/// Entries are erased cell pointers; handles remember their slot index so
/// release is O(1) without a search. Freed slots are recycled via a free
/// index stack.
pub(crate) struct RootSet {
    entries: Vec<Option<NonNull<CellHeader>>>,
    free: Vec<usize>,
    sealed: bool,
}

impl RootSet {
    pub(crate) const fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            sealed: false,
        }
    }

    /// Register a root, returning its slot for later release.
    pub(crate) fn insert(&mut self, cell: NonNull<CellHeader>) -> usize {
        assert!(
            !self.sealed,
            "root registered during a collection cycle; the root set was already snapshot"
        );
        if let Some(slot) = self.free.pop() {
            debug_assert!(self.entries[slot].is_none());
            self.entries[slot] = Some(cell);
            slot
        } else {
            self.entries.push(Some(cell));
            self.entries.len() - 1
        }
    }

    /// Release the root in `slot`.
    pub(crate) fn remove(&mut self, slot: usize) {
        assert!(
            !self.sealed,
            "root released during a collection cycle; the root set was already snapshot"
        );
        debug_assert!(self.entries[slot].is_some(), "double release of a root slot");
        self.entries[slot] = None;
        self.free.push(slot);
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = NonNull<CellHeader>> + '_ {
        self.entries.iter().filter_map(|entry| *entry)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len() - self.free.len()
    }

    /// Forbid registration/release until [`Self::unseal`]; set at cycle
    /// start, cleared when the cycle returns to idle.
    pub(crate) fn seal(&mut self) {
        debug_assert!(!self.sealed);
        self.sealed = true;
    }

    pub(crate) fn unseal(&mut self) {
        self.sealed = false;
    }
}

// ============================================================================
// Handle - a rooted cell reference
// ============================================================================

/// A mutator-held anchor that keeps a cell (and everything reachable from
/// it) alive for the handle's lifetime.
///
/// Construct one through [`Heap::root`](crate::Heap::root). Dropping the
/// handle releases the root; cloning registers an independent one. Both
/// operations are O(1).
///
/// Handles cover both rooting lifetimes: bind one to a stack frame while
/// native code holds a cell across a possible collection point, or store one
/// in a long-lived structure and release it by dropping.
pub struct Handle<T: Trace + 'static> {
    cell: Gc<T>,
    roots: Rc<RefCell<RootSet>>,
    slot: usize,
}

impl<T: Trace + 'static> Handle<T> {
    pub(crate) fn new(roots: Rc<RefCell<RootSet>>, cell: Gc<T>) -> Self {
        let slot = roots.borrow_mut().insert(Gc::erased(&cell));
        Self { cell, roots, slot }
    }

    /// The rooted cell.
    #[must_use]
    pub fn get(&self) -> Gc<T> {
        self.cell
    }
}

impl<T: Trace + 'static> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self::new(self.roots.clone(), self.cell)
    }
}

impl<T: Trace + 'static> Drop for Handle<T> {
    fn drop(&mut self) {
        self.roots.borrow_mut().remove(self.slot);
    }
}

impl<T: Trace + 'static> std::ops::Deref for Handle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.cell
    }
}

impl<T: Trace + std::fmt::Debug + 'static> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        (**self).fmt(f)
    }
}

// ============================================================================
// RootVisitor - ambient root enumeration
// ============================================================================

/// Sink passed to the runtime's ambient-root callback once per cycle.
///
/// The runtime reports every cell reachable from native state (global
/// bindings, values live in executing call frames) that is not already
/// covered by a [`Handle`]. Reporting a cell twice is harmless; duplicates
/// collapse on the mark bit.
pub struct RootVisitor<'a> {
    roots: &'a mut Vec<NonNull<CellHeader>>,
}

impl<'a> RootVisitor<'a> {
    pub(crate) fn new(roots: &'a mut Vec<NonNull<CellHeader>>) -> Self {
        Self { roots }
    }

    /// Report one ambient root.
    pub fn visit_root<T: Trace + 'static>(&mut self, cell: &Gc<T>) {
        self.roots.push(Gc::erased(cell));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dangling_cell(tag: usize) -> NonNull<CellHeader> {
        // Only used as an opaque key; never dereferenced by RootSet.
        NonNull::new((tag * 16) as *mut CellHeader).unwrap()
    }

    #[test]
    fn slab_recycles_released_slots() {
        let mut roots = RootSet::new();
        let a = roots.insert(dangling_cell(1));
        let b = roots.insert(dangling_cell(2));
        assert_eq!(roots.len(), 2);

        roots.remove(a);
        assert_eq!(roots.len(), 1);

        let c = roots.insert(dangling_cell(3));
        assert_eq!(c, a, "released slot should be reused");
        assert_eq!(roots.len(), 2);

        roots.remove(b);
        roots.remove(c);
        assert_eq!(roots.len(), 0);
        assert_eq!(roots.iter().count(), 0);
    }

    #[test]
    fn iter_skips_released_entries() {
        let mut roots = RootSet::new();
        let _a = roots.insert(dangling_cell(1));
        let b = roots.insert(dangling_cell(2));
        let _c = roots.insert(dangling_cell(3));

        roots.remove(b);
        let live: Vec<_> = roots.iter().collect();
        assert_eq!(live.len(), 2);
        assert!(!live.contains(&dangling_cell(2)));
    }

    #[test]
    #[should_panic(expected = "root registered during a collection cycle")]
    fn sealed_set_rejects_registration() {
        let mut roots = RootSet::new();
        roots.seal();
        let _ = roots.insert(dangling_cell(1));
    }

    #[test]
    #[should_panic(expected = "root released during a collection cycle")]
    fn sealed_set_rejects_release() {
        let mut roots = RootSet::new();
        let slot = roots.insert(dangling_cell(1));
        roots.seal();
        roots.remove(slot);
    }
}
