//! Trace trait and Visitor pattern for garbage collection.
//!
//! Every cell kind stored in the heap implements `Trace` to report its
//! outgoing edges. The mark phase drives the traversal through a `Visitor`.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, LinkedList, VecDeque};
use std::hash::BuildHasher;
use std::rc::Rc;

use crate::ptr::Gc;

// ============================================================================
// Core Traits
// ============================================================================

/// A type that can be stored in the heap and traced by the collector.
///
/// # Safety
///
/// Implementations **MUST** report every [`Gc`] edge by calling
/// `visitor.visit()` (directly or by delegating to a field's `trace`).
/// An omitted edge makes the referenced cell invisible to the mark phase,
/// so it is swept while still reachable from the mutator's perspective:
/// a use-after-free. This contract is the crux of collector correctness.
///
/// Prefer `#[derive(Trace)]` over manual implementation.
///
/// For types without `Gc` edges:
///
/// ```ignore
/// unsafe impl Trace for Plain {
///     fn trace(&self, _visitor: &mut impl Visitor) {}
/// }
/// ```
///
/// For types with edges:
///
/// ```ignore
/// unsafe impl Trace for Pair {
///     fn trace(&self, visitor: &mut impl Visitor) {
///         self.first.trace(visitor);
///         self.second.trace(visitor);
///     }
/// }
/// ```
pub unsafe trait Trace {
    /// Visit every `Gc` edge contained in this value, including edges inside
    /// nested structs, enums, and collections.
    fn trace(&self, visitor: &mut impl Visitor);
}

/// A traversal sink passed into [`Trace::trace`].
///
/// Users generally do not implement this trait; the collector supplies the
/// marking visitor during a cycle.
pub trait Visitor {
    /// Visit one outgoing edge.
    fn visit<T: Trace + 'static>(&mut self, cell: &Gc<T>);
}

// SAFETY: A Gc field is itself the edge; visiting it reports it.
unsafe impl<T: Trace + 'static> Trace for Gc<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        visitor.visit(self);
    }
}

// ============================================================================
// Trace implementations for edge-free primitives
// ============================================================================

macro_rules! impl_empty_trace {
    ($($ty:ty),* $(,)?) => {
        $(
            // SAFETY: The type cannot contain a Gc edge.
            unsafe impl Trace for $ty {
                #[inline]
                fn trace(&self, _visitor: &mut impl Visitor) {}
            }
        )*
    };
}

impl_empty_trace! {
    (),
    bool,
    char,
    u8, u16, u32, u64, u128, usize,
    i8, i16, i32, i64, i128, isize,
    f32, f64,
    String,
    &'static str,
    std::time::Duration,
    std::time::Instant,
    std::num::NonZeroU32,
    std::num::NonZeroU64,
    std::num::NonZeroUsize,
}

// SAFETY: PhantomData contains no actual data.
unsafe impl<T: ?Sized> Trace for std::marker::PhantomData<T> {
    #[inline]
    fn trace(&self, _visitor: &mut impl Visitor) {}
}

// ============================================================================
// Trace implementations for std container types
// ============================================================================

// SAFETY: Box traces its contents.
unsafe impl<T: Trace + ?Sized> Trace for Box<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        T::trace(self.as_ref(), visitor);
    }
}

// SAFETY: Rc traces its contents. Note that an Rc edge does not keep the
// target's own Gc edges alive by itself; the shared value is traced through
// every owner, which is harmless (marking is idempotent).
unsafe impl<T: Trace + ?Sized> Trace for Rc<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        T::trace(self.as_ref(), visitor);
    }
}

// SAFETY: Vec traces all elements.
unsafe impl<T: Trace> Trace for Vec<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        for item in self {
            item.trace(visitor);
        }
    }
}

// SAFETY: VecDeque traces all elements.
unsafe impl<T: Trace> Trace for VecDeque<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        for item in self {
            item.trace(visitor);
        }
    }
}

// SAFETY: LinkedList traces all elements.
unsafe impl<T: Trace> Trace for LinkedList<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        for item in self {
            item.trace(visitor);
        }
    }
}

// SAFETY: Arrays trace all elements.
unsafe impl<T: Trace, const N: usize> Trace for [T; N] {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        for item in self {
            item.trace(visitor);
        }
    }
}

// SAFETY: Slices trace all elements.
unsafe impl<T: Trace> Trace for [T] {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        for item in self {
            item.trace(visitor);
        }
    }
}

// SAFETY: Option traces its contents if Some.
unsafe impl<T: Trace> Trace for Option<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        if let Some(inner) = self {
            inner.trace(visitor);
        }
    }
}

// SAFETY: Result traces both Ok and Err variants.
unsafe impl<T: Trace, E: Trace> Trace for Result<T, E> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        match self {
            Ok(v) => v.trace(visitor),
            Err(e) => e.trace(visitor),
        }
    }
}

// SAFETY: Cell<T> traces its contents (requires Copy to get the value).
unsafe impl<T: Trace + Copy> Trace for Cell<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        self.get().trace(visitor);
    }
}

// SAFETY: RefCell traces its contents. The cycle runs stop-the-world, so the
// mutator is never mid-mutation; a mutable borrow held across a collection
// point is a mutator bug and fails fast here.
unsafe impl<T: Trace + ?Sized> Trace for RefCell<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        self.borrow().trace(visitor);
    }
}

// SAFETY: HashMap traces all keys and values.
unsafe impl<K: Trace, V: Trace, S: BuildHasher> Trace for HashMap<K, V, S> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        for (k, v) in self {
            k.trace(visitor);
            v.trace(visitor);
        }
    }
}

// SAFETY: HashSet traces all elements.
unsafe impl<T: Trace, S: BuildHasher> Trace for HashSet<T, S> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        for item in self {
            item.trace(visitor);
        }
    }
}

// SAFETY: BTreeMap traces all key-value pairs.
unsafe impl<K: Trace, V: Trace> Trace for BTreeMap<K, V> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        for (k, v) in self {
            k.trace(visitor);
            v.trace(visitor);
        }
    }
}

// SAFETY: BTreeSet traces all elements.
unsafe impl<T: Trace> Trace for BTreeSet<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        for item in self {
            item.trace(visitor);
        }
    }
}

// ============================================================================
// Trace implementations for tuples
// ============================================================================

macro_rules! impl_trace_for_tuples {
    () => {};
    ($first:ident $(, $rest:ident)*) => {
        // SAFETY: Tuples trace all their elements.
        unsafe impl<$first: Trace $(, $rest: Trace)*> Trace for ($first, $($rest,)*) {
            #[inline]
            #[allow(non_snake_case)]
            fn trace(&self, visitor: &mut impl Visitor) {
                let ($first, $($rest,)*) = self;
                $first.trace(visitor);
                $($rest.trace(visitor);)*
            }
        }
        impl_trace_for_tuples!($($rest),*);
    };
}

impl_trace_for_tuples!(A, B, C, D, E, F, G, H);
