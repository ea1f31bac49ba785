//! A stop-the-world, non-moving mark-and-sweep garbage collector for
//! scripting-runtime object heaps.
//!
//! Cells live in 16 KiB blocks segregated by size class and never move, so
//! raw addresses stay valid for a cell's whole lifetime. A collection cycle
//! is fully synchronous: snapshot the roots, trace the object graph, then
//! destruct and reclaim everything unreached.
//!
//! # Quick start
//!
//! ```
//! use std::cell::RefCell;
//! use cellheap::{Gc, Heap, Trace};
//!
//! #[derive(Trace)]
//! struct Node {
//!     value: u32,
//!     next: RefCell<Option<Gc<Node>>>,
//! }
//!
//! let heap = Heap::new();
//!
//! let tail = heap.allocate(Node { value: 2, next: RefCell::new(None) });
//! let head = heap.root(heap.allocate(Node {
//!     value: 1,
//!     next: RefCell::new(Some(tail)),
//! }));
//!
//! heap.collect_garbage();
//!
//! // Both nodes survive: `head` is rooted and `tail` is reachable from it.
//! assert_eq!(head.value, 1);
//! assert_eq!(head.next.borrow().as_ref().unwrap().value, 2);
//!
//! // Dropping the handle unroots the list; the next cycle reclaims it.
//! drop(head);
//! heap.collect_garbage();
//! assert_eq!(heap.stats().live_cells, 0);
//! ```
//!
//! # Rooting
//!
//! `Gc<T>` does not keep its target alive. A cell survives a cycle only if
//! it is reachable from a [`Handle`] (see [`Heap::root`]) or from the
//! runtime's ambient-root callback
//! ([`Heap::set_ambient_root_callback`]). Holding a bare `Gc<T>` across a
//! collection point without such a path leaves it dangling; enable
//! [`Heap::set_collect_on_every_allocation`] in tests to surface rooting
//! bugs deterministically.
//!
//! # Features
//!
//! - `derive` (default): the `#[derive(Trace)]` macro.
//! - `tracing`: per-cycle spans and a summary event via the `tracing` crate.

#![warn(missing_docs)]
#![warn(clippy::missing_safety_doc)]
#![warn(clippy::undocumented_unsafe_blocks)]

mod block;
mod cell;
mod gc;
mod heap;
mod metrics;
mod ptr;
mod roots;
mod trace;
mod tracing;

pub use gc::CollectorState;
pub use heap::{DeferGc, Heap, ALLOCATIONS_PER_COLLECTION};
pub use metrics::{GcMetrics, HeapStats};
pub use ptr::Gc;
pub use roots::{Handle, RootVisitor};
pub use trace::{Trace, Visitor};
pub use self::tracing::GcId;

#[cfg(feature = "derive")]
pub use cellheap_derive::Trace;
