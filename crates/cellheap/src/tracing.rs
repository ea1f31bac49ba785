//! Structured logging for collection cycles.
//!
//! When the `tracing` feature is enabled, this module provides spans and
//! events covering each cycle and its phases.

#[cfg(feature = "tracing")]
pub mod internal {
    use std::sync::atomic::{AtomicU64, Ordering};
    use tracing::{span, Level};

    use crate::metrics::GcMetrics;

    /// The three phases of a cycle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum GcPhase {
        /// Snapshot handles and ambient roots.
        Roots,
        /// Trace the live object graph.
        Mark,
        /// Destruct and reclaim unmarked cells.
        Sweep,
    }

    /// Stable identifier correlating all events within one cycle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcId(u64);

    static NEXT_GC_ID: AtomicU64 = AtomicU64::new(1);

    /// Generate the next cycle id.
    pub fn next_gc_id() -> GcId {
        GcId(NEXT_GC_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Span covering a whole collection cycle.
    pub fn trace_gc_cycle(gc_id: GcId) -> span::EnteredSpan {
        span!(Level::DEBUG, "gc_cycle", gc_id = gc_id.0).entered()
    }

    /// Span covering one phase of a cycle.
    pub fn trace_phase(phase: GcPhase) -> span::EnteredSpan {
        span!(Level::DEBUG, "gc_phase", phase = ?phase).entered()
    }

    /// Log the outcome of a finished cycle.
    #[allow(clippy::cast_possible_truncation)]
    pub fn log_cycle_end(gc_id: GcId, metrics: &GcMetrics) {
        tracing::debug!(
            gc_id = gc_id.0,
            roots = metrics.roots,
            cells_marked = metrics.cells_marked,
            cells_reclaimed = metrics.cells_reclaimed,
            cells_surviving = metrics.cells_surviving,
            bytes_reclaimed = metrics.bytes_reclaimed,
            duration_us = metrics.duration.as_micros() as u64,
            "cycle_end"
        );
    }
}

#[cfg(not(feature = "tracing"))]
pub mod internal {
    /// Stub type when tracing is disabled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcId(u64);

    /// Stub function when tracing is disabled.
    pub fn next_gc_id() -> GcId {
        GcId(0)
    }
}

pub use internal::GcId;
