//! Cycle statistics and heap diagnostics.

use std::time::{Duration, Instant};

/// Statistics from the most recent garbage collection cycle.
#[derive(Debug, Clone, Copy)]
pub struct GcMetrics {
    /// Duration of the whole cycle.
    pub duration: Duration,
    /// Duration of the root-collection phase.
    pub roots_duration: Duration,
    /// Duration of the mark phase.
    pub mark_duration: Duration,
    /// Duration of the sweep phase.
    pub sweep_duration: Duration,
    /// Number of roots the cycle started from (handles + ambient).
    pub roots: usize,
    /// Number of cells marked reachable.
    pub cells_marked: usize,
    /// Number of cells destructed and reclaimed.
    pub cells_reclaimed: usize,
    /// Number of cells surviving the cycle.
    pub cells_surviving: usize,
    /// Bytes reclaimed (slot sizes of destructed cells).
    pub bytes_reclaimed: usize,
    /// Bytes surviving.
    pub bytes_surviving: usize,
    /// Total cycles run by this heap since construction.
    pub total_collections: usize,
}

impl GcMetrics {
    /// All-zero metrics, the state before any cycle has run.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            duration: Duration::ZERO,
            roots_duration: Duration::ZERO,
            mark_duration: Duration::ZERO,
            sweep_duration: Duration::ZERO,
            roots: 0,
            cells_marked: 0,
            cells_reclaimed: 0,
            cells_surviving: 0,
            bytes_reclaimed: 0,
            bytes_surviving: 0,
            total_collections: 0,
        }
    }
}

impl Default for GcMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot of heap occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Number of allocated blocks across all size classes.
    pub blocks: usize,
    /// Total cell slots across all blocks.
    pub cells: usize,
    /// Slots currently holding a live cell.
    pub live_cells: usize,
    /// Slots currently on a free list.
    pub free_cells: usize,
    /// Total bytes of block memory owned by the heap.
    pub heap_bytes: usize,
}

/// Accumulates per-phase durations while a cycle runs.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PhaseTimer {
    pub(crate) roots: Duration,
    pub(crate) mark: Duration,
    pub(crate) sweep: Duration,
    current_start: Option<Instant>,
}

impl PhaseTimer {
    pub(crate) const fn new() -> Self {
        Self {
            roots: Duration::ZERO,
            mark: Duration::ZERO,
            sweep: Duration::ZERO,
            current_start: None,
        }
    }

    pub(crate) fn start(&mut self) {
        self.current_start = Some(Instant::now());
    }

    pub(crate) fn end_roots(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.roots = start.elapsed();
        }
    }

    pub(crate) fn end_mark(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.mark = start.elapsed();
        }
    }

    pub(crate) fn end_sweep(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.sweep = start.elapsed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_timer_records_each_phase_once() {
        let mut timer = PhaseTimer::new();

        timer.start();
        timer.end_roots();
        timer.start();
        timer.end_mark();
        timer.start();
        timer.end_sweep();

        // end_* without a matching start leaves the phase untouched.
        let mark_before = timer.mark;
        timer.end_mark();
        assert_eq!(timer.mark, mark_before);
    }

    #[test]
    fn metrics_default_is_zeroed() {
        let metrics = GcMetrics::default();
        assert_eq!(metrics.total_collections, 0);
        assert_eq!(metrics.cells_reclaimed, 0);
        assert_eq!(metrics.duration, Duration::ZERO);
    }
}
