//! Structured tracing for collection cycles.
//!
//! Compiled in only with the `tracing` feature. Every cycle opens a span
//! carrying a stable cycle id, each phase emits start/end events, and every
//! reclaimed block emits a trace-level event.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{span, Level};

/// The two phases of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CyclePhase {
    /// Root scan plus transitive marking.
    Mark,
    /// Registry walk reclaiming unmarked blocks.
    Sweep,
}

/// Monotonic identifier correlating all events of one cycle.
///
/// Process-wide, so cycles of distinct heaps stay distinguishable in one
/// trace stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CycleId(pub(crate) u64);

static NEXT_CYCLE_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_cycle_id() -> CycleId {
    CycleId(NEXT_CYCLE_ID.fetch_add(1, Ordering::Relaxed))
}

/// Span covering one whole collection cycle.
pub(crate) fn trace_cycle(cycle_id: CycleId, blocks_before: usize) -> span::EnteredSpan {
    span!(
        Level::DEBUG,
        "gc_cycle",
        cycle_id = cycle_id.0,
        blocks_before
    )
    .entered()
}

pub(crate) fn log_phase_start(phase: CyclePhase) {
    tracing::debug!(phase = ?phase, "phase_start");
}

pub(crate) fn log_phase_end(phase: CyclePhase, blocks_touched: usize) {
    tracing::debug!(phase = ?phase, blocks_touched, "phase_end");
}

/// One block reclaimed by the sweep.
pub(crate) fn log_reclaim(size: usize) {
    tracing::trace!(size, "reclaim");
}
