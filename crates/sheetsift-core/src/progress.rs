use crate::model::{ArchiveSummary, BatchPhase, BatchProgress, Conflict, MeritDebtScore};

/// Observer for batch progress and conflict lifecycle events.
///
/// CLI implements with tracing/indicatif; hosts implement with whatever UI
/// they render. All methods have default no-op implementations.
///
/// Callbacks are invoked synchronously in the emitting thread. Observers
/// must not perform long blocking work; a slow observer stalls the
/// orchestrator's aggregation loop.
pub trait ProgressReporter: Send + Sync {
    fn on_phase_change(&self, _phase: BatchPhase) {}
    fn on_archive_start(&self, _path: &str, _index: usize, _total: usize) {}
    fn on_archive_complete(&self, _summary: &ArchiveSummary) {}
    fn on_snapshot(&self, _progress: &BatchProgress) {}
    fn on_conflict_emitted(&self, _conflict: &Conflict) {}
    fn on_conflict_resolved(&self, _conflict: &Conflict) {}
    fn on_merit_change(&self, _score: &MeritDebtScore) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
