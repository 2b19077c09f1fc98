use crate::error::Error;
use crate::model::{
    BatchPhase, BatchProgress, Conflict, ConflictStatus, MeritDebtScore,
};
use crate::progress::ProgressReporter;
use ahash::AHashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Per-batch lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    NotStarted,
    Detecting,
    Resolving,
    Complete,
}

/// Tracks conflicts through pending→resolved, keeps running merit/debt
/// sums (O(1) per resolution), and notifies observers synchronously.
///
/// Writes are serialized by the owner (the orchestrator holds this behind a
/// mutex); the manager itself is single-threaded state.
pub struct ConflictLifecycleManager {
    reporter: Arc<dyn ProgressReporter>,
    state: BatchState,
    batch_id: String,
    total_files: usize,
    files_processed: usize,
    total_archives: usize,
    archives_processed: usize,
    phase: BatchPhase,
    cache_hit_rate: f64,
    conflicts: AHashMap<u64, Conflict>,
    resolved_confidence_sum: f64,
    resolved_count: usize,
    pending_count: usize,
    started_at: Option<Instant>,
}

impl ConflictLifecycleManager {
    pub fn new(reporter: Arc<dyn ProgressReporter>) -> Self {
        Self {
            reporter,
            state: BatchState::NotStarted,
            batch_id: String::new(),
            total_files: 0,
            files_processed: 0,
            total_archives: 0,
            archives_processed: 0,
            phase: BatchPhase::Assessment,
            cache_hit_rate: 0.0,
            conflicts: AHashMap::new(),
            resolved_confidence_sum: 0.0,
            resolved_count: 0,
            pending_count: 0,
            started_at: None,
        }
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn start_batch(
        &mut self,
        batch_id: impl Into<String>,
        total_files: usize,
        total_archives: usize,
    ) -> Result<(), Error> {
        if self.state != BatchState::NotStarted {
            return Err(Error::InvalidStateTransition(
                "batch already started".to_string(),
            ));
        }
        self.batch_id = batch_id.into();
        self.total_files = total_files;
        self.total_archives = total_archives;
        self.started_at = Some(Instant::now());
        self.state = BatchState::Detecting;
        info!(
            "batch {} started: {} files across {} archives",
            self.batch_id, total_files, total_archives
        );
        Ok(())
    }

    pub fn emit_conflict(&mut self, conflict: Conflict) -> Result<(), Error> {
        match self.state {
            BatchState::Detecting | BatchState::Resolving => {}
            BatchState::NotStarted => {
                return Err(Error::InvalidStateTransition(
                    "emit_conflict before start_batch".to_string(),
                ))
            }
            BatchState::Complete => {
                return Err(Error::InvalidStateTransition(
                    "emit_conflict after complete_batch".to_string(),
                ))
            }
        }

        if conflict.status == ConflictStatus::Pending {
            self.pending_count += 1;
        } else {
            // Pre-resolved conflicts still count toward merit.
            self.resolved_confidence_sum += conflict.confidence;
            self.resolved_count += 1;
        }
        self.reporter.on_conflict_emitted(&conflict);
        self.conflicts.insert(conflict.id, conflict);
        Ok(())
    }

    /// Transition a pending conflict to a terminal status.
    ///
    /// Unknown ids and double resolution are hard errors, never silent
    /// no-ops; they indicate caller bugs.
    pub fn resolve_conflict(
        &mut self,
        id: u64,
        status: ConflictStatus,
        resolved_by: &str,
    ) -> Result<(), Error> {
        match self.state {
            BatchState::Detecting => self.state = BatchState::Resolving,
            BatchState::Resolving => {}
            BatchState::NotStarted => {
                return Err(Error::InvalidStateTransition(
                    "resolve_conflict before start_batch".to_string(),
                ))
            }
            BatchState::Complete => {
                return Err(Error::InvalidStateTransition(
                    "resolve_conflict after complete_batch".to_string(),
                ))
            }
        }

        if !status.is_terminal() {
            return Err(Error::InvalidStateTransition(format!(
                "cannot resolve conflict {} back to {:?}",
                id, status
            )));
        }

        let conflict = self
            .conflicts
            .get_mut(&id)
            .ok_or(Error::UnknownConflictId(id))?;
        if conflict.status.is_terminal() {
            return Err(Error::ConflictAlreadyResolved(id));
        }

        conflict.status = status;
        conflict.resolved_by = Some(resolved_by.to_string());
        self.pending_count -= 1;
        self.resolved_confidence_sum += conflict.confidence;
        self.resolved_count += 1;

        let resolved = conflict.clone();
        debug!(
            "conflict {} resolved as {:?} by {}",
            id, status, resolved_by
        );
        self.reporter.on_conflict_resolved(&resolved);
        self.reporter.on_merit_change(&self.merit_debt());
        Ok(())
    }

    pub fn update_progress(&mut self, files_processed: usize) {
        // files_processed never exceeds total_files.
        self.files_processed = files_processed.min(self.total_files);
    }

    pub fn archive_finished(&mut self) {
        self.archives_processed = (self.archives_processed + 1).min(self.total_archives);
    }

    pub fn set_phase(&mut self, phase: BatchPhase) {
        self.phase = phase;
    }

    pub fn set_cache_hit_rate(&mut self, rate: f64) {
        self.cache_hit_rate = rate;
    }

    pub fn merit_debt(&self) -> MeritDebtScore {
        MeritDebtScore::compute(
            self.resolved_confidence_sum,
            self.resolved_count,
            self.pending_count,
        )
    }

    pub fn conflicts_detected(&self) -> usize {
        self.conflicts.len()
    }

    pub fn conflicts_resolved(&self) -> usize {
        self.resolved_count
    }

    pub fn pending_conflicts(&self) -> Vec<&Conflict> {
        self.conflicts
            .values()
            .filter(|c| c.status == ConflictStatus::Pending)
            .collect()
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &Conflict> {
        self.conflicts.values()
    }

    /// Linear files-per-second projection; None until any file completes.
    fn eta(&self) -> Option<Duration> {
        let started = self.started_at?;
        if self.files_processed == 0 || self.total_files == 0 {
            return None;
        }
        let elapsed = started.elapsed();
        let per_file = elapsed.as_secs_f64() / self.files_processed as f64;
        let remaining = self.total_files.saturating_sub(self.files_processed);
        Some(Duration::from_secs_f64(per_file * remaining as f64))
    }

    pub fn progress(&self) -> BatchProgress {
        let score = self.merit_debt();
        BatchProgress {
            batch_id: self.batch_id.clone(),
            phase: self.phase,
            files_processed: self.files_processed,
            total_files: self.total_files,
            archives_processed: self.archives_processed,
            total_archives: self.total_archives,
            conflicts_detected: self.conflicts.len(),
            conflicts_resolved: self.resolved_count,
            cache_hit_rate: self.cache_hit_rate,
            merit: score.merit,
            debt: score.debt,
            eta: self.eta(),
        }
    }

    /// Close the batch. A second call is an error.
    pub fn complete_batch(&mut self) -> Result<MeritDebtScore, Error> {
        match self.state {
            BatchState::NotStarted => Err(Error::InvalidStateTransition(
                "complete_batch before start_batch".to_string(),
            )),
            BatchState::Complete => Err(Error::InvalidStateTransition(
                "complete_batch called twice".to_string(),
            )),
            BatchState::Detecting | BatchState::Resolving => {
                self.state = BatchState::Complete;
                self.phase = BatchPhase::Complete;
                let score = self.merit_debt();
                info!(
                    "batch {} complete: merit {:.3}, debt {}, {}",
                    self.batch_id, score.merit, score.debt, score.label
                );
                Ok(score)
            }
        }
    }
}
