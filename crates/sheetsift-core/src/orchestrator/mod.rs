//! Batch orchestration: assessment, ordering, worker-pool processing,
//! aggregation.

mod ordering;

pub use ordering::{order_for_cache_reuse, similarity, ArchiveProfile};

use crate::batch::compute_batch_size;
use crate::cache::{CacheConfig, ContentCache, Fingerprint, Regime};
use crate::config::AppConfig;
use crate::conflict::{ConflictDetector, DetectOptions};
use crate::error::Error;
use crate::extract::{self, Checkpoint, ExtractOptions, ExtractStatus};
use crate::lifecycle::ConflictLifecycleManager;
use crate::model::{
    ArchiveSummary, BatchPhase, Conflict, ConflictStatus, ExtractedRecord, MeritDebtScore,
};
use crate::parser::DocumentParser;
use crate::progress::ProgressReporter;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct OrchestratorOptions {
    /// Worker pool size; 0 means available parallelism.
    pub worker_threads: usize,
    /// Wall-clock budget per archive unit.
    pub archive_timeout: Duration,
    /// Minimum interval between progress snapshots.
    pub snapshot_interval: Duration,
    pub document_extensions: Vec<String>,
    pub recurse_nested: bool,
    pub max_recursion_depth: usize,
    /// Conflicts at or above this confidence are resolved as AUTO_FIXED.
    pub auto_fix_threshold: f64,
    pub detect: DetectOptions,
    pub cache: CacheConfig,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            archive_timeout: Duration::from_secs(300),
            snapshot_interval: Duration::from_millis(200),
            document_extensions: vec!["csv".to_string(), "xlsx".to_string()],
            recurse_nested: false,
            max_recursion_depth: 3,
            auto_fix_threshold: 0.98,
            detect: DetectOptions::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl From<&AppConfig> for OrchestratorOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            worker_threads: config.worker_threads,
            archive_timeout: Duration::from_secs(config.archive_timeout_secs),
            document_extensions: config.document_extensions.clone(),
            recurse_nested: config.recurse_nested,
            max_recursion_depth: config.max_recursion_depth,
            detect: DetectOptions {
                top_percent: config.top_percent,
                min_conflicts: config.min_conflicts,
                amount_outlier_threshold: config.amount_outlier_threshold,
                competitor_terms: config.competitor_terms.clone(),
                ..DetectOptions::default()
            },
            ..OrchestratorOptions::default()
        }
    }
}

/// Clonable handle to request cancellation of a running batch.
#[derive(Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Final batch report. A batch with failed archives is still a completed
/// batch; `cancelled` distinguishes interrupted runs.
#[derive(Debug, Clone, Serialize)]
pub struct ComprehensiveReport {
    pub batch_id: String,
    pub tenant: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
    pub total_archives: usize,
    pub archives_succeeded: usize,
    pub archives_failed: usize,
    pub total_files: usize,
    pub files_processed: usize,
    pub records_parsed: usize,
    pub batch_size: usize,
    pub conflicts_detected: usize,
    pub conflicts_resolved: usize,
    pub top_conflicts: Vec<Conflict>,
    /// Weighted mean of per-archive quality over succeeded archives.
    pub quality_score: f64,
    pub cache_hit_rate: f64,
    pub merit_debt: MeritDebtScore,
    pub cancelled: bool,
    pub archives: Vec<ArchiveSummary>,
    pub summary: String,
}

impl ComprehensiveReport {
    /// One row per archive, for spreadsheet-side triage.
    pub fn write_csv(&self, path: &Path) -> Result<(), Error> {
        let mut writer = csv::Writer::from_path(path).map_err(|e| Error::Other(e.to_string()))?;
        writer
            .write_record([
                "archive",
                "opened",
                "files_extracted",
                "documents_matched",
                "records_parsed",
                "conflicts",
                "quality",
                "duration_secs",
                "failure",
            ])
            .map_err(|e| Error::Other(e.to_string()))?;
        for archive in &self.archives {
            writer
                .write_record([
                    archive.path.clone(),
                    archive.opened.to_string(),
                    archive.files_extracted.to_string(),
                    archive.documents_matched.to_string(),
                    archive.records_parsed.to_string(),
                    archive.conflicts_detected.to_string(),
                    format!("{:.4}", archive.quality),
                    format!("{:.2}", archive.duration.as_secs_f64()),
                    archive.failure.clone().unwrap_or_default(),
                ])
                .map_err(|e| Error::Other(e.to_string()))?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// What one archive-processing unit sends back to the aggregation loop.
struct UnitOutcome {
    summary: ArchiveSummary,
    conflicts: Vec<Conflict>,
    documents_processed: usize,
}

/// Drives the full pipeline over a set of archives. Owns the content cache
/// and the detector for its lifetime; dropping the orchestrator tears both
/// down.
pub struct BatchOrchestrator {
    options: OrchestratorOptions,
    parser: Arc<dyn DocumentParser>,
    detector: Arc<ConflictDetector>,
    cache: Arc<ContentCache<Vec<ExtractedRecord>>>,
    cancel: Arc<AtomicBool>,
}

impl BatchOrchestrator {
    pub fn new(options: OrchestratorOptions, parser: Arc<dyn DocumentParser>) -> Self {
        let cache = Arc::new(ContentCache::new(options.cache.clone()));
        Self {
            options,
            parser,
            detector: Arc::new(ConflictDetector::new()),
            cache,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancel))
    }

    pub fn cache_hit_rate(&self) -> f64 {
        self.cache.hit_rate()
    }

    /// Run one batch over `archives` for `tenant`.
    ///
    /// Fails only when zero archives can be opened; individual archive
    /// failures (unopenable, timed out, cancelled mid-flight) are recorded
    /// as failed-archive entries in the report.
    pub fn process_batch(
        &self,
        archives: &[PathBuf],
        tenant: &str,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<ComprehensiveReport, Error> {
        let started_at = Utc::now();
        let started = Instant::now();
        let batch_id = format!("batch-{}", started_at.format("%Y%m%dT%H%M%S%.3f"));
        self.cancel.store(false, Ordering::Relaxed);
        self.cache.reset_stats();
        // Entity knowledge is per batch; only the content cache carries over.
        self.detector.reset();

        let mut lifecycle = ConflictLifecycleManager::new(Arc::clone(&reporter));

        // --- ASSESSMENT: open every archive, count extractable documents ---
        reporter.on_phase_change(BatchPhase::Assessment);
        let extensions: Vec<String> = self
            .options
            .document_extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();

        let mut profiles: Vec<ArchiveProfile> = Vec::new();
        let mut failed_summaries: Vec<ArchiveSummary> = Vec::new();
        for path in archives {
            match extract::list_entries(path) {
                Ok((size, names)) => {
                    let document_count = names
                        .iter()
                        .filter(|n| has_extension(n, &extensions))
                        .count();
                    profiles.push(ArchiveProfile::new(path.clone(), size, &names, document_count));
                }
                Err(e) => {
                    warn!("assessment failed for {}: {}", path.display(), e);
                    failed_summaries.push(failed_summary(path, e.to_string()));
                }
            }
        }

        if profiles.is_empty() {
            return Err(Error::BatchFailed(format!(
                "none of the {} archives could be opened",
                archives.len()
            )));
        }

        let total_files: usize = profiles.iter().map(|p| p.document_count).sum();
        let plan = compute_batch_size(total_files);
        lifecycle.start_batch(batch_id.clone(), total_files, archives.len())?;
        lifecycle.set_phase(BatchPhase::Assessment);
        // Assessment already disposed of the unopenable archives.
        for _ in &failed_summaries {
            lifecycle.archive_finished();
        }
        debug!(
            "assessed {} archives: {} documents, batch size {} ({} batches)",
            profiles.len(),
            total_files,
            plan.batch_size,
            plan.batch_count
        );

        // --- OPTIMIZATION: order archives for cache reuse ---
        reporter.on_phase_change(BatchPhase::Optimization);
        lifecycle.set_phase(BatchPhase::Optimization);
        let ordered = order_for_cache_reuse(profiles);

        // --- PROCESSING: one unit per archive on the worker pool ---
        reporter.on_phase_change(BatchPhase::Processing);
        lifecycle.set_phase(BatchPhase::Processing);

        let threads = if self.options.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.options.worker_threads
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("sheetsift-worker-{}", i))
            .build()
            .map_err(|e| Error::Other(e.to_string()))?;

        let (tx, rx) = mpsc::channel::<UnitOutcome>();
        let total_units = ordered.len();
        for (index, profile) in ordered.into_iter().enumerate() {
            reporter.on_archive_start(&profile.path.display().to_string(), index + 1, total_units);
            let tx = tx.clone();
            let worker = ArchiveWorker {
                options: self.options.clone(),
                extensions: extensions.clone(),
                parser: Arc::clone(&self.parser),
                detector: Arc::clone(&self.detector),
                cache: Arc::clone(&self.cache),
                cancel: Arc::clone(&self.cancel),
                batch_size: plan.batch_size,
            };
            pool.spawn(move || {
                let outcome = worker.run(&profile);
                // Receiver gone means the batch errored out; nothing to do.
                let _ = tx.send(outcome);
            });
        }
        drop(tx);

        // Aggregate as units complete; snapshots at most every
        // `snapshot_interval` plus one per archive boundary.
        let mut last_snapshot = Instant::now()
            .checked_sub(self.options.snapshot_interval)
            .unwrap_or_else(Instant::now);
        let mut files_processed = 0usize;
        let mut records_parsed = 0usize;
        let mut summaries = failed_summaries;
        loop {
            match rx.recv_timeout(Duration::from_millis(50)) {
                Ok(outcome) => {
                    files_processed += outcome.documents_processed;
                    records_parsed += outcome.summary.records_parsed;
                    lifecycle.update_progress(files_processed);
                    lifecycle.archive_finished();
                    lifecycle.set_cache_hit_rate(self.cache.hit_rate());

                    for conflict in outcome.conflicts {
                        let auto_fix = conflict.confidence >= self.options.auto_fix_threshold;
                        let id = conflict.id;
                        lifecycle.emit_conflict(conflict)?;
                        if auto_fix {
                            lifecycle.resolve_conflict(id, ConflictStatus::AutoFixed, "auto-fix")?;
                        }
                    }

                    reporter.on_archive_complete(&outcome.summary);
                    summaries.push(outcome.summary);

                    // Archive boundary always snapshots.
                    reporter.on_snapshot(&lifecycle.progress());
                    last_snapshot = Instant::now();
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if last_snapshot.elapsed() >= self.options.snapshot_interval {
                        reporter.on_snapshot(&lifecycle.progress());
                        last_snapshot = Instant::now();
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        // --- AGGREGATION ---
        reporter.on_phase_change(BatchPhase::Aggregation);
        lifecycle.set_phase(BatchPhase::Aggregation);

        let archives_succeeded = summaries.iter().filter(|s| s.failure.is_none()).count();
        let archives_failed = summaries.len() - archives_succeeded;
        let quality_score = weighted_quality(&summaries);
        let cache_hit_rate = self.cache.hit_rate();
        lifecycle.set_cache_hit_rate(cache_hit_rate);

        let mut all_conflicts: Vec<Conflict> = lifecycle.conflicts().cloned().collect();
        all_conflicts.sort_by(|a, b| {
            b.priority
                .partial_cmp(&a.priority)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        let top_take = top_count(
            all_conflicts.len(),
            self.options.detect.top_percent,
            self.options.detect.min_conflicts,
        );
        let top_conflicts: Vec<Conflict> = all_conflicts[..top_take].to_vec();

        let conflicts_detected = lifecycle.conflicts_detected();
        let conflicts_resolved = lifecycle.conflicts_resolved();
        let merit_debt = lifecycle.complete_batch()?;
        reporter.on_phase_change(BatchPhase::Complete);

        let cancelled = self.cancel.load(Ordering::Relaxed);
        let duration = started.elapsed();
        let summary = format!(
            "{}: {}/{} archives succeeded, {} documents, {} records, \
             {} conflicts ({} resolved), quality {:.1}%, cache hit rate {:.1}%, \
             merit {:.2} ({}){}",
            batch_id,
            archives_succeeded,
            summaries.len(),
            files_processed,
            records_parsed,
            conflicts_detected,
            conflicts_resolved,
            quality_score * 100.0,
            cache_hit_rate * 100.0,
            merit_debt.merit,
            merit_debt.label,
            if cancelled { " [CANCELLED]" } else { "" },
        );
        info!("{}", summary);

        Ok(ComprehensiveReport {
            batch_id,
            tenant: tenant.to_string(),
            started_at,
            finished_at: Utc::now(),
            duration,
            total_archives: archives.len(),
            archives_succeeded,
            archives_failed,
            total_files,
            files_processed,
            records_parsed,
            batch_size: plan.batch_size,
            conflicts_detected,
            conflicts_resolved,
            top_conflicts,
            quality_score,
            cache_hit_rate,
            merit_debt,
            cancelled,
            archives: summaries,
            summary,
        })
    }
}

fn has_extension(entry_name: &str, extensions: &[String]) -> bool {
    Path::new(entry_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .map(|e| extensions.iter().any(|x| *x == e))
        .unwrap_or(false)
}

fn failed_summary(path: &Path, reason: String) -> ArchiveSummary {
    ArchiveSummary {
        path: path.display().to_string(),
        opened: false,
        files_extracted: 0,
        documents_matched: 0,
        records_parsed: 0,
        conflicts_detected: 0,
        quality: 0.0,
        duration: Duration::ZERO,
        warnings: Vec::new(),
        failure: Some(reason),
    }
}

/// Weighted mean of per-archive quality over succeeded archives, weighted by
/// matched document count (empty archives weigh 1 so they cannot zero the
/// denominator).
fn weighted_quality(summaries: &[ArchiveSummary]) -> f64 {
    let mut weight_sum = 0f64;
    let mut total = 0f64;
    for summary in summaries.iter().filter(|s| s.failure.is_none()) {
        let weight = summary.documents_matched.max(1) as f64;
        weight_sum += weight;
        total += summary.quality * weight;
    }
    if weight_sum == 0.0 {
        0.0
    } else {
        total / weight_sum
    }
}

fn top_count(k: usize, top_percent: f64, min_conflicts: usize) -> usize {
    if k == 0 {
        return 0;
    }
    ((k as f64 * top_percent).ceil() as usize)
        .max(min_conflicts)
        .min(k)
}

/// Everything one pool unit needs to process a single archive.
struct ArchiveWorker {
    options: OrchestratorOptions,
    extensions: Vec<String>,
    parser: Arc<dyn DocumentParser>,
    detector: Arc<ConflictDetector>,
    cache: Arc<ContentCache<Vec<ExtractedRecord>>>,
    cancel: Arc<AtomicBool>,
    batch_size: usize,
}

impl ArchiveWorker {
    fn run(&self, profile: &ArchiveProfile) -> UnitOutcome {
        let label = profile.path.display().to_string();

        // Cancellation observed before start: unit is never processed.
        if self.cancel.load(Ordering::Relaxed) {
            return UnitOutcome {
                summary: failed_summary(&profile.path, "cancelled before start".to_string()),
                conflicts: Vec::new(),
                documents_processed: 0,
            };
        }

        let checkpoint = Checkpoint::new(
            Arc::clone(&self.cancel),
            Some(self.options.archive_timeout),
        );
        let mut extract_options = ExtractOptions::for_extensions(&self.extensions);
        extract_options.recurse = self.options.recurse_nested;
        extract_options.max_recursion_depth = self.options.max_recursion_depth;

        let extraction = match extract::extract(&profile.path, &extract_options, &checkpoint) {
            Ok(result) => result,
            Err(e) => {
                return UnitOutcome {
                    summary: failed_summary(&profile.path, e.to_string()),
                    conflicts: Vec::new(),
                    documents_processed: 0,
                }
            }
        };

        let mut warnings: Vec<String> =
            extraction.warnings.iter().map(|w| w.to_string()).collect();
        let mut records: Vec<ExtractedRecord> = Vec::new();
        let mut parsed_ok = 0usize;
        let mut documents_processed = 0usize;
        let mut failure: Option<String> = None;

        // Batch-sized chunks bound how many documents are in flight between
        // extraction and detection.
        'chunks: for chunk in extraction.documents.chunks(self.batch_size.max(1)) {
            if let Err(e) = checkpoint.check(&label) {
                failure = Some(e.to_string());
                break 'chunks;
            }
            for document in chunk {
                if document.status != ExtractStatus::Ok
                    || !self.parser.supports(&document.entry_path)
                {
                    continue;
                }
                documents_processed += 1;
                match self.parse_cached(&document.disk_path, &document.entry_path) {
                    Ok(parsed) => {
                        parsed_ok += 1;
                        records.extend(parsed);
                    }
                    Err(e) => warnings.push(format!("{}: {}", document.entry_path, e)),
                }
            }
        }

        // A budget that ran out while the last chunk was parsing would
        // otherwise go unnoticed.
        if failure.is_none() {
            if let Err(e) = checkpoint.check(&label) {
                failure = Some(e.to_string());
            }
        }

        let outcome = self
            .detector
            .detect(&records, &label, &self.options.detect);

        let quality = if extraction.documents_matched == 0 {
            1.0
        } else {
            parsed_ok as f64 / extraction.documents_matched as f64
        };

        let summary = ArchiveSummary {
            path: label,
            opened: true,
            files_extracted: extraction.files_extracted,
            documents_matched: extraction.documents_matched,
            records_parsed: records.len(),
            conflicts_detected: outcome.all.len(),
            quality,
            duration: extraction.duration,
            warnings,
            failure,
        };

        // The orchestrator called extract, so scratch cleanup is its job.
        let scratch = extraction.scratch;
        if let Err(e) = extract::cleanup(scratch) {
            warn!("scratch cleanup failed for {}: {}", summary.path, e);
        }

        UnitOutcome {
            summary,
            conflicts: outcome.all,
            documents_processed,
        }
    }

    /// Parse one document, reusing a cached result when the content
    /// fingerprint was seen before. Regime reflects how settled the parse
    /// looks: high-confidence results are worth keeping longest.
    fn parse_cached(
        &self,
        disk_path: &Path,
        entry_path: &str,
    ) -> Result<Vec<ExtractedRecord>, Error> {
        let bytes = fs::read(disk_path)?;
        let fingerprint = Fingerprint::of(&bytes);

        if let Some(cached) = self.cache.get(&fingerprint) {
            return Ok(cached);
        }

        let records = self.parser.parse(disk_path, entry_path)?;
        let mean_confidence = if records.is_empty() {
            0.0
        } else {
            records.iter().map(|r| r.confidence).sum::<f64>() / records.len() as f64
        };
        let regime = if mean_confidence >= 0.9 {
            Regime::Stabilization
        } else if mean_confidence >= 0.6 {
            Regime::Optimization
        } else {
            Regime::Exploration
        };
        self.cache.put(fingerprint, records.clone(), regime);
        Ok(records)
    }
}
