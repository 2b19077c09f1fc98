use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use sheetsift_core::model::{ArchiveSummary, BatchPhase, BatchProgress, Conflict};
use sheetsift_core::ProgressReporter;
use std::sync::Mutex;

/// CLI progress reporter using indicatif progress bars.
///
/// - Assessment/optimization: spinner (totals unknown or instant)
/// - Processing: progress bar driven by snapshot events
/// - Aggregation: spinner
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn set_bar(&self, pb: ProgressBar) {
        let mut guard = self.bar.lock().unwrap();
        if let Some(old) = guard.take() {
            old.finish_and_clear();
        }
        *guard = Some(pb);
    }

    fn finish_bar(&self) {
        let mut guard = self.bar.lock().unwrap();
        if let Some(pb) = guard.take() {
            pb.finish_and_clear();
        }
    }

    fn spinner(&self, message: &str) {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(80));
        self.set_bar(pb);
    }
}

impl Default for CliReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for CliReporter {
    fn on_phase_change(&self, phase: BatchPhase) {
        match phase {
            BatchPhase::Assessment => self.spinner("Assessing archives..."),
            BatchPhase::Optimization => self.spinner("Ordering archives..."),
            BatchPhase::Processing => {
                // Length set on the first snapshot.
                let pb = ProgressBar::new(0);
                pb.set_style(
                    ProgressStyle::with_template(
                        "  {spinner:.cyan} Processing [{bar:30.cyan/dim}] {pos}/{len} documents {msg}",
                    )
                    .unwrap()
                    .progress_chars("━╸─")
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
                );
                pb.enable_steady_tick(std::time::Duration::from_millis(80));
                self.set_bar(pb);
            }
            BatchPhase::Aggregation => self.spinner("Aggregating results..."),
            BatchPhase::Complete => self.finish_bar(),
        }
    }

    fn on_snapshot(&self, progress: &BatchProgress) {
        let guard = self.bar.lock().unwrap();
        if let Some(pb) = guard.as_ref() {
            if pb.length() != Some(progress.total_files as u64) {
                pb.set_length(progress.total_files as u64);
            }
            pb.set_position(progress.files_processed as u64);
            pb.set_message(format!(
                "({}/{} archives, {} conflicts, cache {:.0}%)",
                progress.archives_processed,
                progress.total_archives,
                progress.conflicts_detected,
                progress.cache_hit_rate * 100.0
            ));
        }
    }

    fn on_archive_complete(&self, summary: &ArchiveSummary) {
        let guard = self.bar.lock().unwrap();
        let line = match &summary.failure {
            None => format!(
                "  {} {}: {} documents, {} records, {} conflicts in {:.2}s",
                style("✓").green(),
                summary.path,
                summary.documents_matched,
                summary.records_parsed,
                summary.conflicts_detected,
                summary.duration.as_secs_f64()
            ),
            Some(reason) => format!(
                "  {} {}: {}",
                style("✗").red(),
                summary.path,
                reason
            ),
        };
        match guard.as_ref() {
            Some(pb) => pb.println(line),
            None => eprintln!("{}", line),
        }
    }

    fn on_conflict_resolved(&self, conflict: &Conflict) {
        let guard = self.bar.lock().unwrap();
        if let Some(pb) = guard.as_ref() {
            pb.println(format!(
                "  {} conflict #{} ({}) resolved",
                style("·").dim(),
                conflict.id,
                conflict.kind
            ));
        }
    }
}
