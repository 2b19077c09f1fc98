use crate::error::Error;
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};
use zip::ZipArchive;

/// Cancellation flag plus optional wall-clock deadline, consulted between
/// entries so an in-flight extraction stops at a safe boundary.
#[derive(Clone)]
pub struct Checkpoint {
    cancel: Arc<AtomicBool>,
    deadline: Option<Instant>,
    budget_secs: u64,
}

impl Checkpoint {
    pub fn new(cancel: Arc<AtomicBool>, budget: Option<Duration>) -> Self {
        Self {
            cancel,
            deadline: budget.map(|b| Instant::now() + b),
            budget_secs: budget.map(|b| b.as_secs()).unwrap_or(0),
        }
    }

    /// Checkpoint that never cancels and never times out.
    pub fn none() -> Self {
        Self {
            cancel: Arc::new(AtomicBool::new(false)),
            deadline: None,
            budget_secs: 0,
        }
    }

    pub fn check(&self, subject: &str) -> Result<(), Error> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() > deadline {
                return Err(Error::Timeout {
                    path: subject.to_string(),
                    budget_secs: self.budget_secs,
                });
            }
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct ExtractOptions {
    /// Entry extensions (lowercase, without dot) treated as documents.
    pub document_extensions: Vec<String>,
    /// Recurse into nested archives, one level at a time.
    pub recurse: bool,
    /// Nesting cap; exceeding it yields a warning, not a failure.
    pub max_recursion_depth: usize,
    /// Per-entry progress callback `(current, total)`.
    pub entry_progress: Option<Arc<dyn Fn(usize, usize) + Send + Sync>>,
}

impl ExtractOptions {
    pub fn for_extensions(extensions: &[String]) -> Self {
        Self {
            document_extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            recurse: false,
            max_recursion_depth: 3,
            entry_progress: None,
        }
    }

    fn matches(&self, entry_name: &str) -> bool {
        let ext = Path::new(entry_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext {
            Some(ext) => self.document_extensions.iter().any(|e| *e == ext),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractStatus {
    Ok,
    Failed,
    Skipped,
}

/// One extracted document sitting in the scratch directory.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    /// Archive-relative entry path (nested archives prefix their parent).
    pub entry_path: String,
    /// Absolute location under the scratch directory.
    pub disk_path: PathBuf,
    pub size: u64,
    pub duration: Duration,
    pub status: ExtractStatus,
}

#[derive(Debug, Clone)]
pub struct ExtractionWarning {
    pub entry: String,
    pub reason: String,
}

impl fmt::Display for ExtractionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.entry, self.reason)
    }
}

/// Handle to the scratch directory an extraction wrote into.
///
/// Cleanup is the caller's job: call [`cleanup`] when done with the
/// documents, or the directory leaks on disk.
#[derive(Debug)]
pub struct ScratchHandle {
    root: PathBuf,
}

impl ScratchHandle {
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Delete the scratch directory behind an extraction.
pub fn cleanup(handle: ScratchHandle) -> io::Result<()> {
    debug!("removing scratch dir {}", handle.root.display());
    fs::remove_dir_all(&handle.root)
}

#[derive(Debug)]
pub struct ExtractionResult {
    pub files_extracted: usize,
    pub documents_matched: usize,
    pub documents: Vec<ExtractedDocument>,
    pub warnings: Vec<ExtractionWarning>,
    pub archive_size: u64,
    pub duration: Duration,
    pub scratch: ScratchHandle,
}

/// Open an archive and report its declared size plus entry names, without
/// extracting anything. Used by the assessment phase and the ordering
/// heuristic.
pub fn list_entries(archive_path: &Path) -> Result<(u64, Vec<String>), Error> {
    let file = File::open(archive_path).map_err(|e| Error::ArchiveOpen {
        path: archive_path.display().to_string(),
        reason: e.to_string(),
    })?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    let mut archive = ZipArchive::new(file).map_err(|e| Error::ArchiveOpen {
        path: archive_path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        match archive.by_index(i) {
            Ok(entry) => {
                if !entry.is_dir() {
                    names.push(entry.name().to_string());
                }
            }
            Err(e) => trace!("unreadable entry {} in {}: {}", i, archive_path.display(), e),
        }
    }
    Ok((size, names))
}

/// Extract all matching documents from `archive_path` into a private scratch
/// directory.
///
/// Per-entry failures become warnings and extraction continues. The
/// operation fails only when the archive cannot be opened, when the
/// checkpoint fires, or when entry failures left zero files extracted.
pub fn extract(
    archive_path: &Path,
    options: &ExtractOptions,
    checkpoint: &Checkpoint,
) -> Result<ExtractionResult, Error> {
    let started = Instant::now();

    let scratch_root = tempfile::Builder::new()
        .prefix("sheetsift-")
        .tempdir()?
        .into_path();

    let mut documents = Vec::new();
    let mut warnings = Vec::new();
    let mut files_extracted = 0usize;
    let mut dir_seq = 0usize;
    let root_dir = scratch_root.join("a0");

    let archive_size = match extract_inner(
        archive_path,
        None,
        &scratch_root,
        &root_dir,
        options,
        checkpoint,
        0,
        &mut dir_seq,
        &mut documents,
        &mut warnings,
        &mut files_extracted,
    ) {
        Ok(size) => size,
        Err(e) => {
            // Don't leak the scratch dir when the archive itself is the problem.
            let _ = fs::remove_dir_all(&scratch_root);
            return Err(e);
        }
    };

    if files_extracted == 0 && !warnings.is_empty() {
        let _ = fs::remove_dir_all(&scratch_root);
        return Err(Error::NothingExtracted {
            path: archive_path.display().to_string(),
        });
    }

    let documents_matched = documents
        .iter()
        .filter(|d| d.status == ExtractStatus::Ok)
        .count();

    debug!(
        "extracted {} of {} matching documents from {} ({} warnings)",
        documents_matched,
        documents.len(),
        archive_path.display(),
        warnings.len()
    );

    Ok(ExtractionResult {
        files_extracted,
        documents_matched,
        documents,
        warnings,
        archive_size,
        duration: started.elapsed(),
        scratch: ScratchHandle { root: scratch_root },
    })
}

fn is_nested_archive(entry_name: &str) -> bool {
    Path::new(entry_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}

// Every archive (outer or nested) writes into its own `a{seq}` subtree, and
// every entry into its own `e{index}` component, so sibling archives or
// repeated entry names can never land on the same path.
#[allow(clippy::too_many_arguments)]
fn extract_inner(
    archive_path: &Path,
    entry_prefix: Option<&str>,
    scratch_root: &Path,
    archive_dir: &Path,
    options: &ExtractOptions,
    checkpoint: &Checkpoint,
    depth: usize,
    dir_seq: &mut usize,
    documents: &mut Vec<ExtractedDocument>,
    warnings: &mut Vec<ExtractionWarning>,
    files_extracted: &mut usize,
) -> Result<u64, Error> {
    let subject = archive_path.display().to_string();

    let file = File::open(archive_path).map_err(|e| Error::ArchiveOpen {
        path: subject.clone(),
        reason: e.to_string(),
    })?;
    let archive_size = file.metadata().map(|m| m.len()).unwrap_or(0);
    let mut archive = ZipArchive::new(file).map_err(|e| Error::ArchiveOpen {
        path: subject.clone(),
        reason: e.to_string(),
    })?;

    let total = archive.len();
    for index in 0..total {
        // Safe interruption point between entries.
        checkpoint.check(&subject)?;

        if let Some(cb) = &options.entry_progress {
            cb(index + 1, total);
        }

        let entry_result = {
            let mut entry = match archive.by_index(index) {
                Ok(entry) => entry,
                Err(e) => {
                    warnings.push(ExtractionWarning {
                        entry: format!("#{}", index),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            if entry.is_dir() {
                continue;
            }
            let entry_name = match entry_prefix {
                Some(prefix) => format!("{}!{}", prefix, entry.name()),
                None => entry.name().to_string(),
            };

            let nested = options.recurse && is_nested_archive(entry.name());
            if !nested && !options.matches(entry.name()) {
                continue;
            }

            // Guard against entries escaping the scratch dir.
            let Some(relative) = entry.enclosed_name() else {
                warnings.push(ExtractionWarning {
                    entry: entry_name.clone(),
                    reason: "unsafe entry path".to_string(),
                });
                continue;
            };

            let target = archive_dir.join(format!("e{}", index)).join(relative);
            let entry_started = Instant::now();
            let written = (|| -> io::Result<u64> {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut out = File::create(&target)?;
                io::copy(&mut entry, &mut out)
            })();
            (nested, entry_name.clone(), target, entry_started, written)
        };

        let (nested, name, target, entry_started, written) = entry_result;
        match written {
            Ok(bytes) => {
                *files_extracted += 1;
                if nested {
                    if depth + 1 > options.max_recursion_depth {
                        warn!("recursion depth cap hit at {}", name);
                        warnings.push(ExtractionWarning {
                            entry: name,
                            reason: format!(
                                "nested archive skipped: recursion depth cap ({}) reached",
                                options.max_recursion_depth
                            ),
                        });
                    } else {
                        *dir_seq += 1;
                        let child_dir = scratch_root.join(format!("a{}", *dir_seq));
                        if let Err(e) = extract_inner(
                            &target,
                            Some(&name),
                            scratch_root,
                            &child_dir,
                            options,
                            checkpoint,
                            depth + 1,
                            dir_seq,
                            documents,
                            warnings,
                            files_extracted,
                        ) {
                            match e {
                                // Cancellation and timeouts propagate; a broken
                                // nested archive is just a warning.
                                Error::Cancelled | Error::Timeout { .. } => return Err(e),
                                other => warnings.push(ExtractionWarning {
                                    entry: name,
                                    reason: other.to_string(),
                                }),
                            }
                        }
                    }
                } else {
                    documents.push(ExtractedDocument {
                        entry_path: name,
                        disk_path: target,
                        size: bytes,
                        duration: entry_started.elapsed(),
                        status: ExtractStatus::Ok,
                    });
                }
            }
            Err(e) => {
                warnings.push(ExtractionWarning {
                    entry: name.clone(),
                    reason: e.to_string(),
                });
                documents.push(ExtractedDocument {
                    entry_path: name,
                    disk_path: target,
                    size: 0,
                    duration: entry_started.elapsed(),
                    status: ExtractStatus::Failed,
                });
            }
        }
    }

    Ok(archive_size)
}
