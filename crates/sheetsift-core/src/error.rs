use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("cannot open archive {path}: {reason}")]
    ArchiveOpen { path: String, reason: String },

    #[error("no entries could be extracted from {path}")]
    NothingExtracted { path: String },

    #[error("archive {path} exceeded its processing budget of {budget_secs}s")]
    Timeout { path: String, budget_secs: u64 },

    #[error("batch cancelled")]
    Cancelled,

    #[error("batch could not start: {0}")]
    BatchFailed(String),

    #[error("document parse error in {document}: {reason}")]
    Parse { document: String, reason: String },

    #[error("unknown conflict id {0}")]
    UnknownConflictId(u64),

    #[error("conflict {0} has already been resolved")]
    ConflictAlreadyResolved(u64),

    #[error("invalid lifecycle transition: {0}")]
    InvalidStateTransition(String),

    #[error("cache fingerprint mismatch in partition {partition}")]
    CacheFingerprintMismatch { partition: String },

    #[error("{0}")]
    Other(String),
}
