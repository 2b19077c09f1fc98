pub mod batch;
pub mod cache;
pub mod config;
pub mod conflict;
pub mod error;
pub mod extract;
pub mod lifecycle;
pub mod model;
pub mod orchestrator;
pub mod parser;
pub mod progress;

pub use config::AppConfig;
pub use error::Error;
pub use orchestrator::{BatchOrchestrator, CancelHandle, ComprehensiveReport, OrchestratorOptions};
pub use progress::{ProgressReporter, SilentReporter};
