//! chartscan — clinical progress-note pipeline for HCC
//! risk-adjustment screening.
//!
//! Ingests free-text progress notes, isolates the Assessment/Plan
//! section, extracts discrete conditions (rule-based, with an
//! optional model-assisted pass), and resolves each against an HCC
//! reference table. The crate is a library: callers hand in notes, a
//! configuration, and the loaded reference index, and get back one
//! structured output per note plus a batch summary.

pub mod config;
pub mod io;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod reference;

pub use config::{LlmConfig, PipelineConfig};
pub use models::{BatchResult, Note, NoteOutput, SummaryRow};
pub use pipeline::{BatchOrchestrator, CancelHandle, PipelineError};
pub use reference::ReferenceIndex;

use tracing_subscriber::EnvFilter;

/// Initialize tracing for binaries and integration harnesses.
/// Honors `RUST_LOG`; defaults to `info` for this crate.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chartscan=info")),
        )
        .init();
}
