//! Pipeline error taxonomy.
//!
//! Only configuration and reference-table problems abort a run; model
//! failures degrade to the rule-based fallback and per-note failures
//! are absorbed at the batch boundary.

use thiserror::Error;

use crate::llm::LlmError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Reference table error: {0}")]
    Reference(String),

    #[error("Model service error: {0}")]
    Llm(#[from] LlmError),

    #[error("Note ingestion error: {0}")]
    Ingestion(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
