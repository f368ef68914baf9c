//! The extraction-and-matching pipeline.
//!
//! Per note: isolate the Assessment/Plan section, extract conditions
//! (rules, or model with repair-then-fallback), normalize them, and
//! resolve each against the HCC reference index. The batch module
//! runs this over many notes with per-note failure isolation.

pub mod batch;
pub mod error;
pub mod llm_extract;
pub mod parse;
pub mod postprocess;
pub mod prompt;
pub mod rule_based;
pub mod section;
pub mod text;

pub use batch::{BatchOrchestrator, CancelHandle};
pub use error::PipelineError;
pub use llm_extract::{ConditionExtractor, ExtractionOutcome, LlmConditionExtractor};
pub use postprocess::post_process_conditions;
pub use rule_based::RuleBasedExtractor;
pub use section::extract_assessment_plan;
