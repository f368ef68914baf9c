//! Per-note pipeline output and the derived batch summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::condition::MatchResult;
use super::note::NoteSource;

/// Terminal status of one note's run through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteStatus {
    /// Pipeline completed on the requested extraction path.
    Success,
    /// Pipeline completed but extraction degraded to the fallback path.
    Partial,
    /// An unexpected per-note failure; `error` holds the message.
    Failed,
}

impl NoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for NoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which extraction path actually produced the conditions.
///
/// Distinguishes "model disabled" (`RuleOnly`) from "model failed"
/// (`RuleFallback`) so callers can tell degradation from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// Model pass disabled by configuration; rule pass ran by design.
    RuleOnly,
    /// Model pass returned a valid payload on the first attempt.
    Model,
    /// Model pass returned a valid payload after one repair round.
    ModelRepaired,
    /// Model pass failed (invalid twice, or transport exhausted);
    /// conditions come from the rule-based fallback.
    RuleFallback,
}

impl ExtractionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RuleOnly => "rule_only",
            Self::Model => "model",
            Self::ModelRepaired => "model_repaired",
            Self::RuleFallback => "rule_fallback",
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::RuleFallback)
    }
}

/// One structured record per note. Written once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteOutput {
    pub note_id: String,
    pub source: NoteSource,
    /// The isolated Assessment/Plan text (or the whole note when no
    /// heading was found).
    pub assessment_plan: String,
    pub section_found: bool,
    pub conditions: Vec<MatchResult>,
    pub extraction: ExtractionMode,
    pub status: NoteStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Non-fatal degradation notes accumulated along the way
    /// (e.g. `assessment_plan_not_found`, `invalid_icd10_code:E99`).
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl NoteOutput {
    /// A `Failed` output for a note that never made it through the
    /// pipeline.
    pub fn failed(note_id: impl Into<String>, source: NoteSource, error: String) -> Self {
        Self {
            note_id: note_id.into(),
            source,
            assessment_plan: String::new(),
            section_found: false,
            conditions: Vec::new(),
            extraction: ExtractionMode::RuleOnly,
            status: NoteStatus::Failed,
            error: Some(error),
            warnings: vec!["note_processing_failed".to_string()],
            created_at: Utc::now(),
        }
    }
}

/// One summary line per note; a pure projection of the outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub note_id: String,
    pub condition_count: usize,
    pub hcc_relevant_count: usize,
    pub any_hcc_match: bool,
    pub status: NoteStatus,
}

impl SummaryRow {
    pub fn from_output(output: &NoteOutput) -> Self {
        let hcc_relevant_count = output
            .conditions
            .iter()
            .filter(|c| c.is_hcc_relevant())
            .count();
        Self {
            note_id: output.note_id.clone(),
            condition_count: output.conditions.len(),
            hcc_relevant_count,
            any_hcc_match: hcc_relevant_count > 0,
            status: output.status,
        }
    }
}

/// Build the batch summary. Pure function of the (already re-sorted)
/// outputs; regenerated whenever a batch completes.
pub fn build_summary(outputs: &[NoteOutput]) -> Vec<SummaryRow> {
    outputs.iter().map(SummaryRow::from_output).collect()
}

/// Result of running a full batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_id: String,
    pub outputs: Vec<NoteOutput>,
    pub summary: Vec<SummaryRow>,
    pub duration_ms: u64,
    /// True when cancellation stopped dispatch before every note ran.
    pub cancelled: bool,
}
