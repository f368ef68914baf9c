//! Batch orchestration.
//!
//! A bounded pool of worker threads pulls notes off a shared cursor;
//! each worker owns one note end-to-end. Outputs funnel through one
//! channel per batch and are re-sorted to input order before the
//! summary is built — the channel arrival order is whatever the
//! workers produce. One note's failure never aborts the batch.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Instant;

use uuid::Uuid;

use super::llm_extract::{ConditionExtractor, LlmConditionExtractor};
use super::postprocess::post_process_conditions;
use super::rule_based::RuleBasedExtractor;
use super::section::extract_assessment_plan;
use crate::config::PipelineConfig;
use crate::llm::{HostedLlmClient, LlmClient};
use crate::models::{
    build_summary, BatchResult, Note, NoteOutput, NoteStatus,
};
use crate::pipeline::error::PipelineError;
use crate::reference::{CodeMatcher, ReferenceIndex};

/// Cooperative cancellation flag for a running batch. Cloneable;
/// cancelling stops dispatch of new notes while in-flight notes
/// complete normally.
#[derive(Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

pub fn new_batch_id() -> String {
    Uuid::new_v4().to_string()
}

/// Runs the section → extract → post-process → match pipeline over a
/// batch of notes.
pub struct BatchOrchestrator {
    config: PipelineConfig,
    extractor: Arc<dyn ConditionExtractor>,
    matcher: CodeMatcher,
}

impl std::fmt::Debug for BatchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOrchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BatchOrchestrator {
    /// Build with an explicit extractor (tests inject mocks here).
    /// Configuration problems are fatal before any note runs.
    pub fn new(
        config: PipelineConfig,
        index: Arc<ReferenceIndex>,
        extractor: Arc<dyn ConditionExtractor>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        if index.is_empty() {
            return Err(PipelineError::Reference(
                "Reference index is empty".to_string(),
            ));
        }
        let matcher = CodeMatcher::new(index, &config);
        Ok(Self {
            config,
            extractor,
            matcher,
        })
    }

    /// Build the extractor the configuration asks for: the
    /// model-assisted path over a hosted client when `use_llm`,
    /// otherwise rules alone.
    pub fn from_config(
        config: PipelineConfig,
        index: Arc<ReferenceIndex>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let extractor: Arc<dyn ConditionExtractor> = if config.use_llm {
            let mut client = HostedLlmClient::new(config.llm.clone())?;
            if config.use_structured_output {
                client = client
                    .with_response_schema(HostedLlmClient::conditions_response_schema());
            }
            let client: Arc<dyn LlmClient> = Arc::new(client);
            Arc::new(LlmConditionExtractor::new(client, &config))
        } else {
            Arc::new(RuleBasedExtractor::new())
        };
        Self::new(config, index, extractor)
    }

    /// Run a batch to completion.
    pub fn run(&self, notes: &[Note]) -> BatchResult {
        self.run_with_cancel(notes, &CancelHandle::new())
    }

    /// Run a batch under a cancellation handle. Already-completed
    /// outputs are preserved; notes never dispatched produce no
    /// output.
    pub fn run_with_cancel(&self, notes: &[Note], cancel: &CancelHandle) -> BatchResult {
        let start = Instant::now();
        let batch_id = new_batch_id();
        tracing::info!(
            batch_id,
            notes = notes.len(),
            workers = self.config.worker_count,
            "Starting batch"
        );

        let outputs = if self.config.worker_count <= 1 || notes.len() <= 1 {
            self.run_serial(notes, cancel)
        } else {
            self.run_pooled(notes, cancel)
        };

        let summary = build_summary(&outputs);
        let duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            batch_id,
            completed = outputs.len(),
            duration_ms,
            "Batch finished"
        );

        BatchResult {
            batch_id,
            outputs,
            summary,
            duration_ms,
            cancelled: cancel.is_cancelled(),
        }
    }

    fn run_serial(&self, notes: &[Note], cancel: &CancelHandle) -> Vec<NoteOutput> {
        let mut outputs = Vec::with_capacity(notes.len());
        for note in notes {
            if cancel.is_cancelled() {
                tracing::info!("Batch cancelled, stopping dispatch");
                break;
            }
            outputs.push(self.process_note_guarded(note));
        }
        outputs
    }

    fn run_pooled(&self, notes: &[Note], cancel: &CancelHandle) -> Vec<NoteOutput> {
        let worker_count = self.config.worker_count.min(notes.len());
        let cursor = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel::<(usize, NoteOutput)>();
        let mut collected: Vec<(usize, NoteOutput)> = Vec::with_capacity(notes.len());

        std::thread::scope(|scope| {
            for _ in 0..worker_count {
                let tx = tx.clone();
                let cursor = &cursor;
                scope.spawn(move || loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let idx = cursor.fetch_add(1, Ordering::SeqCst);
                    if idx >= notes.len() {
                        break;
                    }
                    let output = self.process_note_guarded(&notes[idx]);
                    if tx.send((idx, output)).is_err() {
                        break;
                    }
                });
            }
            drop(tx);

            // The collector is the single serialization point for the
            // batch; appends arrive in completion order.
            while let Ok(pair) = rx.recv() {
                collected.push(pair);
            }
        });

        // Required correctness step: restore input order before the
        // summary is derived.
        collected.sort_by_key(|(idx, _)| *idx);
        collected.into_iter().map(|(_, output)| output).collect()
    }

    /// The per-note failure boundary: a panic anywhere inside the
    /// per-note pipeline becomes a `Failed` output.
    fn process_note_guarded(&self, note: &Note) -> NoteOutput {
        match catch_unwind(AssertUnwindSafe(|| self.process_note(note))) {
            Ok(output) => output,
            Err(panic) => {
                let message = panic_message(&panic);
                tracing::error!(note_id = note.id, error = message, "Note processing panicked");
                NoteOutput::failed(note.id.as_str(), note.source, message)
            }
        }
    }

    /// One note end-to-end.
    pub fn process_note(&self, note: &Note) -> NoteOutput {
        let mut warnings = Vec::new();

        let section = extract_assessment_plan(&note.raw_text);
        if !section.found {
            tracing::debug!(note_id = note.id, "No Assessment/Plan heading, using whole note");
            warnings.push("assessment_plan_not_found".to_string());
        }

        let outcome = self.extractor.extract(&section.text, &note.id);
        warnings.extend(outcome.warnings.iter().cloned());

        let (conditions, mut post_warnings) = post_process_conditions(&outcome.conditions);
        warnings.append(&mut post_warnings);

        let results = conditions
            .iter()
            .map(|condition| self.matcher.match_condition(condition))
            .collect::<Vec<_>>();

        let status = if outcome.mode.is_degraded() {
            NoteStatus::Partial
        } else {
            NoteStatus::Success
        };

        tracing::debug!(
            note_id = note.id,
            conditions = results.len(),
            status = %status,
            "Note processed"
        );

        NoteOutput {
            note_id: note.id.clone(),
            source: note.source,
            assessment_plan: section.text,
            section_found: section.found,
            conditions: results,
            extraction: outcome.mode,
            status,
            error: None,
            warnings,
            created_at: chrono::Utc::now(),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
