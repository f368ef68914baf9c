//! Model-assisted condition extraction with repair and fallback.
//!
//! One request per note section. An invalid response gets one bounded
//! repair round; a second failure falls back to the rule-based
//! extractor. The fallback is a visible branch on a tagged attempt
//! result, not a caught exception, and the chosen path is reported in
//! the outcome's `ExtractionMode`.

use std::sync::Arc;

use super::parse::{conditions_from_payloads, parse_llm_response};
use super::prompt::{build_extraction_prompt, build_repair_prompt};
use super::rule_based::RuleBasedExtractor;
use crate::config::PipelineConfig;
use crate::llm::LlmClient;
use crate::models::{ExtractedCondition, ExtractionMode};

// Warning tags surfaced on the note output.
pub const WARN_TRUNCATED: &str = "assessment_plan_truncated";
pub const WARN_REQUEST_FAILED: &str = "llm_request_failed";
pub const WARN_INVALID_JSON: &str = "llm_invalid_json";
pub const WARN_EMPTY_CONDITIONS: &str = "llm_empty_conditions";
pub const WARN_JSON_SALVAGED: &str = "llm_json_salvaged";
pub const WARN_JSON_REPAIRED: &str = "llm_json_repaired";

/// What an extractor produced for one section, and how.
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub conditions: Vec<ExtractedCondition>,
    pub mode: ExtractionMode,
    pub warnings: Vec<String>,
}

/// Common seam over the rule-based and model-assisted extractors.
pub trait ConditionExtractor: Send + Sync {
    fn extract(&self, section_text: &str, note_id: &str) -> ExtractionOutcome;
}

impl ConditionExtractor for RuleBasedExtractor {
    fn extract(&self, section_text: &str, _note_id: &str) -> ExtractionOutcome {
        ExtractionOutcome {
            conditions: RuleBasedExtractor::extract(self, section_text),
            mode: ExtractionMode::RuleOnly,
            warnings: Vec::new(),
        }
    }
}

/// One model round: the response either validates into conditions or
/// it does not. `salvaged` marks payloads recovered from prose.
enum Attempt {
    Valid {
        conditions: Vec<ExtractedCondition>,
        salvaged: bool,
    },
    /// Raw text kept for the repair prompt; `None` when the request
    /// itself failed.
    Invalid { raw: Option<String> },
}

/// Model-assisted extractor wrapping an `LlmClient` with the
/// rule-based fallback.
pub struct LlmConditionExtractor {
    client: Arc<dyn LlmClient>,
    fallback: RuleBasedExtractor,
    enable_repair: bool,
    repair_max_chars: usize,
    max_prompt_chars: usize,
}

impl LlmConditionExtractor {
    pub fn new(client: Arc<dyn LlmClient>, config: &PipelineConfig) -> Self {
        Self {
            client,
            fallback: RuleBasedExtractor::new(),
            enable_repair: config.enable_repair,
            repair_max_chars: config.repair_max_chars,
            max_prompt_chars: config.max_prompt_chars,
        }
    }

    fn request(&self, prompt: &str, note_id: &str) -> Attempt {
        let raw = match self.client.generate(prompt) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(note_id, error = %e, "Model request failed");
                return Attempt::Invalid { raw: None };
            }
        };

        let parsed = parse_llm_response(&raw);
        if parsed.is_invalid() {
            return Attempt::Invalid { raw: Some(raw) };
        }
        Attempt::Valid {
            conditions: conditions_from_payloads(&parsed.conditions),
            salvaged: parsed.parse_error,
        }
    }

    fn fall_back(&self, section_text: &str, warning: &str) -> ExtractionOutcome {
        ExtractionOutcome {
            conditions: RuleBasedExtractor::extract(&self.fallback, section_text),
            mode: ExtractionMode::RuleFallback,
            warnings: vec![warning.to_string()],
        }
    }
}

impl ConditionExtractor for LlmConditionExtractor {
    fn extract(&self, section_text: &str, note_id: &str) -> ExtractionOutcome {
        if section_text.trim().is_empty() {
            return ExtractionOutcome {
                conditions: Vec::new(),
                mode: ExtractionMode::Model,
                warnings: Vec::new(),
            };
        }

        let (prompt, truncated) = build_extraction_prompt(section_text, self.max_prompt_chars);
        let mut warnings = Vec::new();
        if truncated {
            tracing::warn!(note_id, "Truncated Assessment/Plan text for prompt");
            warnings.push(WARN_TRUNCATED.to_string());
        }

        match self.request(&prompt, note_id) {
            Attempt::Valid {
                conditions,
                salvaged,
            } if !conditions.is_empty() => {
                if salvaged {
                    tracing::debug!(note_id, "Model response required JSON salvage");
                    warnings.push(WARN_JSON_SALVAGED.to_string());
                }
                ExtractionOutcome {
                    conditions,
                    mode: ExtractionMode::Model,
                    warnings,
                }
            }
            Attempt::Valid { .. } => {
                // Valid shape, zero conditions: distrust and fall back.
                tracing::debug!(note_id, "Model returned no conditions, using fallback");
                let mut outcome = self.fall_back(section_text, WARN_EMPTY_CONDITIONS);
                outcome.warnings.append(&mut warnings);
                outcome
            }
            Attempt::Invalid { raw: None } => {
                let mut outcome = self.fall_back(section_text, WARN_REQUEST_FAILED);
                outcome.warnings.append(&mut warnings);
                outcome
            }
            Attempt::Invalid { raw: Some(raw) } => {
                if self.enable_repair {
                    let repair_prompt = build_repair_prompt(&raw, self.repair_max_chars);
                    if let Attempt::Valid { conditions, .. } =
                        self.request(&repair_prompt, note_id)
                    {
                        if !conditions.is_empty() {
                            tracing::debug!(note_id, "Model output recovered via repair round");
                            warnings.push(WARN_JSON_REPAIRED.to_string());
                            return ExtractionOutcome {
                                conditions,
                                mode: ExtractionMode::ModelRepaired,
                                warnings,
                            };
                        }
                    }
                }
                tracing::warn!(note_id, "Model returned invalid JSON, using fallback");
                let mut outcome = self.fall_back(section_text, WARN_INVALID_JSON);
                outcome.warnings.append(&mut warnings);
                outcome
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlmClient, ScriptedLlmClient};
    use crate::models::ExtractionSource;

    const SECTION: &str = "1) CHF - I50.22\n2) GERD - K21.9\n";

    fn extractor(client: Arc<dyn LlmClient>) -> LlmConditionExtractor {
        LlmConditionExtractor::new(client, &PipelineConfig::default())
    }

    #[test]
    fn valid_response_uses_model_path() {
        let client = Arc::new(MockLlmClient::new(
            r#"{"conditions": [{"condition": "Congestive heart failure", "icd10_code": "I50.22"}]}"#,
        ));
        let outcome = extractor(client).extract(SECTION, "note-1");

        assert_eq!(outcome.mode, ExtractionMode::Model);
        assert_eq!(outcome.conditions.len(), 1);
        assert_eq!(outcome.conditions[0].name, "Congestive heart failure");
        assert_eq!(outcome.conditions[0].source, ExtractionSource::Model);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn invalid_then_repaired_uses_repair_path() {
        let client = Arc::new(ScriptedLlmClient::new(vec![
            Ok("total garbage, not json".to_string()),
            Ok(r#"{"conditions": [{"condition": "GERD"}]}"#.to_string()),
        ]));
        let outcome = extractor(client.clone()).extract(SECTION, "note-1");

        assert_eq!(outcome.mode, ExtractionMode::ModelRepaired);
        assert_eq!(outcome.conditions[0].name, "GERD");
        assert!(outcome
            .warnings
            .contains(&WARN_JSON_REPAIRED.to_string()));

        // Second prompt was the repair prompt carrying the bad output.
        let prompts = client.prompts_seen();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("total garbage"));
        assert!(prompts[1].contains("repair"));
    }

    #[test]
    fn invalid_twice_falls_back_to_rules() {
        let client = Arc::new(ScriptedLlmClient::new(vec![
            Ok("not json at all".to_string()),
            Ok("still not json".to_string()),
        ]));
        let outcome = extractor(client).extract(SECTION, "note-1");

        assert_eq!(outcome.mode, ExtractionMode::RuleFallback);
        assert!(outcome
            .warnings
            .contains(&WARN_INVALID_JSON.to_string()));

        // Fallback output equals the rule-based extractor's output.
        let expected = RuleBasedExtractor::new().extract(SECTION);
        assert_eq!(outcome.conditions, expected);
        assert!(outcome
            .conditions
            .iter()
            .all(|c| c.source == ExtractionSource::Rule));
    }

    #[test]
    fn repair_disabled_falls_back_after_first_invalid() {
        let client = Arc::new(ScriptedLlmClient::new(vec![Ok("junk".to_string())]));
        let mut config = PipelineConfig::default();
        config.enable_repair = false;
        let extractor = LlmConditionExtractor::new(client.clone(), &config);

        let outcome = extractor.extract(SECTION, "note-1");
        assert_eq!(outcome.mode, ExtractionMode::RuleFallback);
        // Only the initial request went out; no repair call.
        assert_eq!(client.prompts_seen().len(), 1);
    }

    #[test]
    fn transport_failure_falls_back_without_repair() {
        let client = Arc::new(MockLlmClient::failing("connection refused"));
        let outcome = extractor(client).extract(SECTION, "note-1");

        assert_eq!(outcome.mode, ExtractionMode::RuleFallback);
        assert!(outcome
            .warnings
            .contains(&WARN_REQUEST_FAILED.to_string()));
        assert!(!outcome.conditions.is_empty());
    }

    #[test]
    fn empty_condition_list_falls_back() {
        let client = Arc::new(MockLlmClient::new(r#"{"conditions": []}"#));
        let outcome = extractor(client).extract(SECTION, "note-1");

        assert_eq!(outcome.mode, ExtractionMode::RuleFallback);
        assert!(outcome
            .warnings
            .contains(&WARN_EMPTY_CONDITIONS.to_string()));
    }

    #[test]
    fn salvaged_response_keeps_model_path_with_warning() {
        let client = Arc::new(MockLlmClient::new(
            "Here you go: {\"conditions\": [{\"condition\": \"HLD\"}]} — anything else?",
        ));
        let outcome = extractor(client).extract(SECTION, "note-1");

        assert_eq!(outcome.mode, ExtractionMode::Model);
        assert!(outcome
            .warnings
            .contains(&WARN_JSON_SALVAGED.to_string()));
    }

    #[test]
    fn empty_section_skips_the_model_entirely() {
        let client = Arc::new(ScriptedLlmClient::new(vec![]));
        let outcome = extractor(client.clone()).extract("   ", "note-1");

        assert!(outcome.conditions.is_empty());
        assert!(client.prompts_seen().is_empty());
    }

    #[test]
    fn truncation_warning_rides_along() {
        let client = Arc::new(MockLlmClient::new(
            r#"{"conditions": [{"condition": "HTN"}]}"#,
        ));
        let mut config = PipelineConfig::default();
        config.max_prompt_chars = 10;
        let extractor = LlmConditionExtractor::new(client, &config);

        let outcome = extractor.extract(SECTION, "note-1");
        assert!(outcome.warnings.contains(&WARN_TRUNCATED.to_string()));
        assert_eq!(outcome.mode, ExtractionMode::Model);
    }

    #[test]
    fn rule_extractor_reports_rule_only_mode() {
        let outcome = ConditionExtractor::extract(&RuleBasedExtractor::new(), SECTION, "note-1");
        assert_eq!(outcome.mode, ExtractionMode::RuleOnly);
        assert_eq!(outcome.conditions.len(), 2);
    }
}
