//! Rule-based condition extraction.
//!
//! Deterministic pass over the Assessment/Plan text: numbered items
//! become blocks, the first line of each block names the condition,
//! and inline ICD-10 codes become hints for the matcher. No external
//! calls; same input always yields the same output.

use std::sync::LazyLock;

use regex::Regex;

use super::text::{normalize_icd10_code, ICD10_RE};
use crate::models::{ExtractedCondition, ExtractionSource};

static BLOCK_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d+[).]\s*").expect("Invalid block start regex"));

static STATUS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(stable|improving|worsening|unchanged|acute|chronic)\b")
        .expect("Invalid status regex")
});

static SEVERITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(mild|moderate|severe|end[- ]?stage)\b").expect("Invalid severity regex")
});

/// Narrative openers stripped from condition names
/// ("Patient has type 2 diabetes" → "type 2 diabetes").
const NAME_LEAD_INS: &[&str] = &["patient has ", "pt has ", "history of ", "h/o ", "known "];

/// The deterministic extractor. Default path when the model pass is
/// disabled, and the fallback when it fails.
pub struct RuleBasedExtractor;

impl RuleBasedExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, assessment_text: &str) -> Vec<ExtractedCondition> {
        if assessment_text.trim().is_empty() {
            return Vec::new();
        }

        let lines: Vec<&str> = assessment_text.lines().map(|l| l.trim_end()).collect();
        let mut blocks: Vec<Vec<&str>> = Vec::new();
        let mut current: Vec<&str> = Vec::new();

        for line in &lines {
            if BLOCK_START_RE.is_match(line) {
                if !current.is_empty() {
                    blocks.push(std::mem::take(&mut current));
                }
                current.push(line);
            } else if !current.is_empty() {
                current.push(line);
            }
        }
        if !current.is_empty() {
            blocks.push(current);
        }

        // No numbered items: treat the whole section as one block.
        if blocks.is_empty() {
            blocks.push(lines);
        }

        let mut conditions = Vec::new();
        for block in &blocks {
            self.extract_block(block, &mut conditions);
        }
        conditions
    }

    fn extract_block(&self, block: &[&str], conditions: &mut Vec<ExtractedCondition>) {
        let block_text = block
            .iter()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if block_text.is_empty() {
            return;
        }

        let Some(name) = condition_name(block.first().copied().unwrap_or_default()) else {
            return;
        };

        let clinical_status = STATUS_RE
            .captures(&block_text)
            .map(|c| c[1].to_lowercase());
        let severity = SEVERITY_RE.captures(&block_text).map(|c| {
            let value = c[1].to_lowercase();
            // end-stage folds into the severe bucket
            if value.starts_with("end") {
                "severe".to_string()
            } else {
                value
            }
        });

        let codes = block_codes(&block_text);
        if codes.is_empty() {
            conditions.push(ExtractedCondition {
                name,
                icd10_code: None,
                icd10_description: None,
                clinical_status,
                severity,
                confidence: None,
                raw_snippet: block_text,
                source: ExtractionSource::Rule,
            });
            return;
        }

        for code in codes {
            let description = block
                .iter()
                .find_map(|line| find_description_for_code(line, &code))
                .or_else(|| find_description_for_code(&block_text, &code));

            conditions.push(ExtractedCondition {
                name: name.clone(),
                icd10_code: Some(code),
                icd10_description: description,
                clinical_status: clinical_status.clone(),
                severity: severity.clone(),
                confidence: None,
                raw_snippet: block_text.clone(),
                source: ExtractionSource::Rule,
            });
        }
    }
}

impl Default for RuleBasedExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Derive the condition name from a block's first line: drop the item
/// number, cut at the first delimiter, strip narrative lead-ins.
fn condition_name(first_line: &str) -> Option<String> {
    let mut name = BLOCK_START_RE.replace(first_line, "").trim().to_string();

    for delim in [" - ", "-", ":"] {
        if let Some(idx) = name.find(delim) {
            name.truncate(idx);
            break;
        }
    }

    name = name
        .trim_matches([' ', '-', ':'])
        .trim_end_matches('.')
        .to_string();

    loop {
        let lowered = name.to_lowercase();
        let Some(lead_in) = NAME_LEAD_INS.iter().find(|p| lowered.starts_with(*p)) else {
            break;
        };
        name = name[lead_in.len()..].trim_start().to_string();
    }

    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// All distinct ICD-10 codes in the block, in order of appearance,
/// deduplicated on normalized form.
fn block_codes(text: &str) -> Vec<String> {
    let mut codes = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for m in ICD10_RE.find_iter(text) {
        let normalized = normalize_icd10_code(m.as_str());
        if normalized.is_empty() || !seen.insert(normalized) {
            continue;
        }
        codes.push(m.as_str().to_string());
    }
    codes
}

/// Description written inline after a code (`I50.22: Chronic systolic
/// heart failure`).
fn find_description_for_code(text: &str, code: &str) -> Option<String> {
    let pattern = format!(r"(?i){}\s*[:\-]\s*(.+)$", regex::escape(code));
    let re = Regex::new(&pattern).ok()?;
    let caps = re.captures(text)?;
    super::text::clean_text(&caps[1])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(conditions: &[ExtractedCondition]) -> Vec<&str> {
        conditions.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn extracts_numbered_items_with_codes() {
        let assessment = "1) Substance use disorder moderate - F19.20\n\
                          2) HLD - E78.5\n\
                          3) GERD - K21.9\n\
                          4) CAD - I25.10\n\
                          5) IBD - K51.90\n";
        let conditions = RuleBasedExtractor::new().extract(assessment);

        assert_eq!(
            names(&conditions),
            vec![
                "Substance use disorder moderate",
                "HLD",
                "GERD",
                "CAD",
                "IBD"
            ]
        );
        let codes: Vec<&str> = conditions
            .iter()
            .map(|c| c.icd10_code.as_deref().unwrap())
            .collect();
        assert_eq!(codes, vec!["F19.20", "E78.5", "K21.9", "I25.10", "K51.90"]);
        assert!(conditions
            .iter()
            .all(|c| c.source == ExtractionSource::Rule));
    }

    #[test]
    fn extracts_items_without_codes() {
        let assessment = "1) Diabetes - A1c 7.5 in office.\n\
                          2) HTN - stable, continue current meds\n\
                          3) COPD - No issues\n";
        let conditions = RuleBasedExtractor::new().extract(assessment);

        assert_eq!(names(&conditions), vec!["Diabetes", "HTN", "COPD"]);
        assert!(conditions.iter().all(|c| c.icd10_code.is_none()));
    }

    #[test]
    fn captures_status_and_severity() {
        let assessment = "1) CKD - stable, severe at baseline\n";
        let conditions = RuleBasedExtractor::new().extract(assessment);
        assert_eq!(conditions[0].clinical_status.as_deref(), Some("stable"));
        assert_eq!(conditions[0].severity.as_deref(), Some("severe"));
    }

    #[test]
    fn end_stage_folds_to_severe() {
        let assessment = "1) Renal disease - end-stage\n";
        let conditions = RuleBasedExtractor::new().extract(assessment);
        assert_eq!(conditions[0].severity.as_deref(), Some("severe"));
    }

    #[test]
    fn multi_line_block_joined_into_snippet() {
        let assessment = "1) CHF - I50.22: Chronic systolic heart failure\n\
                          continue lasix\n\
                          2) HTN\n";
        let conditions = RuleBasedExtractor::new().extract(assessment);
        assert_eq!(conditions.len(), 2);
        assert!(conditions[0].raw_snippet.contains("continue lasix"));
        assert_eq!(
            conditions[0].icd10_description.as_deref(),
            Some("Chronic systolic heart failure")
        );
    }

    #[test]
    fn unnumbered_text_is_one_block() {
        let conditions = RuleBasedExtractor::new().extract("Patient has type 2 diabetes.");
        assert_eq!(names(&conditions), vec!["type 2 diabetes"]);
    }

    #[test]
    fn lead_in_stripping_handles_stacked_openers() {
        let conditions = RuleBasedExtractor::new().extract("1. Known history of CHF\n");
        assert_eq!(names(&conditions), vec!["CHF"]);
    }

    #[test]
    fn duplicate_codes_deduplicated_within_block() {
        let assessment = "1) Diabetes - E11.9, recheck E11.9 next visit\n";
        let conditions = RuleBasedExtractor::new().extract(assessment);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].icd10_code.as_deref(), Some("E11.9"));
    }

    #[test]
    fn multiple_codes_fan_out() {
        let assessment = "1) Diabetes with complications - E11.22, E11.9\n";
        let conditions = RuleBasedExtractor::new().extract(assessment);
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].icd10_code.as_deref(), Some("E11.22"));
        assert_eq!(conditions[1].icd10_code.as_deref(), Some("E11.9"));
        assert_eq!(conditions[0].name, conditions[1].name);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(RuleBasedExtractor::new().extract("").is_empty());
        assert!(RuleBasedExtractor::new().extract("   \n  ").is_empty());
    }

    #[test]
    fn extraction_is_idempotent() {
        let assessment = "1) CAD - I25.10 stable\n2) GERD\n";
        let extractor = RuleBasedExtractor::new();
        let first = extractor.extract(assessment);
        let second = extractor.extract(assessment);
        assert_eq!(first, second);
    }

    #[test]
    fn text_before_first_numbered_item_is_ignored() {
        let assessment = "Discussed labs today.\n1) HTN - I10\n";
        let conditions = RuleBasedExtractor::new().extract(assessment);
        assert_eq!(names(&conditions), vec!["HTN"]);
    }
}
