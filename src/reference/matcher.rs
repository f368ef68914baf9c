//! Resolving extracted conditions against the reference index.
//!
//! Stage order: exact code hint → exact description → fuzzy
//! description scan → code-prefix rescue. Absence of a match is a
//! normal outcome; this stage never fails.

use std::sync::Arc;

use super::loader::ReferenceIndex;
use super::similarity::{description_match_score, token_set_similarity};
use crate::config::PipelineConfig;
use crate::models::{ExtractedCondition, MatchMethod, MatchResult, ReferenceEntry};
use crate::pipeline::text::{normalize_description, normalize_icd10_code};

/// Floors for the code-prefix rescue stage.
const PREFIX_OVERLAP_THRESHOLD: f64 = 0.5;
const PREFIX_SIMILARITY_THRESHOLD: f64 = 0.35;

pub struct CodeMatcher {
    index: Arc<ReferenceIndex>,
    fuzzy_enabled: bool,
    fuzzy_threshold: f64,
}

impl CodeMatcher {
    pub fn new(index: Arc<ReferenceIndex>, config: &PipelineConfig) -> Self {
        Self {
            index,
            fuzzy_enabled: config.fuzzy_enabled,
            fuzzy_threshold: config.fuzzy_threshold,
        }
    }

    /// Resolve one condition. Always returns exactly one result.
    pub fn match_condition(&self, condition: &ExtractedCondition) -> MatchResult {
        // Stage 1: exact code hint.
        if let Some(code) = &condition.icd10_code {
            if let Some(entry) = self.index.match_by_code(code) {
                return self.hit(condition, entry, MatchMethod::Code, None);
            }
        }

        // Stage 2: exact description — the supplied description hint,
        // then the condition name.
        for text in [condition.icd10_description.as_deref(), Some(condition.name.as_str())]
            .into_iter()
            .flatten()
        {
            if let Some(entry) = self.index.match_by_description(text) {
                return self.hit(condition, entry, MatchMethod::DescriptionExact, None);
            }
        }

        if !self.fuzzy_enabled {
            return MatchResult::no_match(condition.clone());
        }

        let query = normalize_description(
            condition
                .icd10_description
                .as_deref()
                .unwrap_or(&condition.name),
        );

        // Stage 3: fuzzy scan over every reference description.
        if let Some((entry, score)) = self.best_fuzzy(&query) {
            if score >= self.fuzzy_threshold {
                return self.hit(condition, entry, MatchMethod::DescriptionFuzzy, Some(score));
            }
        }

        // Stage 4: code-prefix rescue for near-miss code hints.
        if let Some((entry, score)) = self.best_by_code_prefix(condition, &query) {
            return self.hit(condition, entry, MatchMethod::CodePrefixFuzzy, Some(score));
        }

        MatchResult::no_match(condition.clone())
    }

    /// Best-scoring entry across the whole table. Ties prefer the
    /// shorter normalized description, then table order (first seen
    /// wins while scanning in order).
    fn best_fuzzy(&self, query: &str) -> Option<(&ReferenceEntry, f64)> {
        if query.is_empty() {
            return None;
        }

        let mut best: Option<(&ReferenceEntry, f64)> = None;
        for entry in self.index.entries() {
            if entry.normalized_description.is_empty() {
                continue;
            }
            let score = token_set_similarity(query, &entry.normalized_description);
            let better = match best {
                None => score > 0.0,
                Some((best_entry, best_score)) => {
                    score > best_score
                        || (score == best_score
                            && entry.normalized_description.len()
                                < best_entry.normalized_description.len())
                }
            };
            if better {
                best = Some((entry, score));
            }
        }
        best
    }

    fn best_by_code_prefix(
        &self,
        condition: &ExtractedCondition,
        query: &str,
    ) -> Option<(&ReferenceEntry, f64)> {
        let code = normalize_icd10_code(condition.icd10_code.as_deref()?);
        if code.len() < 3 || query.is_empty() {
            return None;
        }

        let mut prefixes = Vec::new();
        if code.len() >= 4 {
            prefixes.push(&code[..4]);
        }
        prefixes.push(&code[..3]);

        let mut best: Option<(&ReferenceEntry, f64)> = None;
        let mut seen = std::collections::HashSet::new();
        for prefix in prefixes {
            for &idx in self.index.by_code_prefix(prefix) {
                let entry = &self.index.entries()[idx];
                if !seen.insert(entry.code.as_str()) {
                    continue;
                }
                let Some(score) = description_match_score(
                    query,
                    &entry.normalized_description,
                    PREFIX_OVERLAP_THRESHOLD,
                    PREFIX_SIMILARITY_THRESHOLD,
                ) else {
                    continue;
                };
                if best.map_or(true, |(_, best_score)| score > best_score) {
                    best = Some((entry, score));
                }
            }
        }
        best
    }

    fn hit(
        &self,
        condition: &ExtractedCondition,
        entry: &ReferenceEntry,
        method: MatchMethod,
        score: Option<f64>,
    ) -> MatchResult {
        let mut condition = condition.clone();
        // Fill the description in from the table when the note did
        // not supply one.
        if condition.icd10_description.is_none() && !entry.description.is_empty() {
            condition.icd10_description = Some(entry.description.clone());
        }
        MatchResult {
            condition,
            hcc_match: Some(entry.clone()),
            match_kind: method.kind(),
            score,
            method: Some(method),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExtractionSource, MatchKind};

    fn index_from(rows: &[(&str, &str)]) -> Arc<ReferenceIndex> {
        Arc::new(
            ReferenceIndex::from_rows(
                rows.iter()
                    .map(|(c, d)| (c.to_string(), d.to_string(), None)),
            )
            .unwrap(),
        )
    }

    fn matcher(rows: &[(&str, &str)], threshold: f64) -> CodeMatcher {
        let mut config = PipelineConfig::default();
        config.fuzzy_threshold = threshold;
        CodeMatcher::new(index_from(rows), &config)
    }

    fn named(name: &str) -> ExtractedCondition {
        ExtractedCondition::named(name, ExtractionSource::Rule)
    }

    fn with_code(name: &str, code: &str) -> ExtractedCondition {
        ExtractedCondition {
            icd10_code: Some(code.to_string()),
            ..named(name)
        }
    }

    #[test]
    fn exact_code_hit_has_no_score() {
        let matcher = matcher(&[("I5022", "Chronic systolic heart failure")], 0.92);
        let result = matcher.match_condition(&with_code("CHF", "I50.22"));

        assert_eq!(result.match_kind, MatchKind::Exact);
        assert_eq!(result.method, Some(MatchMethod::Code));
        assert_eq!(result.score, None);
        assert_eq!(result.hcc_match.as_ref().unwrap().code, "I5022");
        // Description filled in from the table.
        assert_eq!(
            result.condition.icd10_description.as_deref(),
            Some("Chronic systolic heart failure")
        );
    }

    #[test]
    fn exact_description_hit_has_no_score() {
        let matcher = matcher(&[("E119", "Type 2 diabetes mellitus")], 0.92);
        let result = matcher.match_condition(&named("Type 2 Diabetes Mellitus"));

        assert_eq!(result.match_kind, MatchKind::Exact);
        assert_eq!(result.method, Some(MatchMethod::DescriptionExact));
        assert_eq!(result.score, None);
    }

    #[test]
    fn description_hint_is_tried_before_name() {
        let matcher = matcher(
            &[
                ("E119", "Type 2 diabetes mellitus"),
                ("I10", "Essential hypertension"),
            ],
            0.92,
        );
        let condition = ExtractedCondition {
            icd10_description: Some("Essential hypertension".to_string()),
            ..named("HTN uncontrolled severely")
        };
        let result = matcher.match_condition(&condition);
        assert_eq!(result.hcc_match.unwrap().code, "I10");
    }

    #[test]
    fn token_subset_matches_fuzzily() {
        let matcher = matcher(&[("E119", "Type 2 diabetes mellitus")], 0.8);
        let result = matcher.match_condition(&named("type 2 diabetes"));

        assert_eq!(result.match_kind, MatchKind::Fuzzy);
        assert_eq!(result.method, Some(MatchMethod::DescriptionFuzzy));
        assert_eq!(result.score, Some(1.0));
        assert_eq!(result.hcc_match.unwrap().code, "E119");
    }

    #[test]
    fn score_exactly_at_threshold_matches() {
        // normalized_levenshtein("abcd", "abed") = 0.75 exactly
        let matcher = matcher(&[("A001", "abed")], 0.75);
        let result = matcher.match_condition(&named("abcd"));
        assert_eq!(result.match_kind, MatchKind::Fuzzy);
        assert_eq!(result.score, Some(0.75));
    }

    #[test]
    fn score_below_threshold_misses() {
        let matcher = matcher(&[("A001", "abed")], 0.76);
        let result = matcher.match_condition(&named("abcd"));
        assert_eq!(result.match_kind, MatchKind::None);
        assert!(result.hcc_match.is_none());
        assert_eq!(result.score, None);
    }

    #[test]
    fn ties_prefer_shorter_description() {
        // Both descriptions contain all query tokens → both score 1.0.
        let matcher = matcher(
            &[
                ("E109", "diabetes mellitus insipidus"),
                ("E119", "diabetes mellitus"),
            ],
            0.8,
        );
        let result = matcher.match_condition(&named("diabetes"));
        assert_eq!(result.hcc_match.unwrap().code, "E119");
    }

    #[test]
    fn equal_ties_prefer_table_order() {
        let matcher = matcher(
            &[("E109", "diabetes alpha"), ("E119", "diabetes omega")],
            0.5,
        );
        // "diabetes" is a subset of both; descriptions equally long.
        let result = matcher.match_condition(&named("diabetes"));
        assert_eq!(result.hcc_match.unwrap().code, "E109");
    }

    #[test]
    fn fuzzy_disabled_yields_none() {
        let mut config = PipelineConfig::default();
        config.fuzzy_enabled = false;
        let matcher = CodeMatcher::new(index_from(&[("E119", "Type 2 diabetes mellitus")]), &config);

        let result = matcher.match_condition(&named("type 2 diabetes"));
        assert_eq!(result.match_kind, MatchKind::None);
    }

    #[test]
    fn unmatched_condition_is_a_normal_outcome() {
        let matcher = matcher(&[("E119", "Type 2 diabetes mellitus")], 0.92);
        let result = matcher.match_condition(&named("Seasonal allergies"));
        assert_eq!(result.match_kind, MatchKind::None);
        assert!(result.hcc_match.is_none());
        assert!(result.method.is_none());
    }

    #[test]
    fn code_prefix_rescues_near_miss_codes() {
        // Hinted code E11.9 is absent; E11.22 shares the E11 prefix
        // and a strongly overlapping description.
        let matcher = matcher(
            &[(
                "E1122",
                "Type 2 diabetes mellitus with diabetic chronic kidney disease",
            )],
            0.95,
        );
        let condition = ExtractedCondition {
            icd10_description: Some("Type 2 diabetes kidney problems".to_string()),
            ..with_code("T2DM with CKD", "E11.9")
        };
        let result = matcher.match_condition(&condition);

        assert_eq!(result.match_kind, MatchKind::Fuzzy);
        assert_eq!(result.method, Some(MatchMethod::CodePrefixFuzzy));
        assert_eq!(result.hcc_match.unwrap().code, "E1122");
        assert!(result.score.unwrap() > 0.5);
    }

    #[test]
    fn code_prefix_requires_a_code_hint() {
        let matcher = matcher(
            &[("E1122", "Type 2 diabetes mellitus with kidney disease")],
            0.99,
        );
        let result = matcher.match_condition(&named("diabetes kidney trouble maybe"));
        assert_eq!(result.match_kind, MatchKind::None);
    }

    #[test]
    fn matching_is_deterministic() {
        let matcher = matcher(
            &[
                ("E119", "Type 2 diabetes mellitus"),
                ("I10", "Essential hypertension"),
                ("K219", "Gastro-esophageal reflux disease"),
            ],
            0.8,
        );
        let condition = named("gastro esophageal reflux");
        let first = matcher.match_condition(&condition);
        let second = matcher.match_condition(&condition);
        assert_eq!(first, second);
    }
}
