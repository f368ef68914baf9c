//! Condition normalization between extraction and matching.
//!
//! Both extractors emit rough conditions: codes embedded in names,
//! `CODE: description` strings in single fields, bare abbreviations,
//! duplicates across numbered items. This pass cleans each condition,
//! drops the empties, and merges duplicates so the matcher sees one
//! canonical entry per real condition.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use super::text::{
    clean_text, format_icd10_code, is_valid_icd10_code, normalize_description,
    normalize_icd10_code, ICD10_PATTERN, ICD10_RE,
};
use crate::models::{Confidence, ExtractedCondition};

static CODE_DESC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^\s*(?P<code>{ICD10_PATTERN})\s*[:\-]\s*(?P<desc>.+)$"
    ))
    .expect("Invalid code-description regex")
});

static EMPTY_PARENS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\s*\)").expect("Invalid empty-parens regex"));

/// Bare clinical abbreviations expanded before matching. Keys are the
/// alphanumeric-only lowercase form of the whole condition name.
static ABBREVIATION_MAP: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ("cad", "Coronary artery disease"),
        ("chf", "Congestive heart failure"),
        ("ckd", "Chronic kidney disease"),
        ("copd", "Chronic obstructive pulmonary disease"),
        ("dm", "Diabetes mellitus"),
        ("gerd", "Gastroesophageal reflux disease"),
        ("hld", "Hyperlipidemia"),
        ("htn", "Hypertension"),
        ("ibd", "Inflammatory bowel disease"),
        ("mdd", "Major depressive disorder"),
        ("sud", "Substance use disorder"),
        ("t1dm", "Type 1 diabetes mellitus"),
        ("t2dm", "Type 2 diabetes mellitus"),
    ])
});

/// Normalize one condition. Returns the cleaned condition plus any
/// warnings raised along the way.
pub fn normalize_condition_fields(
    condition: &ExtractedCondition,
) -> (ExtractedCondition, Vec<String>) {
    let mut warnings = Vec::new();
    let mut name = condition.name.clone();
    let mut icd10_code = condition.icd10_code.clone();
    let mut icd10_description = condition.icd10_description.clone();

    // "I50.22: Chronic systolic heart failure" supplied as the name.
    if let Some((code, desc)) = split_code_description(&name) {
        if icd10_code.is_none() {
            icd10_code = Some(code);
        }
        if icd10_description.is_none() {
            icd10_description = Some(desc.clone());
        }
        name = desc;
    }

    // Same shape supplied as the description.
    if let Some(desc_field) = icd10_description.clone() {
        if let Some((code, desc)) = split_code_description(&desc_field) {
            if icd10_code.is_none() {
                icd10_code = Some(code);
            }
            icd10_description = Some(desc);
        }
    }

    // A stray code inside the name when none was supplied.
    if icd10_code.is_none() {
        let (stripped, code) = strip_first_code(&name);
        if let Some(code) = code {
            icd10_code = Some(code);
            if !stripped.is_empty() {
                name = stripped;
            }
        }
    }

    // Last resort: a code buried in the description.
    if icd10_code.is_none() {
        if let Some(desc) = &icd10_description {
            if let Some(m) = ICD10_RE.find(desc) {
                icd10_code = Some(m.as_str().to_string());
            }
        }
    }

    if let Some(code) = &icd10_code {
        if !is_valid_icd10_code(code) {
            warnings.push(format!("invalid_icd10_code:{code}"));
            icd10_code = None;
        }
    }

    // A name that is literally the code reads better as the description.
    if let (Some(code), Some(cleaned_name)) = (&icd10_code, clean_text(&name)) {
        if normalize_icd10_code(&cleaned_name) == normalize_icd10_code(code) {
            name = icd10_description.clone().unwrap_or(cleaned_name);
        }
    }

    name = expand_abbreviation(&name);
    let cleaned_name = clean_text(&name);
    let cleaned_description = icd10_description.as_deref().and_then(clean_text);
    let final_name = cleaned_name
        .or_else(|| cleaned_description.clone())
        .or_else(|| icd10_code.as_deref().and_then(clean_text))
        .unwrap_or_default();

    if final_name.is_empty() && icd10_code.is_none() && cleaned_description.is_none() {
        warnings.push("condition_missing_name".to_string());
    }

    let normalized = ExtractedCondition {
        name: final_name,
        icd10_code: icd10_code.as_deref().and_then(format_icd10_code),
        icd10_description: cleaned_description,
        clinical_status: condition.clinical_status.as_deref().and_then(clean_text),
        severity: condition.severity.as_deref().and_then(clean_text),
        confidence: condition.confidence,
        raw_snippet: condition.raw_snippet.clone(),
        source: condition.source,
    };
    (normalized, warnings)
}

/// Normalize, drop empties, and merge duplicates. The main entry for
/// the pipeline; idempotent.
pub fn post_process_conditions(
    conditions: &[ExtractedCondition],
) -> (Vec<ExtractedCondition>, Vec<String>) {
    let mut normalized = Vec::new();
    let mut warnings = Vec::new();

    for condition in conditions {
        let (cleaned, mut condition_warnings) = normalize_condition_fields(condition);
        warnings.append(&mut condition_warnings);
        if is_empty_condition(&cleaned) {
            warnings.push("condition_empty".to_string());
            continue;
        }
        normalized.push(cleaned);
    }

    (dedupe_conditions(normalized), warnings)
}

/// Dedupe key: normalized code, else normalized description, else
/// normalized name.
fn condition_key(condition: &ExtractedCondition) -> (u8, String) {
    if let Some(code) = &condition.icd10_code {
        let key = normalize_icd10_code(code);
        if !key.is_empty() {
            return (0, key);
        }
    }
    if let Some(desc) = &condition.icd10_description {
        let key = normalize_description(desc);
        if !key.is_empty() {
            return (1, key);
        }
    }
    (2, normalize_description(&condition.name))
}

fn dedupe_conditions(conditions: Vec<ExtractedCondition>) -> Vec<ExtractedCondition> {
    let mut merged: Vec<ExtractedCondition> = Vec::new();
    let mut index_by_key: HashMap<(u8, String), usize> = HashMap::new();

    for condition in conditions {
        let key = condition_key(&condition);
        match index_by_key.get(&key) {
            Some(&idx) => {
                let combined = merge_conditions(&merged[idx], &condition);
                merged[idx] = combined;
            }
            None => {
                index_by_key.insert(key, merged.len());
                merged.push(condition);
            }
        }
    }
    merged
}

fn merge_conditions(left: &ExtractedCondition, right: &ExtractedCondition) -> ExtractedCondition {
    ExtractedCondition {
        name: prefer_longer(&left.name, &right.name),
        icd10_code: left.icd10_code.clone().or_else(|| right.icd10_code.clone()),
        icd10_description: prefer_longer_opt(&left.icd10_description, &right.icd10_description),
        clinical_status: prefer_longer_opt(&left.clinical_status, &right.clinical_status),
        severity: prefer_longer_opt(&left.severity, &right.severity),
        confidence: merge_confidence(left.confidence, right.confidence),
        raw_snippet: prefer_longer(&left.raw_snippet, &right.raw_snippet),
        source: left.source,
    }
}

fn prefer_longer(left: &str, right: &str) -> String {
    if right.len() > left.len() {
        right.to_string()
    } else {
        left.to_string()
    }
}

fn prefer_longer_opt(left: &Option<String>, right: &Option<String>) -> Option<String> {
    match (left, right) {
        (Some(l), Some(r)) => Some(prefer_longer(l, r)),
        (Some(l), None) => Some(l.clone()),
        (None, Some(r)) => Some(r.clone()),
        (None, None) => None,
    }
}

fn merge_confidence(left: Option<Confidence>, right: Option<Confidence>) -> Option<Confidence> {
    match (left, right) {
        (Some(l), Some(r)) => Some(l.max(r)),
        (l, r) => l.or(r),
    }
}

/// Split a `CODE: description` / `CODE - description` string.
pub fn split_code_description(text: &str) -> Option<(String, String)> {
    let caps = CODE_DESC_RE.captures(text.trim())?;
    let desc = clean_text(&caps["desc"])?;
    Some((caps["code"].to_string(), desc))
}

/// Remove the first ICD-10 code from a string, returning the cleaned
/// remainder and the code.
pub fn strip_first_code(text: &str) -> (String, Option<String>) {
    let Some(m) = ICD10_RE.find(text) else {
        return (text.to_string(), None);
    };
    let code = m.as_str().to_string();
    let mut stripped = format!("{} {}", &text[..m.start()], &text[m.end()..]);
    stripped = EMPTY_PARENS_RE.replace_all(&stripped, "").into_owned();
    let stripped = clean_text(&stripped).unwrap_or_default();
    (stripped, Some(code))
}

fn expand_abbreviation(text: &str) -> String {
    let key: String = text
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if key.is_empty() {
        return text.to_string();
    }
    match ABBREVIATION_MAP.get(key.as_str()) {
        Some(expanded) => expanded.to_string(),
        None => text.to_string(),
    }
}

fn is_empty_condition(condition: &ExtractedCondition) -> bool {
    clean_text(&condition.name).is_none()
        && condition.icd10_code.is_none()
        && condition
            .icd10_description
            .as_deref()
            .and_then(clean_text)
            .is_none()
}
