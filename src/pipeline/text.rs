//! Text normalization primitives shared by the extractors, the
//! post-processor, and the matcher.

use std::sync::LazyLock;

use regex::Regex;

/// ICD-10 code shape, with or without the decimal point
/// (e.g. `E11.9`, `I5022`). `U` is excluded from the leading letter.
pub const ICD10_PATTERN: &str = r"[A-TV-Za-tv-z][0-9]{2}(?:\.[0-9A-TV-Za-tv-z]{1,4}|[0-9A-TV-Za-tv-z]{1,4})?";

pub static ICD10_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\b{ICD10_PATTERN}\b")).expect("Invalid ICD-10 regex")
});

static ICD10_NORMALIZED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-TV-Z][0-9]{2}[0-9A-TV-Z]{0,4}$").expect("Invalid normalized ICD-10 regex")
});

static NON_ALNUM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9]+").expect("Invalid non-alnum regex"));

/// Normalize an ICD-10 code for lookup: alphanumeric only, uppercased
/// (`i50.22` → `I5022`).
pub fn normalize_icd10_code(code: &str) -> String {
    code.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Normalize free text for description comparison: lowercase,
/// punctuation folded to spaces, whitespace collapsed.
pub fn normalize_description(text: &str) -> String {
    let lowered = text.to_lowercase();
    let cleaned = NON_ALNUM_RE.replace_all(&lowered, " ");
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Render a code canonically with the decimal point (`E119` → `E11.9`).
/// `None` when nothing alphanumeric remains.
pub fn format_icd10_code(code: &str) -> Option<String> {
    let normalized = normalize_icd10_code(code);
    if normalized.is_empty() {
        return None;
    }
    if normalized.len() <= 3 {
        return Some(normalized);
    }
    Some(format!("{}.{}", &normalized[..3], &normalized[3..]))
}

/// True when the code has a plausible ICD-10 shape after
/// normalization.
pub fn is_valid_icd10_code(code: &str) -> bool {
    let normalized = normalize_icd10_code(code);
    !normalized.is_empty() && ICD10_NORMALIZED_RE.is_match(&normalized)
}

/// Collapse whitespace and trim stray delimiter characters. `None`
/// when nothing is left.
pub fn clean_text(text: &str) -> Option<String> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let cleaned = collapsed.trim_matches([' ', '-', ':', ';']).to_string();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}
