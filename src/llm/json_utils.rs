//! Recovery helpers for almost-JSON model output.
//!
//! Models asked for "JSON only" still return fenced blocks, smart
//! quotes, Python-style `None`, trailing commas, and prose around the
//! payload. These helpers strip and repair those shapes before the
//! schema layer sees them.

use std::sync::LazyLock;

use regex::Regex;

static CODE_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)```(?:json)?\s*(.*?)```").expect("Invalid code fence regex")
});

static NULL_WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:NULL|NONE|N/A)\b").expect("Invalid null-word regex"));

static TRAILING_COMMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("Invalid trailing-comma regex"));

static UNQUOTED_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([{\[,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:").expect("Invalid unquoted-key regex")
});

/// Return the contents of the first ```json fence, or the input
/// unchanged when no fence is present.
pub fn strip_code_fence(text: &str) -> &str {
    match CODE_FENCE_RE.captures(text) {
        Some(caps) => caps.get(1).map(|m| m.as_str().trim()).unwrap_or(text),
        None => text,
    }
}

/// Repair the usual JSON defects: smart quotes, `NULL`/`None`/`N/A`
/// literals, trailing commas, unquoted object keys.
pub fn sanitize_json_text(text: &str) -> String {
    let mut out = text
        .replace(['\u{201c}', '\u{201d}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");
    out = NULL_WORD_RE.replace_all(&out, "null").into_owned();
    out = TRAILING_COMMA_RE.replace_all(&out, "$1").into_owned();
    out = UNQUOTED_KEY_RE.replace_all(&out, "$1\"$2\":").into_owned();
    out
}

/// Parse text as JSON, retrying on the sanitized form. `None` when
/// neither parses.
pub fn parse_json_like(text: &str) -> Option<serde_json::Value> {
    if let Ok(value) = serde_json::from_str(text) {
        return Some(value);
    }
    let cleaned = sanitize_json_text(text);
    serde_json::from_str(&cleaned).ok()
}

/// Scan for balanced `{...}` and `[...]` substrings — candidate JSON
/// payloads buried in surrounding prose. Outermost blocks only.
pub fn iter_json_candidates(text: &str) -> Vec<&str> {
    let mut candidates = Vec::new();
    for (open, close) in [('{', '}'), ('[', ']')] {
        let mut depth = 0usize;
        let mut start = None;
        for (idx, ch) in text.char_indices() {
            if ch == open {
                if depth == 0 {
                    start = Some(idx);
                }
                depth += 1;
            } else if ch == close && depth > 0 {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        candidates.push(&text[s..idx + close.len_utf8()]);
                    }
                }
            }
        }
    }
    candidates
}
