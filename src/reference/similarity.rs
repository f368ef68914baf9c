//! String similarity for description matching.
//!
//! The scan metric is a token-set normalized Levenshtein: both
//! strings are split into token intersection and differences, and the
//! score is the best ratio among the sorted-token renderings. A
//! subset relation ("type 2 diabetes" vs "type 2 diabetes mellitus")
//! scores 1.0, so word order and trailing qualifiers do not sink
//! otherwise-identical descriptions.
//!
//! Inputs are expected to be pre-normalized (lowercased, punctuation
//! folded, whitespace collapsed).

use std::collections::BTreeSet;

use strsim::normalized_levenshtein;

/// Tokens that carry no discriminating signal between descriptions.
const DESCRIPTION_STOP_TOKENS: &[&str] = &[
    "unspecified",
    "other",
    "with",
    "without",
    "due",
    "to",
    "of",
    "and",
    "the",
    "in",
    "on",
    "for",
];

/// Token-set similarity in [0, 1].
pub fn token_set_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return if a.is_empty() { 0.0 } else { 1.0 };
    }

    let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let intersection: Vec<&str> = tokens_a.intersection(&tokens_b).copied().collect();
    let diff_a: Vec<&str> = tokens_a.difference(&tokens_b).copied().collect();
    let diff_b: Vec<&str> = tokens_b.difference(&tokens_a).copied().collect();

    let sect = intersection.join(" ");
    let full_a = join_parts(&intersection, &diff_a);
    let full_b = join_parts(&intersection, &diff_b);

    let mut best = normalized_levenshtein(&full_a, &full_b);
    if !sect.is_empty() {
        best = best
            .max(normalized_levenshtein(&sect, &full_a))
            .max(normalized_levenshtein(&sect, &full_b));
    }
    best
}

fn join_parts(intersection: &[&str], diff: &[&str]) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(intersection.len() + diff.len());
    parts.extend_from_slice(intersection);
    parts.extend_from_slice(diff);
    parts.join(" ")
}

/// Tokens that matter when comparing descriptions: stop tokens and
/// very short tokens removed, falling back to the unfiltered non-stop
/// set when nothing survives.
pub fn meaningful_tokens(text: &str) -> BTreeSet<&str> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let filtered: BTreeSet<&str> = tokens
        .iter()
        .copied()
        .filter(|t| t.len() > 2 && !DESCRIPTION_STOP_TOKENS.contains(t))
        .collect();
    if !filtered.is_empty() {
        return filtered;
    }
    tokens
        .into_iter()
        .filter(|t| !DESCRIPTION_STOP_TOKENS.contains(t))
        .collect()
}

/// Combined overlap/similarity score for the code-prefix stage.
///
/// `None` when the descriptions share no meaningful tokens or both
/// the overlap ratio and the raw similarity fall under their floors.
pub fn description_match_score(
    description: &str,
    candidate: &str,
    min_overlap: f64,
    min_similarity: f64,
) -> Option<f64> {
    if description.is_empty() || candidate.is_empty() {
        return None;
    }

    let desc_tokens = meaningful_tokens(description);
    let cand_tokens = meaningful_tokens(candidate);
    if desc_tokens.is_empty() || cand_tokens.is_empty() {
        return None;
    }

    let overlap = desc_tokens.intersection(&cand_tokens).count();
    if overlap == 0 {
        return None;
    }

    let overlap_ratio = overlap as f64 / desc_tokens.len().min(cand_tokens.len()) as f64;
    let similarity = normalized_levenshtein(description, candidate);
    if overlap_ratio < min_overlap && similarity < min_similarity {
        return None;
    }

    Some(overlap_ratio * 0.7 + similarity * 0.3)
}
