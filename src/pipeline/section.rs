//! Assessment/Plan section isolation.
//!
//! Finds the section by heading heuristics. When no heading is
//! recognized, the whole note passes through unchanged — downstream
//! stages prefer working on too much text over no text, and the miss
//! is recorded as a warning, not an error.

use std::sync::LazyLock;

use regex::Regex;

/// Heading variants that open the Assessment/Plan section.
static SECTION_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^[^\S\r\n]*(?:assessment[^\S\r\n]*(?:/|and)[^\S\r\n]*plan|a/p|assessment|plan)[^\S\r\n]*:?[^\S\r\n]*\r?$|assessment[^\S\r\n]*/[^\S\r\n]*plan",
    )
    .expect("Invalid section header regex")
});

/// Headings that close the section.
static STOP_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^\s*(?:return to office|encounter sign[- ]?off|patient instructions|follow[- ]?up instructions)\b",
    )
    .expect("Invalid stop header regex")
});

/// The isolated section plus whether a heading was actually found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionExtract {
    pub text: String,
    pub found: bool,
}

/// Isolate the Assessment/Plan section of a note.
///
/// The section runs from just after the first recognized heading to
/// the first stop heading, or end of document. No heading → the
/// original text, unchanged, with `found = false`.
pub fn extract_assessment_plan(note_text: &str) -> SectionExtract {
    let Some(header) = SECTION_HEADER_RE.find(note_text) else {
        return SectionExtract {
            text: note_text.to_string(),
            found: false,
        };
    };

    let mut remainder = &note_text[header.end()..];
    remainder = remainder.trim_start_matches([' ', ':', '\n', '\r', '\t']);

    let remainder = match STOP_HEADER_RE.find(remainder) {
        Some(stop) => &remainder[..stop.start()],
        None => remainder,
    };

    SectionExtract {
        text: remainder.trim().to_string(),
        found: true,
    }
}
