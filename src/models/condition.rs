//! Extracted conditions and their match results against the HCC
//! reference table.

use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════
// Extraction
// ═══════════════════════════════════════════

/// Which extraction pass produced a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    Rule,
    Model,
}

impl ExtractionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rule => "rule",
            Self::Model => "model",
        }
    }
}

impl std::fmt::Display for ExtractionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Extraction confidence as reported by the model pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// One condition pulled out of the Assessment/Plan section.
///
/// `icd10_code` and `icd10_description` are hints found alongside the
/// condition in the source text (or reported by the model); they are
/// resolved against the reference table by the matcher, never trusted
/// as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedCondition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icd10_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icd10_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clinical_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    /// The block of section text this condition was lifted from.
    pub raw_snippet: String,
    pub source: ExtractionSource,
}

impl ExtractedCondition {
    /// A condition with only a name, as produced in tests and by the
    /// simplest rule blocks.
    pub fn named(name: impl Into<String>, source: ExtractionSource) -> Self {
        let name = name.into();
        Self {
            raw_snippet: name.clone(),
            name,
            icd10_code: None,
            icd10_description: None,
            clinical_status: None,
            severity: None,
            confidence: None,
            source,
        }
    }
}

// ═══════════════════════════════════════════
// Reference table
// ═══════════════════════════════════════════

/// One row of the HCC reference table. Loaded once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceEntry {
    /// Normalized ICD-10 code (alphanumeric, uppercased), unique
    /// within the table.
    pub code: String,
    pub description: String,
    pub normalized_description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
}

// ═══════════════════════════════════════════
// Matching
// ═══════════════════════════════════════════

/// Coarse match classification: `score` is populated only for `Fuzzy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Fuzzy,
    None,
}

impl MatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Fuzzy => "fuzzy",
            Self::None => "none",
        }
    }
}

impl std::fmt::Display for MatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which matcher stage produced the hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Code,
    DescriptionExact,
    DescriptionFuzzy,
    CodePrefixFuzzy,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::DescriptionExact => "description_exact",
            Self::DescriptionFuzzy => "description_fuzzy",
            Self::CodePrefixFuzzy => "code_prefix_fuzzy",
        }
    }

    /// The coarse classification this stage reports.
    pub fn kind(&self) -> MatchKind {
        match self {
            Self::Code | Self::DescriptionExact => MatchKind::Exact,
            Self::DescriptionFuzzy | Self::CodePrefixFuzzy => MatchKind::Fuzzy,
        }
    }
}

/// The matcher's verdict for one extracted condition.
///
/// Invariants: `hcc_match` is `Some` iff `match_kind != None`;
/// `score` is `Some` iff `match_kind == Fuzzy`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub condition: ExtractedCondition,
    pub hcc_match: Option<ReferenceEntry>,
    pub match_kind: MatchKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<MatchMethod>,
}

impl MatchResult {
    pub fn no_match(condition: ExtractedCondition) -> Self {
        Self {
            condition,
            hcc_match: None,
            match_kind: MatchKind::None,
            score: None,
            method: None,
        }
    }

    pub fn is_hcc_relevant(&self) -> bool {
        self.match_kind != MatchKind::None
    }
}
