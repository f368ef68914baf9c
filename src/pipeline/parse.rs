//! Parsing model responses into condition payloads.
//!
//! The happy path is a clean `{"conditions": [...]}` object. Real
//! responses also arrive as bare arrays, under wrapper keys, with
//! alias field names, or buried in prose — this layer coerces all of
//! those into the same typed payloads and reports whether salvage was
//! needed, so the extractor can decide between accept, repair, and
//! fallback.

use serde_json::Value;

use crate::llm::json_utils::{iter_json_candidates, parse_json_like, strip_code_fence};
use crate::models::{Confidence, ExtractedCondition, ExtractionSource};

/// One condition as the model reported it, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawConditionPayload {
    pub condition: Option<String>,
    pub icd10_code: Option<String>,
    pub icd10_description: Option<String>,
    pub clinical_status: Option<String>,
    pub severity: Option<String>,
    pub confidence: Option<String>,
}

/// Outcome of parsing one model response.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub conditions: Vec<RawConditionPayload>,
    /// True when the response was not directly parseable JSON and a
    /// balanced-candidate salvage pass was needed (or nothing usable
    /// was found at all).
    pub parse_error: bool,
}

impl ParsedResponse {
    /// Invalid means: salvage failed to produce anything. A valid but
    /// empty condition list is NOT invalid.
    pub fn is_invalid(&self) -> bool {
        self.parse_error && self.conditions.is_empty()
    }
}

/// Parse a raw model response into condition payloads.
pub fn parse_llm_response(raw: &str) -> ParsedResponse {
    let text = strip_code_fence(raw.trim());
    if text.is_empty() {
        return ParsedResponse {
            conditions: Vec::new(),
            parse_error: true,
        };
    }

    if let Some(value) = parse_json_like(text) {
        return ParsedResponse {
            conditions: conditions_from_value(&value),
            parse_error: false,
        };
    }

    // The response is not JSON as a whole; scan for balanced
    // candidates buried in surrounding prose.
    for candidate in iter_json_candidates(text) {
        if let Some(value) = parse_json_like(candidate) {
            let conditions = conditions_from_value(&value);
            if !conditions.is_empty() {
                return ParsedResponse {
                    conditions,
                    parse_error: true,
                };
            }
        }
    }

    ParsedResponse {
        conditions: Vec::new(),
        parse_error: true,
    }
}

/// Convert payloads into extracted conditions, backfilling the name
/// from the description or code and dropping items with no name at
/// all.
pub fn conditions_from_payloads(payloads: &[RawConditionPayload]) -> Vec<ExtractedCondition> {
    let mut conditions = Vec::new();
    for item in payloads {
        let name = [&item.condition, &item.icd10_description, &item.icd10_code]
            .into_iter()
            .find_map(|field| {
                field
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            });
        let Some(name) = name else {
            continue;
        };

        conditions.push(ExtractedCondition {
            raw_snippet: name.clone(),
            name,
            icd10_code: nullify(item.icd10_code.as_deref()),
            icd10_description: nullify(item.icd10_description.as_deref()),
            clinical_status: nullify(item.clinical_status.as_deref()),
            severity: nullify(item.severity.as_deref()),
            confidence: item.confidence.as_deref().and_then(Confidence::parse),
            source: ExtractionSource::Model,
        });
    }
    conditions
}

fn nullify(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ═══════════════════════════════════════════
// Shape coercion
// ═══════════════════════════════════════════

fn conditions_from_value(value: &Value) -> Vec<RawConditionPayload> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => match find_conditions_list(map) {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(single @ Value::Object(_)) => vec![single],
            Some(_) | None => {
                // Maybe the object IS one condition.
                if looks_like_condition(map) {
                    vec![value]
                } else {
                    Vec::new()
                }
            }
        },
        _ => Vec::new(),
    };

    items.into_iter().filter_map(coerce_item).collect()
}

/// Locate the condition list inside an object: `conditions` in any
/// case, then the wrapper keys models like to invent.
fn find_conditions_list<'a>(map: &'a serde_json::Map<String, Value>) -> Option<&'a Value> {
    if let Some(value) = map.get("conditions") {
        return Some(value);
    }
    for (key, value) in map {
        if key.eq_ignore_ascii_case("conditions") {
            return Some(value);
        }
    }
    for (key, value) in map {
        if ["items", "results", "data"]
            .iter()
            .any(|k| key.eq_ignore_ascii_case(k))
        {
            return Some(value);
        }
    }
    None
}

fn looks_like_condition(map: &serde_json::Map<String, Value>) -> bool {
    map.keys().any(|key| canonical_key(key).is_some())
}

fn coerce_item(item: &Value) -> Option<RawConditionPayload> {
    match item {
        Value::String(s) => Some(RawConditionPayload {
            condition: Some(s.clone()),
            ..Default::default()
        }),
        Value::Object(map) => {
            let mut payload = RawConditionPayload::default();
            for (key, value) in map {
                let Some(canonical) = canonical_key(key) else {
                    continue;
                };
                // Nested {code, description} objects under the code key
                if canonical == "icd10_code" {
                    if let Value::Object(code_map) = value {
                        if let Some(code) = code_map.get("code").or_else(|| code_map.get("value"))
                        {
                            payload.icd10_code = value_to_string(code);
                        }
                        if payload.icd10_description.is_none() {
                            if let Some(desc) =
                                code_map.get("description").or_else(|| code_map.get("desc"))
                            {
                                payload.icd10_description = value_to_string(desc);
                            }
                        }
                        continue;
                    }
                }
                let text = value_to_string(value);
                match canonical {
                    "condition" => payload.condition = text,
                    "icd10_code" => payload.icd10_code = text,
                    "icd10_description" => {
                        if payload.icd10_description.is_none() {
                            payload.icd10_description = text;
                        }
                    }
                    "clinical_status" => payload.clinical_status = text,
                    "severity" => payload.severity = text,
                    "confidence" => payload.confidence = text,
                    _ => {}
                }
            }
            if payload == RawConditionPayload::default() {
                None
            } else {
                Some(payload)
            }
        }
        _ => None,
    }
}

/// Map reported field names onto the fixed payload shape. Keys are
/// compared with punctuation stripped and case folded, so
/// `"ICD-10 Code"` and `icd10_code` land in the same slot.
fn canonical_key(key: &str) -> Option<&'static str> {
    let cleaned: String = key
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    match cleaned.as_str() {
        "condition" | "conditionname" | "name" | "diagnosis" | "dx" | "problem"
        | "problemname" => Some("condition"),
        "icd10" | "icd10code" | "icd10cm" | "code" => Some("icd10_code"),
        "icd10description" | "icd10desc" | "description" | "desc" => Some("icd10_description"),
        "clinicalstatus" | "status" => Some("clinical_status"),
        "severity" => Some("severity"),
        "confidence" => Some("confidence"),
        _ => None,
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => return None,
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
