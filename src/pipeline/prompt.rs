//! Prompt templates for the model-assisted extractor.

/// Truncate on a char boundary at or below `max_chars` bytes.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    if text.len() <= max_chars {
        return text;
    }
    let mut end = max_chars;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Build the extraction prompt. The section text is trimmed to
/// `max_chars` so oversized notes cannot blow the context window.
/// Returns the prompt and whether truncation happened.
pub fn build_extraction_prompt(assessment_plan: &str, max_chars: usize) -> (String, bool) {
    let trimmed = assessment_plan.trim();
    let bounded = truncate_chars(trimmed, max_chars);
    let truncated = bounded.len() < trimmed.len();

    let prompt = format!(
        r#"You are a clinical documentation and ICD-10 coding assistant.

Goal:
Extract medical conditions from the Assessment/Plan text and any explicitly stated ICD-10 codes.

Scope:
- Consider all sections in the provided text (assessment, plan, problem list, numbered items).
- Include only conditions explicitly stated or assessed as present.
- Exclude negated or ruled-out conditions, screening-only items, family history, and tests.

Output format:
Return ONLY a single JSON object with this exact shape:
{{
  "conditions": [
    {{
      "condition": "string",
      "icd10_code": "string",
      "icd10_description": "string",
      "clinical_status": "string (stable|improving|worsening|unchanged|acute|chronic)",
      "severity": "string (mild|moderate|severe|end-stage)",
      "confidence": "high|medium|low"
    }}
  ]
}}

Field guidance:
- condition: short clinical label as written; keep concise (e.g., "Type 2 diabetes").
- icd10_code: only if explicitly provided; preserve exact formatting (including decimals).
- icd10_description: only if explicitly provided alongside the code (e.g., after ":" or "-").
- clinical_status: only if explicitly stated.
- severity: only if explicitly stated.
- confidence: high if explicit, medium if abbreviated/unclear, low if ambiguous.

Rules:
- Use only the provided text; do not infer conditions or codes.
- Merge duplicates: if the same condition appears multiple times, return one entry.
- If a field is unknown, use an empty string "" (never null).
- If no conditions are present, return {{"conditions": []}}.
- Return JSON only. No markdown, no backticks, no extra text.

Assessment/Plan:
"""{bounded}"""
"#
    );

    (prompt, truncated)
}

/// Build the one-shot repair prompt: the malformed output, capped at
/// `max_chars`, with the target shape restated.
pub fn build_repair_prompt(raw_response: &str, max_chars: usize) -> String {
    let bounded = truncate_chars(raw_response.trim(), max_chars);

    format!(
        r#"You repair malformed JSON into valid JSON.
Return ONLY a JSON object matching this schema:
{{
  "conditions": [
    {{
      "condition": "string",
      "icd10_code": "string or null",
      "icd10_description": "string or null",
      "clinical_status": "string or null",
      "severity": "string or null",
      "confidence": "high|medium|low"
    }}
  ]
}}

If you cannot repair, return {{"conditions": []}}.

Raw response:
"""{bounded}"""
"#
    )
}
