//! HTTP client for the hosted model service.
//!
//! Blocking reqwest against a generateContent-style JSON endpoint.
//! Transport failures (connect, timeout, 429, 5xx) are retried with
//! exponential backoff up to `max_attempts`; anything surviving that
//! is reported to the extractor, which treats it like invalid output
//! and falls back to rules.

use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::LlmError;
use crate::config::LlmConfig;

/// Model service abstraction (allows mocking).
pub trait LlmClient: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Base delay for the backoff schedule: 1s, 2s, 4s, ... capped at 10s.
const BACKOFF_BASE_MS: u64 = 1000;
const BACKOFF_CAP_MS: u64 = 10_000;

/// Client for a hosted generateContent endpoint.
pub struct HostedLlmClient {
    config: LlmConfig,
    client: reqwest::blocking::Client,
    response_schema: Option<serde_json::Value>,
}

impl HostedLlmClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::HttpClient(e.to_string()))?;

        Ok(Self {
            config,
            client,
            response_schema: None,
        })
    }

    /// Request schema-constrained JSON output. The schema rides in
    /// `generationConfig.responseSchema` together with
    /// `responseMimeType: application/json`.
    pub fn with_response_schema(mut self, schema: serde_json::Value) -> Self {
        self.response_schema = Some(schema);
        self
    }

    /// The fixed shape the extraction prompt asks for, as a service
    /// response schema.
    pub fn conditions_response_schema() -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "conditions": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "condition": {"type": "string"},
                            "icd10_code": {"type": "string"},
                            "icd10_description": {"type": "string"},
                            "clinical_status": {"type": "string"},
                            "severity": {"type": "string"},
                            "confidence": {"type": "string"}
                        },
                        "required": ["condition"]
                    }
                }
            },
            "required": ["conditions"]
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    fn build_request(&self, prompt: &str) -> GenerateRequest {
        let generation_config = GenerationConfig {
            temperature: self.config.temperature,
            max_output_tokens: self.config.max_output_tokens,
            response_mime_type: self
                .response_schema
                .as_ref()
                .map(|_| "application/json".to_string()),
            response_schema: self.response_schema.clone(),
        };
        GenerateRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config,
        }
    }

    fn send_once(&self, prompt: &str) -> Result<String, LlmError> {
        let mut request = self.client.post(self.endpoint()).json(&self.build_request(prompt));
        if let Some(key) = &self.config.api_key {
            request = request.header("x-goog-api-key", key);
        }

        let response = request.send().map_err(|e| {
            if e.is_connect() {
                LlmError::Connection(self.config.base_url.clone())
            } else if e.is_timeout() {
                LlmError::Timeout(self.config.timeout_secs)
            } else {
                LlmError::HttpClient(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::Service {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .map_err(|e| LlmError::ResponseParsing(e.to_string()))?;

        Ok(parsed.text())
    }
}

fn is_retryable(error: &LlmError) -> bool {
    match error {
        LlmError::Connection(_) | LlmError::Timeout(_) => true,
        LlmError::Service { status, .. } => *status == 429 || *status >= 500,
        _ => false,
    }
}

impl LlmClient for HostedLlmClient {
    fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut delay_ms = BACKOFF_BASE_MS;

        for attempt in 1..=max_attempts {
            match self.send_once(prompt) {
                Ok(text) => return Ok(text),
                Err(e) if is_retryable(&e) && attempt < max_attempts => {
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        error = %e,
                        "Model request failed, backing off"
                    );
                    std::thread::sleep(Duration::from_millis(delay_ms));
                    delay_ms = (delay_ms * 2).min(BACKOFF_CAP_MS);
                }
                Err(e) if is_retryable(&e) => {
                    return Err(LlmError::RetriesExhausted {
                        attempts: max_attempts,
                        last_error: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!("retry loop returns on the final attempt")
    }
}

// ═══════════════════════════════════════════
// Wire types
// ═══════════════════════════════════════════

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f64,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    #[serde(rename = "responseMimeType", skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(rename = "responseSchema", skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate; empty when the
    /// service returned no candidates.
    fn text(&self) -> String {
        self.candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

// ═══════════════════════════════════════════
// Test doubles
// ═══════════════════════════════════════════

/// Mock client returning one configurable response.
pub struct MockLlmClient {
    response: Result<String, String>,
}

impl MockLlmClient {
    pub fn new(response: &str) -> Self {
        Self {
            response: Ok(response.to_string()),
        }
    }

    /// A mock whose every call fails like an exhausted transport.
    pub fn failing(message: &str) -> Self {
        Self {
            response: Err(message.to_string()),
        }
    }
}

impl LlmClient for MockLlmClient {
    fn generate(&self, _prompt: &str) -> Result<String, LlmError> {
        match &self.response {
            Ok(text) => Ok(text.clone()),
            Err(message) => Err(LlmError::RetriesExhausted {
                attempts: 3,
                last_error: message.clone(),
            }),
        }
    }
}

/// Mock client replaying a scripted sequence of responses — one per
/// call, in order. Used to exercise the repair path (invalid first
/// response, then a second one for the repair request).
pub struct ScriptedLlmClient {
    responses: Mutex<Vec<Result<String, String>>>,
    prompts_seen: Mutex<Vec<String>>,
}

impl ScriptedLlmClient {
    pub fn new(responses: Vec<Result<String, String>>) -> Self {
        let mut reversed = responses;
        reversed.reverse();
        Self {
            responses: Mutex::new(reversed),
            prompts_seen: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far, in call order.
    pub fn prompts_seen(&self) -> Vec<String> {
        self.prompts_seen.lock().unwrap().clone()
    }
}

impl LlmClient for ScriptedLlmClient {
    fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        self.prompts_seen.lock().unwrap().push(prompt.to_string());
        match self.responses.lock().unwrap().pop() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(LlmError::RetriesExhausted {
                attempts: 3,
                last_error: message,
            }),
            None => Err(LlmError::HttpClient("script exhausted".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_client_returns_configured_response() {
        let client = MockLlmClient::new("{\"conditions\": []}");
        assert_eq!(client.generate("prompt").unwrap(), "{\"conditions\": []}");
    }

    #[test]
    fn failing_mock_reports_exhausted_retries() {
        let client = MockLlmClient::failing("connection refused");
        let err = client.generate("prompt").unwrap_err();
        assert!(matches!(err, LlmError::RetriesExhausted { attempts: 3, .. }));
    }

    #[test]
    fn scripted_client_replays_in_order() {
        let client = ScriptedLlmClient::new(vec![
            Ok("first".to_string()),
            Ok("second".to_string()),
        ]);
        assert_eq!(client.generate("a").unwrap(), "first");
        assert_eq!(client.generate("b").unwrap(), "second");
        assert!(client.generate("c").is_err());
        assert_eq!(client.prompts_seen().len(), 3);
    }

    #[test]
    fn endpoint_joins_base_and_model() {
        let mut config = LlmConfig::default();
        config.base_url = "http://svc:9000/".to_string();
        config.model = "gemini-2.5-flash".to_string();
        let client = HostedLlmClient::new(config).unwrap();
        assert_eq!(
            client.endpoint(),
            "http://svc:9000/v1/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn request_carries_schema_only_when_configured() {
        let client = HostedLlmClient::new(LlmConfig::default()).unwrap();
        let body = serde_json::to_value(client.build_request("hello")).unwrap();
        assert!(body["generationConfig"].get("responseSchema").is_none());

        let client = client.with_response_schema(HostedLlmClient::conditions_response_schema());
        let body = serde_json::to_value(client.build_request("hello")).unwrap();
        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            "application/json"
        );
        assert!(body["generationConfig"]["responseSchema"].is_object());
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
    }

    #[test]
    fn response_text_concatenates_parts() {
        let raw = r#"{"candidates": [{"content": {"parts": [{"text": "{\"conditions\""}, {"text": ": []}"}]}}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.text(), "{\"conditions\": []}");
    }

    #[test]
    fn empty_candidates_yield_empty_text() {
        let parsed: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.text(), "");
    }

    #[test]
    fn retryable_classification() {
        assert!(is_retryable(&LlmError::Connection("x".into())));
        assert!(is_retryable(&LlmError::Timeout(60)));
        assert!(is_retryable(&LlmError::Service {
            status: 503,
            body: String::new()
        }));
        assert!(is_retryable(&LlmError::Service {
            status: 429,
            body: String::new()
        }));
        assert!(!is_retryable(&LlmError::Service {
            status: 400,
            body: String::new()
        }));
        assert!(!is_retryable(&LlmError::ResponseParsing("bad".into())));
    }
}
