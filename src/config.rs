//! Pipeline configuration.
//!
//! All knobs travel as one immutable value into the batch entry point —
//! nothing is read from ambient globals on the hot path, so tests can
//! run differently-configured pipelines side by side. `from_env()`
//! exists for binaries that want the environment surface.

use serde::{Deserialize, Serialize};

use crate::pipeline::error::PipelineError;

/// Connection settings for the hosted language-model service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the generateContent-style endpoint.
    pub base_url: String,
    /// Model identifier sent with every request.
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Decoding temperature; 0.0 keeps output as deterministic as the
    /// service allows.
    pub temperature: f64,
    pub max_output_tokens: u32,
    /// Per-request timeout. A timed-out call counts as a retryable
    /// failure, never a hung worker.
    pub timeout_secs: u64,
    /// Total attempts per request (first try + retries).
    pub max_attempts: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8600".to_string(),
            model: "gemini-2.5-flash".to_string(),
            api_key: None,
            temperature: 0.0,
            max_output_tokens: 1024,
            timeout_secs: 60,
            max_attempts: 3,
        }
    }
}

impl LlmConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("LLM_BASE_URL").unwrap_or(defaults.base_url),
            model: std::env::var("LLM_MODEL_NAME").unwrap_or(defaults.model),
            api_key: std::env::var("LLM_API_KEY").ok().filter(|k| !k.is_empty()),
            temperature: parse_env("LLM_TEMPERATURE", defaults.temperature),
            max_output_tokens: parse_env("LLM_MAX_OUTPUT_TOKENS", defaults.max_output_tokens),
            timeout_secs: parse_env("LLM_TIMEOUT_SECS", defaults.timeout_secs),
            max_attempts: parse_env("LLM_MAX_ATTEMPTS", defaults.max_attempts),
        }
    }
}

/// Configuration for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Use the model-assisted extractor (falls back to rules on
    /// failure). When false the rule-based extractor runs alone.
    pub use_llm: bool,
    /// Ask the service for schema-constrained JSON output.
    pub use_structured_output: bool,
    /// Allow one repair round for malformed model output.
    pub enable_repair: bool,
    /// Cap on the malformed-output excerpt sent with a repair request.
    pub repair_max_chars: usize,
    /// Cap on the section text rendered into the extraction prompt.
    pub max_prompt_chars: usize,
    /// Enable the fuzzy description scan when exact lookup misses.
    pub fuzzy_enabled: bool,
    /// Closed lower bound: a score exactly equal to the threshold
    /// matches.
    pub fuzzy_threshold: f64,
    /// Concurrent workers; 1 means serial. The pool size is the sole
    /// throttle on concurrent model calls.
    pub worker_count: usize,
    pub llm: LlmConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            use_llm: true,
            use_structured_output: true,
            enable_repair: true,
            repair_max_chars: 6000,
            max_prompt_chars: 6000,
            fuzzy_enabled: true,
            fuzzy_threshold: 0.92,
            worker_count: 1,
            llm: LlmConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            use_llm: parse_bool_env("USE_LLM", defaults.use_llm),
            use_structured_output: parse_bool_env(
                "LLM_USE_RESPONSE_SCHEMA",
                defaults.use_structured_output,
            ),
            enable_repair: parse_bool_env("LLM_ENABLE_REPAIR", defaults.enable_repair),
            repair_max_chars: parse_env("LLM_REPAIR_MAX_CHARS", defaults.repair_max_chars),
            max_prompt_chars: parse_env("LLM_MAX_PROMPT_CHARS", defaults.max_prompt_chars),
            fuzzy_enabled: parse_bool_env("HCC_ENABLE_FUZZY_MATCH", defaults.fuzzy_enabled),
            fuzzy_threshold: parse_env("HCC_FUZZY_MATCH_THRESHOLD", defaults.fuzzy_threshold),
            worker_count: parse_env("PIPELINE_MAX_WORKERS", defaults.worker_count),
            llm: LlmConfig::from_env(),
        }
    }

    /// Startup validation. Failures abort before any note is
    /// processed.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(0.0..=1.0).contains(&self.fuzzy_threshold) {
            return Err(PipelineError::Config(format!(
                "fuzzy_threshold must be within [0, 1], got {}",
                self.fuzzy_threshold
            )));
        }
        if self.worker_count < 1 {
            return Err(PipelineError::Config(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.repair_max_chars == 0 {
            return Err(PipelineError::Config(
                "repair_max_chars must be positive".to_string(),
            ));
        }
        if self.max_prompt_chars == 0 {
            return Err(PipelineError::Config(
                "max_prompt_chars must be positive".to_string(),
            ));
        }
        if self.use_llm && self.llm.model.trim().is_empty() {
            return Err(PipelineError::Config(
                "llm.model must be set when use_llm is enabled".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Parse truthy/falsy env values: `0`, `false`, `no`, `off` (any
/// case) are false; everything else set is true.
fn parse_bool_env(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(value) => {
            let lowered = value.trim().to_ascii_lowercase();
            !matches!(lowered.as_str(), "0" | "false" | "no" | "off")
        }
        Err(_) => default,
    }
}
