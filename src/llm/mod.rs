//! Hosted language-model service client.
//!
//! The pipeline only requires "prompt in, structured or free text
//! out"; everything service-specific lives behind the `LlmClient`
//! trait so extraction logic can be tested against mocks.

pub mod client;
pub mod json_utils;

pub use client::{HostedLlmClient, LlmClient, MockLlmClient, ScriptedLlmClient};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Cannot reach model service at {0}")]
    Connection(String),

    #[error("Model request timed out after {0}s")]
    Timeout(u64),

    #[error("Model service returned error (status {status}): {body}")]
    Service { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("Model service gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}
