//! Judge backend abstractions.
//!
//! A backend turns one prompt into one model reply. Vendor backends live
//! behind cargo features (`anthropic`, `openai`) and are created from JSON
//! configuration through the [`BackendRegistry`].
//!
//! ## Security
//!
//! All backends use the [`secrets`] module for credential handling.

use async_trait::async_trait;
use blindjudge_core::BackendOutput;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;
use thiserror::Error;

mod factory;
pub mod secrets;

#[cfg(feature = "anthropic")]
mod anthropic;

#[cfg(feature = "openai")]
mod openai;

pub use factory::{BackendFactory, BackendRegistry};
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicBackend, AnthropicBackendFactory};

#[cfg(feature = "openai")]
pub use openai::{OpenAiBackend, OpenAiBackendFactory};

/// Default request timeout for HTTP backends.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors from judge backends.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Could not decode backend response: {0}")]
    Decode(String),

    #[error("Authentication failed")]
    Auth,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Backend returned an empty response")]
    EmptyResponse,

    #[error("Backend not configured: {0}")]
    NotConfigured(String),
}

/// One judging request.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,

    /// JSON Schema the reply must follow; only sent to backends with
    /// structured output
    pub output_schema: Option<JsonValue>,

    pub temperature: f32,
    pub max_tokens: u32,
}

/// A backend's reply.
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub output: BackendOutput,
    pub usage: TokenUsage,

    /// Model that actually answered
    pub model: String,
}

/// Token usage from one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    /// Total tokens used.
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// What a backend can do beyond plain text generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// Accepts an output schema and returns structured JSON
    pub structured_output: bool,

    /// Benefits from one repair call after an invalid reply
    pub repair_round_trip: bool,
}

/// Backend abstraction; the only place judge models are called.
#[async_trait]
pub trait JudgeBackend: Send + Sync {
    /// Generate one reply.
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, BackendError>;

    /// Backend name for logs.
    fn name(&self) -> &str;

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }
}

/// Reject settings present with the wrong JSON type.
///
/// Absent keys are fine; every backend setting is optional.
pub(crate) fn check_setting_types(
    config: &JsonValue,
    strings: &[&str],
    flags: &[&str],
) -> Result<(), BackendError> {
    let wrong = |key: &str, expected: &str| {
        BackendError::NotConfigured(format!("setting '{}' must be a {}", key, expected))
    };
    for &key in strings {
        if config.get(key).is_some_and(|v| !v.is_string()) {
            return Err(wrong(key, "string"));
        }
    }
    for &key in flags {
        if config.get(key).is_some_and(|v| !v.is_boolean()) {
            return Err(wrong(key, "boolean"));
        }
    }
    Ok(())
}

/// Pull a readable message out of an error body.
///
/// Both vendors wrap errors as `{"error": {"message": ...}}`; anything else
/// is returned truncated.
#[cfg(any(feature = "anthropic", feature = "openai"))]
pub(crate) fn api_error_message(body: &str) -> String {
    serde_json::from_str::<JsonValue>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.chars().take(500).collect())
}

/// Parse a `retry-after` header given in whole seconds.
#[cfg(any(feature = "anthropic", feature = "openai"))]
pub(crate) fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Read `timeout` (humantime string) and `base_url` from backend config.
#[cfg(any(feature = "anthropic", feature = "openai"))]
pub(crate) fn http_settings(
    config: &JsonValue,
    default_base_url: &str,
) -> Result<(String, Duration), BackendError> {
    let base_url = config["base_url"]
        .as_str()
        .unwrap_or(default_base_url)
        .trim_end_matches('/')
        .to_string();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(BackendError::NotConfigured(
            "base_url must start with http:// or https://".to_string(),
        ));
    }

    let timeout = match config["timeout"].as_str() {
        Some(text) => humantime::parse_duration(text)
            .map_err(|e| BackendError::NotConfigured(format!("invalid timeout '{}': {}", text, e)))?,
        None => DEFAULT_TIMEOUT,
    };

    Ok((base_url, timeout))
}

/// Build the shared HTTP client for a backend.
#[cfg(any(feature = "anthropic", feature = "openai"))]
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, BackendError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| BackendError::Http(format!("failed to build HTTP client: {}", e)))
}

/// Map a transport error, keeping timeouts distinct.
#[cfg(any(feature = "anthropic", feature = "openai"))]
pub(crate) fn transport_error(error: reqwest::Error, timeout: Duration) -> BackendError {
    if error.is_timeout() {
        BackendError::Timeout(timeout)
    } else {
        BackendError::Http(error.to_string())
    }
}
