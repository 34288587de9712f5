//! Anthropic Claude backend (Messages API).
//!
//! Replies are plain text; the output schema is carried by the prompt and
//! recovered by the parser.

use super::{
    api_error_message, factory::BackendFactory, http_client, http_settings, retry_after,
    secrets::ApiCredential, transport_error, BackendCapabilities, BackendError, GenerateRequest,
    GenerateResponse, JudgeBackend, TokenUsage,
};
use async_trait::async_trait;
use blindjudge_core::BackendOutput;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable name for Anthropic API key.
pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const API_VERSION: &str = "2023-06-01";

/// Anthropic Claude backend.
pub struct AnthropicBackend {
    credential: ApiCredential,
    base_url: String,
    model: String,
    timeout: Duration,
    repair_round_trip: bool,
    client: reqwest::Client,
}

impl std::fmt::Debug for AnthropicBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicBackend")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl AnthropicBackend {
    /// Create from JSON configuration, falling back to `ANTHROPIC_API_KEY`.
    pub fn from_config(config: &JsonValue) -> Result<Self, BackendError> {
        let credential =
            ApiCredential::resolve(config, ANTHROPIC_API_KEY_ENV, "Anthropic API key")?;
        let (base_url, timeout) = http_settings(config, DEFAULT_BASE_URL)?;
        tracing::debug!(
            backend = "anthropic",
            base_url = %base_url,
            key_source = %credential.source(),
            "Creating backend"
        );

        Ok(Self {
            credential,
            base_url,
            model: config["model"].as_str().unwrap_or(DEFAULT_MODEL).to_string(),
            timeout,
            repair_round_trip: config["repair"].as_bool().unwrap_or(false),
            client: http_client(timeout)?,
        })
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    model: String,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[async_trait]
impl JudgeBackend for AnthropicBackend {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, BackendError> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            system: request.system_prompt.as_deref(),
            messages: vec![Message {
                role: "user",
                content: &request.prompt,
            }],
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", self.credential.expose())
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(BackendError::RateLimited {
                retry_after: retry_after(&response),
            });
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(BackendError::Auth);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BackendError::Api {
                status: status.as_u16(),
                message: api_error_message(&text),
            });
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;

        let text: String = body.content.into_iter().filter_map(|b| b.text).collect();
        if text.trim().is_empty() {
            return Err(BackendError::EmptyResponse);
        }

        Ok(GenerateResponse {
            output: BackendOutput::Text(text),
            usage: TokenUsage {
                prompt_tokens: body.usage.input_tokens,
                completion_tokens: body.usage.output_tokens,
            },
            model: body.model,
        })
    }

    fn name(&self) -> &str {
        "anthropic"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            structured_output: false,
            repair_round_trip: self.repair_round_trip,
        }
    }
}

/// Factory for Anthropic backends.
///
/// ## Configuration Format
/// ```json
/// {
///   "api_key": "sk-ant-...",      // Optional, falls back to ANTHROPIC_API_KEY
///   "api_key_env": "MY_KEY_VAR",  // Optional, overrides the fallback variable
///   "base_url": "https://...",    // Optional
///   "model": "claude-sonnet-4-5", // Optional
///   "timeout": "120s",            // Optional, humantime
///   "repair": false               // Optional, one repair call per attempt
/// }
/// ```
pub struct AnthropicBackendFactory;

impl BackendFactory for AnthropicBackendFactory {
    fn backend_type(&self) -> &'static str {
        "anthropic"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn JudgeBackend>, BackendError> {
        Ok(Arc::new(AnthropicBackend::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), BackendError> {
        let env_var = ApiCredential::env_var(config, ANTHROPIC_API_KEY_ENV);
        if !ApiCredential::is_available(config, ANTHROPIC_API_KEY_ENV) {
            return Err(BackendError::NotConfigured(format!(
                "Anthropic API key required: set 'api_key' in config or {} env",
                env_var
            )));
        }
        http_settings(config, DEFAULT_BASE_URL).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::CredentialSource;

    #[test]
    fn test_factory_create_with_api_key() {
        let factory = AnthropicBackendFactory;
        assert_eq!(factory.backend_type(), "anthropic");

        let backend = factory
            .create(&serde_json::json!({"api_key": "test-api-key"}))
            .unwrap();
        assert_eq!(backend.name(), "anthropic");
        assert!(!backend.capabilities().structured_output);
    }

    #[test]
    fn test_from_config_fields() {
        let config = serde_json::json!({
            "api_key": "config-api-key",
            "base_url": "https://custom.api.com/v1",
            "model": "claude-haiku-4-5",
            "repair": true
        });

        let backend = AnthropicBackend::from_config(&config).unwrap();
        assert_eq!(backend.base_url, "https://custom.api.com/v1");
        assert_eq!(backend.model, "claude-haiku-4-5");
        assert_eq!(backend.credential.source(), CredentialSource::Config);
        assert!(backend.capabilities().repair_round_trip);
    }

    #[test]
    fn test_factory_validate_invalid_base_url() {
        let config = serde_json::json!({"api_key": "k", "base_url": "invalid-url"});
        assert!(AnthropicBackendFactory.validate_config(&config).is_err());
    }

    #[test]
    fn test_api_key_not_in_debug_output() {
        let secret_key = "sk-ant-REDACTED";
        let backend = AnthropicBackend::from_config(&serde_json::json!({"api_key": secret_key}))
            .unwrap();

        let debug_output = format!("{:?}", backend);
        assert!(!debug_output.contains(secret_key), "API key was exposed in Debug output!");
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn test_request_body_shape() {
        let body = MessagesRequest {
            model: "claude-sonnet-4-5",
            max_tokens: 2048,
            system: Some("judge"),
            messages: vec![Message {
                role: "user",
                content: "Question",
            }],
            temperature: 0.3,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["system"], "judge");
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["max_tokens"], 2048);
    }
}
