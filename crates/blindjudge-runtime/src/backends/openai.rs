//! OpenAI-compatible chat completions backend.
//!
//! Works against OpenAI and gateways with the same wire format (OpenRouter,
//! local servers). With an output schema and `structured_output` enabled,
//! the request asks for strict `json_schema` output and a JSON reply is
//! returned as [`BackendOutput::Structured`].

use super::{
    api_error_message, check_setting_types, factory::BackendFactory, http_client, http_settings, retry_after,
    secrets::ApiCredential, transport_error, BackendCapabilities, BackendError, GenerateRequest,
    GenerateResponse, JudgeBackend, TokenUsage,
};
use async_trait::async_trait;
use blindjudge_core::{strict_schema, BackendOutput};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;

/// Environment variable name for OpenAI API key.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// OpenAI-compatible backend.
pub struct OpenAiBackend {
    credential: ApiCredential,
    base_url: String,
    model: String,
    timeout: Duration,
    capabilities: BackendCapabilities,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiBackend {
    /// Create from JSON configuration, falling back to `OPENAI_API_KEY`
    /// (or the variable named by `api_key_env`).
    pub fn from_config(config: &JsonValue) -> Result<Self, BackendError> {
        let credential =
            ApiCredential::resolve(config, OPENAI_API_KEY_ENV, "OpenAI-compatible API key")?;
        let (base_url, timeout) = http_settings(config, DEFAULT_BASE_URL)?;
        tracing::debug!(
            backend = "openai",
            base_url = %base_url,
            key_source = %credential.source(),
            "Creating backend"
        );

        Ok(Self {
            credential,
            base_url,
            model: config["model"].as_str().unwrap_or(DEFAULT_MODEL).to_string(),
            timeout,
            capabilities: BackendCapabilities {
                structured_output: config["structured_output"].as_bool().unwrap_or(true),
                repair_round_trip: config["repair"].as_bool().unwrap_or(false),
            },
            client: http_client(timeout)?,
        })
    }

    fn request_body<'a>(&'a self, request: &'a GenerateRequest) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system_prompt.as_deref() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        let response_format = match (&request.output_schema, self.capabilities.structured_output) {
            (Some(schema), true) => Some(json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "judgment",
                    "schema": strict_schema(schema),
                    "strict": true
                }
            })),
            _ => None,
        };

        ChatRequest {
            model: &self.model,
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<JsonValue>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// Structured when a schema was requested and the content is a JSON object.
fn classify_content(content: String, structured: bool) -> BackendOutput {
    if structured {
        if let Ok(value @ JsonValue::Object(_)) = serde_json::from_str::<JsonValue>(&content) {
            return BackendOutput::Structured(value);
        }
    }
    BackendOutput::Text(content)
}

#[async_trait]
impl JudgeBackend for OpenAiBackend {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, BackendError> {
        let body = self.request_body(request);
        let structured = body.response_format.is_some();

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.credential.expose())
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

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(BackendError::EmptyResponse)?;

        let usage = body
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(GenerateResponse {
            output: classify_content(content, structured),
            usage,
            model: if body.model.is_empty() {
                self.model.clone()
            } else {
                body.model
            },
        })
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }
}

/// Factory for OpenAI-compatible backends.
///
/// ## Configuration Format
/// ```json
/// {
///   "api_key": "sk-...",                  // Optional, falls back to OPENAI_API_KEY
///   "api_key_env": "OPENROUTER_API_KEY",  // Optional, overrides the fallback variable
///   "base_url": "https://openrouter.ai/api/v1",
///   "model": "gpt-4o-mini",
///   "structured_output": true,            // Optional, strict json_schema replies
///   "repair": false,                      // Optional, one repair call per attempt
///   "timeout": "120s"
/// }
/// ```
pub struct OpenAiBackendFactory;

impl BackendFactory for OpenAiBackendFactory {
    fn backend_type(&self) -> &'static str {
        "openai"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn JudgeBackend>, BackendError> {
        Ok(Arc::new(OpenAiBackend::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), BackendError> {
        check_setting_types(config, &[], &["structured_output"])?;
        let env_var = ApiCredential::env_var(config, OPENAI_API_KEY_ENV);
        if !ApiCredential::is_available(config, OPENAI_API_KEY_ENV) {
            return Err(BackendError::NotConfigured(format!(
                "API key required: set 'api_key' in config or {} env",
                env_var
            )));
        }
        http_settings(config, DEFAULT_BASE_URL).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(config: JsonValue) -> OpenAiBackend {
        OpenAiBackend::from_config(&config).unwrap()
    }

    fn request(schema: Option<JsonValue>) -> GenerateRequest {
        GenerateRequest {
            prompt: "Judge these".to_string(),
            system_prompt: Some("You are a judge".to_string()),
            output_schema: schema,
            temperature: 0.3,
            max_tokens: 2048,
        }
    }

    #[test]
    fn test_schema_sent_in_strict_mode() {
        let b = backend(json!({"api_key": "k"}));
        let schema = json!({"type": "object", "properties": {"x": {"type": "string"}}});
        let req = request(Some(schema));
        let value = serde_json::to_value(b.request_body(&req)).unwrap();

        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "Judge these");
        assert_eq!(value["response_format"]["type"], "json_schema");
        assert_eq!(value["response_format"]["json_schema"]["strict"], true);
        assert_eq!(
            value["response_format"]["json_schema"]["schema"]["additionalProperties"],
            false
        );
    }

    #[test]
    fn test_schema_omitted_without_structured_output() {
        let b = backend(json!({"api_key": "k", "structured_output": false}));
        let req = request(Some(json!({"type": "object"})));
        let value = serde_json::to_value(b.request_body(&req)).unwrap();
        assert!(value.get("response_format").is_none());
        assert!(!b.capabilities().structured_output);
    }

    #[test]
    fn test_classify_content() {
        assert!(matches!(
            classify_content(r#"{"ranking": []}"#.to_string(), true),
            BackendOutput::Structured(_)
        ));
        assert!(matches!(
            classify_content(r#"{"ranking": []}"#.to_string(), false),
            BackendOutput::Text(_)
        ));
        assert!(matches!(
            classify_content("```json\n{}\n```".to_string(), true),
            BackendOutput::Text(_)
        ));
    }

    #[test]
    fn test_api_key_env_override() {
        std::env::set_var("BLINDJUDGE_TEST_OPENROUTER_KEY", "or-key");
        let b = backend(json!({
            "api_key_env": "BLINDJUDGE_TEST_OPENROUTER_KEY",
            "base_url": "https://openrouter.ai/api/v1"
        }));
        assert_eq!(b.credential.expose(), "or-key");
        assert_eq!(b.base_url, "https://openrouter.ai/api/v1");
        std::env::remove_var("BLINDJUDGE_TEST_OPENROUTER_KEY");
    }

    #[test]
    fn test_factory_rejects_non_boolean_structured_output() {
        let config = json!({"api_key": "k", "structured_output": "yes"});
        let err = OpenAiBackendFactory.validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("structured_output"));
    }

    #[test]
    fn test_factory_reports_missing_key() {
        let config = json!({"api_key_env": "BLINDJUDGE_TEST_MISSING_KEY"});
        let err = OpenAiBackendFactory.validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("BLINDJUDGE_TEST_MISSING_KEY"));
    }
}
