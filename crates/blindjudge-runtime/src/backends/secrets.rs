//! Judge API keys.
//!
//! A key comes from the backend's `api_key` setting or from an environment
//! variable (the vendor default, or the one named by `api_key_env`). It is
//! held in a [`SecretString`] and only exposed when a request header is
//! built; `Debug` and `Display` never print it.
//!
//! ```ignore
//! let key = ApiCredential::resolve(&config, "OPENAI_API_KEY", "OpenAI-compatible API key")?;
//! request.bearer_auth(key.expose());
//! ```

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

use super::BackendError;

/// Backend setting holding an inline key.
pub const API_KEY_SETTING: &str = "api_key";

/// Backend setting naming the environment variable to read the key from.
pub const API_KEY_ENV_SETTING: &str = "api_key_env";

/// Where a key was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Inline `api_key` in the backend settings
    Config,
    Environment,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CredentialSource::Config => "config",
            CredentialSource::Environment => "environment",
        })
    }
}

/// An API key that cannot be logged by accident.
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    name: &'static str,
}

impl ApiCredential {
    pub fn new(value: impl Into<String>, source: CredentialSource, name: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            name,
        }
    }

    /// Environment variable consulted for this backend's key.
    pub fn env_var<'a>(config: &'a JsonValue, default_env: &'a str) -> &'a str {
        config[API_KEY_ENV_SETTING].as_str().unwrap_or(default_env)
    }

    /// Find the key for a backend. Inline keys win over the environment;
    /// blank values count as missing.
    pub fn resolve(
        config: &JsonValue,
        default_env: &str,
        name: &'static str,
    ) -> Result<Self, BackendError> {
        if let Some(value) = inline_key(config) {
            return Ok(Self::new(value, CredentialSource::Config, name));
        }

        let env_var = Self::env_var(config, default_env);
        match std::env::var(env_var) {
            Ok(value) if !value.trim().is_empty() => {
                Ok(Self::new(value, CredentialSource::Environment, name))
            }
            _ => Err(BackendError::NotConfigured(format!(
                "{} missing: set '{}' in the backend settings or the {} environment variable",
                name, API_KEY_SETTING, env_var
            ))),
        }
    }

    /// Whether [`ApiCredential::resolve`] would find a key.
    pub fn is_available(config: &JsonValue, default_env: &str) -> bool {
        inline_key(config).is_some()
            || std::env::var(Self::env_var(config, default_env))
                .is_ok_and(|value| !value.trim().is_empty())
    }

    /// The raw key, for building a request header.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }
}

fn inline_key(config: &JsonValue) -> Option<&str> {
    config[API_KEY_SETTING]
        .as_str()
        .filter(|value| !value.trim().is_empty())
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, redacted)", self.name, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_never_formatted() {
        let key = "sk-judge-secret-98765";
        let credential = ApiCredential::new(key, CredentialSource::Config, "Judge API key");

        let debug = format!("{:?}", credential);
        assert!(!debug.contains(key));
        assert!(debug.contains("[REDACTED]"));

        let display = credential.to_string();
        assert!(!display.contains(key));
        assert_eq!(display, "Judge API key (config, redacted)");
        assert_eq!(credential.expose(), key);
    }

    #[test]
    fn test_inline_key_wins_over_environment() {
        std::env::set_var("BLINDJUDGE_TEST_KEY_PRIORITY", "env-key");
        let credential = ApiCredential::resolve(
            &json!({"api_key": "inline-key", "api_key_env": "BLINDJUDGE_TEST_KEY_PRIORITY"}),
            "UNUSED",
            "Test key",
        )
        .unwrap();

        assert_eq!(credential.expose(), "inline-key");
        assert_eq!(credential.source(), CredentialSource::Config);
        std::env::remove_var("BLINDJUDGE_TEST_KEY_PRIORITY");
    }

    #[test]
    fn test_default_environment_variable() {
        std::env::set_var("BLINDJUDGE_TEST_KEY_DEFAULT", "env-key");
        let credential =
            ApiCredential::resolve(&json!({}), "BLINDJUDGE_TEST_KEY_DEFAULT", "Test key").unwrap();

        assert_eq!(credential.expose(), "env-key");
        assert_eq!(credential.source(), CredentialSource::Environment);
        std::env::remove_var("BLINDJUDGE_TEST_KEY_DEFAULT");
    }

    #[test]
    fn test_blank_values_are_missing() {
        std::env::set_var("BLINDJUDGE_TEST_KEY_BLANK", "  ");
        let config = json!({"api_key": "", "api_key_env": "BLINDJUDGE_TEST_KEY_BLANK"});

        assert!(!ApiCredential::is_available(&config, "UNUSED"));
        let err = ApiCredential::resolve(&config, "UNUSED", "Test key")
            .unwrap_err()
            .to_string();
        assert!(err.contains("Test key missing"));
        assert!(err.contains("BLINDJUDGE_TEST_KEY_BLANK"));
        std::env::remove_var("BLINDJUDGE_TEST_KEY_BLANK");
    }

    #[test]
    fn test_env_var_override() {
        let config = json!({"api_key_env": "OPENROUTER_API_KEY"});
        assert_eq!(ApiCredential::env_var(&config, "OPENAI_API_KEY"), "OPENROUTER_API_KEY");
        assert_eq!(ApiCredential::env_var(&json!({}), "OPENAI_API_KEY"), "OPENAI_API_KEY");
    }
}
