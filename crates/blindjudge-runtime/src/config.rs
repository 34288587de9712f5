//! Judging configuration.
//!
//! Loaded from YAML:
//!
//! ```yaml
//! judges:
//!   primary: [claude_fast, gpt_fast]
//!   additional: [gemini_flash]
//! judging:
//!   shuffle_seed: 42
//!   seed_scope: task
//!   workers: 8
//!   retries: 4
//!   retry_delay: 1s
//!   backoff: fixed
//!   hint_mode: none
//!   temperature: 0.3
//!   max_tokens: 2048
//! backends:
//!   claude_fast:
//!     type: anthropic
//!     model: claude-haiku-4-5
//!   gemini_flash:
//!     type: openai
//!     base_url: https://openrouter.ai/api/v1
//!     api_key_env: OPENROUTER_API_KEY
//!     model: google/gemini-2.5-flash
//!     repair: true
//! ```

use blindjudge_core::SeedScope;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::prompts::HintMode;
use crate::resilience::{Backoff, BackoffKind, RetryPolicy};

/// Configuration errors. Never retried; they abort setup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Judge '{0}' has no backend configuration")]
    UnknownJudge(String),

    #[error("Judge '{0}' is listed more than once")]
    DuplicateJudge(String),

    #[error("Backend for judge '{judge}' could not be created: {source}")]
    Backend {
        judge: String,
        #[source]
        source: crate::backends::BackendError,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Full configuration for a judging run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgingConfig {
    pub judges: JudgesConfig,
    pub judging: JudgingSettings,

    /// Backend settings keyed by judge id
    pub backends: BTreeMap<String, BackendConfig>,
}

/// Judge ids, in the order tasks are enumerated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgesConfig {
    pub primary: Vec<String>,
    pub additional: Vec<String>,
}

impl JudgesConfig {
    /// Primary judges followed by additional judges.
    pub fn all(&self) -> Vec<String> {
        self.primary
            .iter()
            .chain(self.additional.iter())
            .cloned()
            .collect()
    }
}

/// Run-wide judging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgingSettings {
    /// Run seed; `null` shuffles from entropy
    pub shuffle_seed: Option<u64>,

    pub seed_scope: SeedScope,

    /// Maximum tasks in flight
    pub workers: usize,

    /// Total attempts per task
    pub retries: u32,

    #[serde(with = "duration_human")]
    pub retry_delay: Duration,

    pub backoff: BackoffKind,

    /// Growth factor for exponential backoff
    pub backoff_factor: f32,

    /// Cap for exponential backoff
    #[serde(with = "duration_human")]
    pub max_retry_delay: Duration,

    pub hint_mode: HintMode,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for JudgingSettings {
    fn default() -> Self {
        Self {
            shuffle_seed: Some(42),
            seed_scope: SeedScope::Task,
            workers: 8,
            retries: 4,
            retry_delay: Duration::from_secs(1),
            backoff: BackoffKind::Fixed,
            backoff_factor: 2.0,
            max_retry_delay: Duration::from_secs(60),
            hint_mode: HintMode::None,
            temperature: 0.3,
            max_tokens: 2048,
        }
    }
}

impl JudgingSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        let backoff = match self.backoff {
            BackoffKind::Fixed => Backoff::Fixed,
            BackoffKind::Exponential => Backoff::Exponential {
                factor: self.backoff_factor,
                max_delay: self.max_retry_delay,
            },
        };
        RetryPolicy::new(self.retries, self.retry_delay).with_backoff(backoff)
    }
}

/// One judge's backend settings.
///
/// Keys other than `type`, `vendor` and `temperature` are handed to the
/// backend factory unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(rename = "type")]
    pub backend_type: String,

    /// Vendor for hint modes; defaults to the judge id prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,

    /// Per-judge temperature override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(flatten)]
    pub settings: Map<String, JsonValue>,
}

impl BackendConfig {
    /// Factory configuration as a JSON object.
    pub fn factory_config(&self) -> JsonValue {
        JsonValue::Object(self.settings.clone())
    }
}

impl JudgingConfig {
    /// Parse and validate.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config = Self::parse_yaml(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse without validating; call [`JudgingConfig::validate`] once
    /// overrides are applied.
    pub fn parse_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn read_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_yaml(&content)
    }

    /// Check ranges and that every listed judge has a backend.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let settings = &self.judging;
        if settings.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if settings.retries == 0 {
            return Err(ConfigError::Invalid("retries must be at least 1".into()));
        }
        if !(0.0..=2.0).contains(&settings.temperature) {
            return Err(ConfigError::Invalid(format!(
                "temperature {} outside [0, 2]",
                settings.temperature
            )));
        }
        if settings.backoff == BackoffKind::Exponential && settings.backoff_factor < 1.0 {
            return Err(ConfigError::Invalid("backoff_factor must be at least 1".into()));
        }

        let mut seen = std::collections::BTreeSet::new();
        for judge in self.judges.all() {
            if !self.backends.contains_key(&judge) {
                return Err(ConfigError::UnknownJudge(judge));
            }
            if !seen.insert(judge.clone()) {
                return Err(ConfigError::DuplicateJudge(judge));
            }
        }
        Ok(())
    }
}

mod duration_human {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
judges:
  primary: [claude_fast, gpt_fast]
  additional: [gemini_flash]
judging:
  workers: 4
  retry_delay: 500ms
  backoff: exponential
  max_retry_delay: 10s
  hint_mode: self
backends:
  claude_fast:
    type: anthropic
    model: claude-haiku-4-5
  gpt_fast:
    type: openai
    model: gpt-4o-mini
    temperature: 0.0
  gemini_flash:
    type: openai
    vendor: gemini
    base_url: https://openrouter.ai/api/v1
    api_key_env: OPENROUTER_API_KEY
    repair: true
"#;

    #[test]
    fn test_defaults() {
        let settings = JudgingSettings::default();
        assert_eq!(settings.shuffle_seed, Some(42));
        assert_eq!(settings.seed_scope, SeedScope::Task);
        assert_eq!(settings.workers, 8);
        assert_eq!(settings.retries, 4);
        assert_eq!(settings.retry_delay, Duration::from_secs(1));
        assert_eq!(settings.hint_mode, HintMode::None);
        assert_eq!(settings.temperature, 0.3);
        assert_eq!(settings.max_tokens, 2048);
        assert_eq!(settings.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn test_parse_sample() {
        let config = JudgingConfig::from_yaml(SAMPLE).unwrap();

        assert_eq!(
            config.judges.all(),
            vec!["claude_fast", "gpt_fast", "gemini_flash"]
        );
        assert_eq!(config.judging.workers, 4);
        assert_eq!(config.judging.retries, 4);
        assert_eq!(config.judging.retry_delay, Duration::from_millis(500));
        assert_eq!(config.judging.hint_mode, HintMode::OwnVendor);
        assert_eq!(config.judging.shuffle_seed, Some(42));

        let gemini = &config.backends["gemini_flash"];
        assert_eq!(gemini.backend_type, "openai");
        assert_eq!(gemini.vendor.as_deref(), Some("gemini"));
        assert_eq!(gemini.factory_config()["repair"], true);
        assert!(gemini.factory_config().get("type").is_none());
        assert_eq!(config.backends["gpt_fast"].temperature, Some(0.0));
    }

    #[test]
    fn test_exponential_policy_from_settings() {
        let config = JudgingConfig::from_yaml(SAMPLE).unwrap();
        let policy = config.judging.retry_policy();
        assert_eq!(
            policy.backoff,
            Backoff::Exponential {
                factor: 2.0,
                max_delay: Duration::from_secs(10)
            }
        );
        assert_eq!(policy.delay, Duration::from_millis(500));
    }

    #[test]
    fn test_null_seed_means_unseeded() {
        let config = JudgingConfig::from_yaml("judging:\n  shuffle_seed: null\n").unwrap();
        assert_eq!(config.judging.shuffle_seed, None);
    }

    #[test]
    fn test_unknown_judge_rejected() {
        let yaml = "judges:\n  primary: [claude_fast]\n";
        assert!(matches!(
            JudgingConfig::from_yaml(yaml),
            Err(ConfigError::UnknownJudge(j)) if j == "claude_fast"
        ));
    }

    #[test]
    fn test_parse_defers_validation() {
        let yaml = "judges:\n  primary: [mistral_large]\n";
        let mut config = JudgingConfig::parse_yaml(yaml).unwrap();
        assert!(config.validate().is_err());

        config.judges.primary.clear();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duplicate_judge_rejected() {
        let yaml = r#"
judges:
  primary: [a_fast]
  additional: [a_fast]
backends:
  a_fast: {type: openai}
"#;
        assert!(matches!(
            JudgingConfig::from_yaml(yaml),
            Err(ConfigError::DuplicateJudge(_))
        ));
    }

    #[test]
    fn test_invalid_ranges_rejected() {
        assert!(JudgingConfig::from_yaml("judging:\n  workers: 0\n").is_err());
        assert!(JudgingConfig::from_yaml("judging:\n  retries: 0\n").is_err());
        assert!(JudgingConfig::from_yaml("judging:\n  temperature: 3.5\n").is_err());
        assert!(JudgingConfig::from_yaml("judging:\n  retry_delay: soon\n").is_err());
    }

    #[test]
    fn test_example_config_parses() {
        let config = JudgingConfig::from_yaml(include_str!("../../../config.example.yaml")).unwrap();
        assert_eq!(config.judges.all().len(), 3);
        assert_eq!(config.judging.retry_policy(), RetryPolicy::default());
        assert_eq!(config.backends["gemini_flash"].factory_config()["timeout"], "90s");
    }

    #[test]
    fn test_durations_serialize_human_readable() {
        let yaml = serde_yaml::to_string(&JudgingSettings::default()).unwrap();
        assert!(yaml.contains("retry_delay: 1s"));
        assert!(yaml.contains("max_retry_delay: 1m"));
    }
}
