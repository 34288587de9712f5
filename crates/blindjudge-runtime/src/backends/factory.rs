//! Backend registry.
//!
//! Each judge's backend settings name a `type`; the registry maps that
//! string to a factory which checks the settings and builds the backend.
//!
//! ```ignore
//! let registry = BackendRegistry::with_defaults();
//! registry.validate("openai", &settings)?;
//! let backend = registry.create("openai", &settings)?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::{check_setting_types, BackendError, JudgeBackend};

/// String settings understood by every backend.
const SHARED_STRING_SETTINGS: &[&str] = &["api_key", "api_key_env", "base_url", "model", "timeout"];

/// Builds one kind of judge backend from its settings.
pub trait BackendFactory: Send + Sync {
    /// Value of `type` in backend settings, e.g. `"anthropic"`.
    fn backend_type(&self) -> &'static str;

    /// Check settings without building a client.
    fn validate_config(&self, config: &JsonValue) -> Result<(), BackendError>;

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn JudgeBackend>, BackendError>;
}

/// Factories keyed by backend type.
#[derive(Default)]
pub struct BackendRegistry {
    factories: BTreeMap<&'static str, Arc<dyn BackendFactory>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every backend compiled into this build.
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(feature = "anthropic")]
        registry.register(Arc::new(super::AnthropicBackendFactory));
        #[cfg(feature = "openai")]
        registry.register(Arc::new(super::OpenAiBackendFactory));
        registry
    }

    /// Add a factory; a later factory for the same type wins.
    pub fn register(&mut self, factory: Arc<dyn BackendFactory>) {
        self.factories.insert(factory.backend_type(), factory);
    }

    pub fn available_types(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    /// Check shared setting types, then the backend's own rules.
    pub fn validate(&self, backend_type: &str, config: &JsonValue) -> Result<(), BackendError> {
        let factory = self.factory(backend_type)?;
        check_setting_types(config, SHARED_STRING_SETTINGS, &["repair"])?;
        factory.validate_config(config)
    }

    pub fn create(
        &self,
        backend_type: &str,
        config: &JsonValue,
    ) -> Result<Arc<dyn JudgeBackend>, BackendError> {
        self.factory(backend_type)?.create(config)
    }

    fn factory(&self, backend_type: &str) -> Result<&Arc<dyn BackendFactory>, BackendError> {
        self.factories.get(backend_type).ok_or_else(|| {
            BackendError::NotConfigured(format!(
                "unknown backend type '{}' (built with: {})",
                backend_type,
                self.available_types().join(", ")
            ))
        })
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Reply, ScriptedBackend};
    use serde_json::json;

    struct StubFactory(&'static str);

    impl BackendFactory for StubFactory {
        fn backend_type(&self) -> &'static str {
            self.0
        }

        fn validate_config(&self, config: &JsonValue) -> Result<(), BackendError> {
            match config.get("fail") {
                Some(_) => Err(BackendError::NotConfigured("stub rejects 'fail'".into())),
                None => Ok(()),
            }
        }

        fn create(&self, _config: &JsonValue) -> Result<Arc<dyn JudgeBackend>, BackendError> {
            Ok(Arc::new(ScriptedBackend::always(Reply::Valid)))
        }
    }

    #[test]
    fn test_validate_and_create_by_type() {
        let mut registry = BackendRegistry::new();
        registry.register(Arc::new(StubFactory("stub")));

        assert!(registry.create("stub", &json!({})).is_ok());
        assert!(registry.validate("stub", &json!({"model": "m"})).is_ok());
        assert!(registry.validate("stub", &json!({"model": 3})).is_err());
        assert!(registry.validate("stub", &json!({"repair": "yes"})).is_err());
        assert!(registry.validate("stub", &json!({"fail": true})).is_err());
    }

    #[test]
    fn test_unknown_type_lists_available() {
        let mut registry = BackendRegistry::new();
        registry.register(Arc::new(StubFactory("stub")));
        registry.register(Arc::new(StubFactory("alt")));

        assert_eq!(registry.available_types(), vec!["alt", "stub"]);
        for result in [
            registry.validate("carrier_pigeon", &json!({})),
            registry.create("carrier_pigeon", &json!({})).map(|_| ()),
        ] {
            match result {
                Err(BackendError::NotConfigured(msg)) => {
                    assert!(msg.contains("'carrier_pigeon'"));
                    assert!(msg.contains("alt, stub"));
                }
                other => panic!("expected NotConfigured, got {:?}", other.err()),
            }
        }
    }
}
