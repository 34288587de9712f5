//! Judge roster: judge ids resolved to backends and profiles.

use std::fmt;
use std::sync::Arc;

use crate::backends::{BackendRegistry, JudgeBackend};
use crate::config::{ConfigError, JudgingConfig};

/// What the executor needs to know about a judge besides its backend.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeProfile {
    /// Vendor used by hint modes
    pub vendor: String,

    pub tier: String,

    /// Make one repair call after an invalid reply
    pub repair_round_trip: bool,

    /// Overrides the run temperature
    pub temperature: Option<f32>,
}

/// A configured judge.
pub struct Judge {
    pub id: String,
    pub profile: JudgeProfile,
    pub backend: Arc<dyn JudgeBackend>,
}

impl Judge {
    /// Judge with a profile derived from its id (`<vendor>_<tier>`) and
    /// the backend's capabilities.
    pub fn new(id: impl Into<String>, backend: Arc<dyn JudgeBackend>) -> Self {
        let id = id.into();
        let (vendor, tier) = split_judge_id(&id);
        let profile = JudgeProfile {
            vendor: vendor.to_string(),
            tier: tier.to_string(),
            repair_round_trip: backend.capabilities().repair_round_trip,
            temperature: None,
        };
        Self {
            id,
            profile,
            backend,
        }
    }

    pub fn with_profile(mut self, profile: JudgeProfile) -> Self {
        self.profile = profile;
        self
    }
}

impl fmt::Debug for Judge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Judge")
            .field("id", &self.id)
            .field("profile", &self.profile)
            .field("backend", &self.backend.name())
            .finish()
    }
}

/// Split a judge id at its first underscore: `gpt_fast` is vendor `gpt`,
/// tier `fast`. An id without an underscore is all vendor.
pub fn split_judge_id(id: &str) -> (&str, &str) {
    id.split_once('_').unwrap_or((id, ""))
}

/// Judges in task enumeration order.
#[derive(Debug, Default)]
pub struct JudgeRoster {
    judges: Vec<Arc<Judge>>,
}

impl JudgeRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a judge; ids must be unique.
    pub fn push(&mut self, judge: Judge) -> Result<(), ConfigError> {
        if self.get(&judge.id).is_some() {
            return Err(ConfigError::DuplicateJudge(judge.id));
        }
        self.judges.push(Arc::new(judge));
        Ok(())
    }

    /// Build every configured judge's backend.
    ///
    /// Every judge's settings are validated before any backend is built, so
    /// a bad entry fails setup without creating clients for the others.
    pub fn from_config(
        config: &JudgingConfig,
        registry: &BackendRegistry,
    ) -> Result<Self, ConfigError> {
        let mut planned = Vec::new();
        for id in config.judges.all() {
            let settings = config
                .backends
                .get(&id)
                .ok_or_else(|| ConfigError::UnknownJudge(id.clone()))?;
            let factory_config = settings.factory_config();
            registry
                .validate(&settings.backend_type, &factory_config)
                .map_err(|source| ConfigError::Backend {
                    judge: id.clone(),
                    source,
                })?;
            planned.push((id, settings, factory_config));
        }

        let mut roster = Self::new();
        for (id, settings, factory_config) in planned {
            let backend = registry
                .create(&settings.backend_type, &factory_config)
                .map_err(|source| ConfigError::Backend {
                    judge: id.clone(),
                    source,
                })?;

            let mut judge = Judge::new(id, backend);
            if let Some(vendor) = &settings.vendor {
                judge.profile.vendor = vendor.clone();
            }
            judge.profile.temperature = settings.temperature;

            tracing::debug!(
                judge = %judge.id,
                backend = judge.backend.name(),
                vendor = %judge.profile.vendor,
                repair = judge.profile.repair_round_trip,
                "Judge configured"
            );
            roster.push(judge)?;
        }

        if roster.is_empty() {
            return Err(ConfigError::Invalid("no judges configured".into()));
        }
        Ok(roster)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Judge>> {
        self.judges.iter().find(|judge| judge.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Judge>> {
        self.judges.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.judges.iter().map(|judge| judge.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.judges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.judges.is_empty()
    }
}
