//! # blindjudge-runtime
//!
//! Concurrent dispatch of blind judging tasks.
//!
//! Every (prompt, judge) pair becomes one task. Tasks run on a bounded
//! worker pool; each attempt shuffles the answers, calls the judge's
//! backend and validates the reply. Failed attempts are retried with
//! backoff, and a task that never succeeds is recorded as a failure in
//! its own slot without disturbing the rest of the batch.
//!
//! ## Example
//!
//! ```rust,ignore
//! use blindjudge_runtime::{judge_all, BackendRegistry, JudgeAllOptions, JudgeRoster, JudgingConfig};
//!
//! let config = JudgingConfig::from_yaml_file("config.yaml")?;
//! let roster = JudgeRoster::from_config(&config, &BackendRegistry::with_defaults())?;
//! let options = JudgeAllOptions::from(&config.judging);
//!
//! let report = judge_all(&batch, &roster, options, None).await;
//! println!("{} judged, {} failed", report.succeeded, report.failed);
//! ```

use blindjudge_core::{AnonymizeError, NormalizeError, ParseError, SchemaError};
use std::time::Duration;
use thiserror::Error;

pub mod backends;
pub mod config;
pub mod executor;
pub mod prompts;
pub mod replay;
pub mod resilience;
pub mod roster;
pub mod scheduler;

pub use backends::{
    ApiCredential, BackendCapabilities, BackendError, BackendFactory, BackendRegistry,
    GenerateRequest, GenerateResponse, JudgeBackend, TokenUsage,
};
pub use config::{BackendConfig, ConfigError, JudgesConfig, JudgingConfig, JudgingSettings};
pub use executor::{AttemptFailure, JudgmentExecutor};
pub use prompts::HintMode;
pub use replay::{replay_failures, ReplayReport};
pub use resilience::{Backoff, BackoffKind, RetryPolicy, UsageLedger, UsageSummary};
pub use roster::{Judge, JudgeProfile, JudgeRoster};
pub use scheduler::{
    judge_all, BatchReport, JudgeAllOptions, JudgingScheduler, ProgressEvent, ProgressSink,
};

/// Why a judging attempt failed.
#[derive(Error, Debug)]
pub enum JudgeError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Anonymize(#[from] AnonymizeError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<NormalizeError> for JudgeError {
    fn from(error: NormalizeError) -> Self {
        match error {
            NormalizeError::Parse(e) => JudgeError::Parse(e),
            NormalizeError::Schema(e) => JudgeError::Schema(e),
        }
    }
}

impl JudgeError {
    /// Backend, parse and schema failures may succeed on another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            JudgeError::Backend(_) | JudgeError::Parse(_) | JudgeError::Schema(_)
        )
    }

    /// Minimum wait the backend asked for before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            JudgeError::Backend(BackendError::RateLimited { retry_after }) => *retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted backends and fixtures shared by runtime tests.

    use async_trait::async_trait;
    use blindjudge_core::{Answer, BackendOutput, Prompt, PromptAnswers};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::backends::{
        BackendCapabilities, BackendError, GenerateRequest, GenerateResponse, JudgeBackend,
        TokenUsage,
    };
    use crate::roster::{Judge, JudgeProfile, JudgeRoster};

    /// A reply a scripted backend can give.
    #[derive(Debug, Clone)]
    pub enum Reply {
        /// A valid judgment in label order
        Valid,
        /// Prose with no JSON in it
        Garbage,
        /// HTTP failure
        Fail,
        /// Panic inside the worker
        Panic,
        /// HTTP 429 with a `retry-after`
        RateLimited(Duration),
    }

    /// Backend that answers from a script, then repeats `fallback`.
    pub struct ScriptedBackend {
        script: Mutex<VecDeque<Reply>>,
        fallback: Reply,
        capabilities: BackendCapabilities,
        delay: Duration,
        calls: AtomicUsize,
        schema_requests: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        pub fn always(reply: Reply) -> Self {
            Self::scripted(Vec::new(), reply)
        }

        pub fn scripted(script: Vec<Reply>, fallback: Reply) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback,
                capabilities: BackendCapabilities::default(),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                schema_requests: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn with_capabilities(mut self, capabilities: BackendCapabilities) -> Self {
            self.capabilities = capabilities;
            self
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn schema_requests(&self) -> usize {
            self.schema_requests.load(Ordering::SeqCst)
        }

        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }

        pub fn prompts(&self) -> Vec<String> {
            self.prompts.lock().clone()
        }
    }

    /// Labels a valid reply covers when the request carries no schema;
    /// every [`batch`] prompt has three answers.
    const PLAIN_TEXT_LABELS: usize = 3;

    /// Labels to answer for: the schema's required score keys when a schema
    /// was sent, otherwise the first [`PLAIN_TEXT_LABELS`] labels.
    fn reply_labels(request: &GenerateRequest) -> Vec<String> {
        request
            .output_schema
            .as_ref()
            .and_then(|schema| schema["properties"]["scores"]["required"].as_array())
            .map(|names| {
                names
                    .iter()
                    .filter_map(|name| name.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_else(|| {
                ('A'..='F')
                    .take(PLAIN_TEXT_LABELS)
                    .map(String::from)
                    .collect()
            })
    }

    fn valid_reply(labels: &[String]) -> String {
        let ranking: Vec<String> = labels.iter().map(|l| format!("\"{}\"", l)).collect();
        let scores: Vec<String> = labels
            .iter()
            .enumerate()
            .map(|(i, l)| format!("\"{}\": {}", l, 10 - i))
            .collect();
        format!(
            "Here is my verdict:\n```json\n{{\"ranking\": [{}], \"scores\": {{{}}}, \"justification\": \"clear winner\"}}\n```",
            ranking.join(", "),
            scores.join(", ")
        )
    }

    #[async_trait]
    impl JudgeBackend for ScriptedBackend {
        async fn generate(
            &self,
            request: &GenerateRequest,
        ) -> Result<GenerateResponse, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.output_schema.is_some() {
                self.schema_requests.fetch_add(1, Ordering::SeqCst);
            }
            self.prompts.lock().push(request.prompt.clone());
            let reply = self
                .script
                .lock()
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone());

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let text = match reply {
                Reply::Valid => valid_reply(&reply_labels(request)),
                Reply::Garbage => "I refuse to pick a favourite.".to_string(),
                Reply::Fail => {
                    return Err(BackendError::Api {
                        status: 503,
                        message: "overloaded".to_string(),
                    })
                }
                Reply::Panic => panic!("scripted backend panic"),
                Reply::RateLimited(wait) => {
                    return Err(BackendError::RateLimited {
                        retry_after: Some(wait),
                    })
                }
            };

            Ok(GenerateResponse {
                output: BackendOutput::Text(text),
                usage: TokenUsage {
                    prompt_tokens: 100,
                    completion_tokens: 20,
                },
                model: "scripted".to_string(),
            })
        }

        fn name(&self) -> &str {
            "scripted"
        }

        fn capabilities(&self) -> BackendCapabilities {
            self.capabilities
        }
    }

    pub fn judge(id: &str, backend: Arc<ScriptedBackend>) -> Judge {
        Judge::new(id, backend)
    }

    pub fn judge_with_profile(id: &str, backend: Arc<ScriptedBackend>, profile: JudgeProfile) -> Judge {
        Judge::new(id, backend).with_profile(profile)
    }

    pub fn roster(judges: Vec<Judge>) -> JudgeRoster {
        let mut roster = JudgeRoster::new();
        for judge in judges {
            roster.push(judge).unwrap();
        }
        roster
    }

    /// `prompts` prompts with three answers each.
    pub fn batch(prompts: usize) -> Vec<PromptAnswers> {
        (1..=prompts)
            .map(|p| {
                let prompt_id = format!("prompt_{:03}", p);
                PromptAnswers {
                    prompt: Prompt {
                        id: prompt_id.clone(),
                        category: "writing".to_string(),
                        text: format!("Question {}", p),
                    },
                    answers: [("claude", "fast"), ("gpt", "fast"), ("gemini", "thinking")]
                        .iter()
                        .map(|(vendor, tier)| Answer {
                            answer_id: format!("{}_{}_{}", prompt_id, vendor, tier),
                            prompt_id: prompt_id.clone(),
                            vendor: vendor.to_string(),
                            tier: tier.to_string(),
                            text: format!("{} answer to {}", tier, prompt_id),
                        })
                        .collect(),
                }
            })
            .collect()
    }
}
