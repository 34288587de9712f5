//! Judgment executor: one task, one judge, retried until it sticks.
//!
//! An attempt walks `anonymize -> prompt -> backend -> normalize`. If the
//! reply does not validate and the judge's profile asks for it, the backend
//! gets one repair call before the attempt counts as failed.

use std::fmt;
use std::sync::Arc;

use blindjudge_core::{
    anonymize, derive_task_seed, judgment_output_schema, normalize, BackendOutput, Judgment,
    JudgmentFailure, JudgmentOutcome, LabelMapping, Task,
};

use crate::backends::GenerateRequest;
use crate::prompts::{render_judge_prompt, render_repair_prompt, SYSTEM_PROMPT};
use crate::resilience::UsageLedger;
use crate::roster::Judge;
use crate::scheduler::JudgeAllOptions;
use crate::JudgeError;

/// A failed attempt, with the mapping it was judged under (empty when the
/// answers were never shuffled).
#[derive(Debug)]
pub struct AttemptFailure {
    pub error: JudgeError,
    pub mapping: LabelMapping,
}

impl AttemptFailure {
    fn new(error: impl Into<JudgeError>, mapping: &LabelMapping) -> Self {
        Self {
            error: error.into(),
            mapping: mapping.clone(),
        }
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

/// Runs judging attempts for a batch.
pub struct JudgmentExecutor {
    options: JudgeAllOptions,
    usage: Arc<UsageLedger>,
}

impl JudgmentExecutor {
    pub fn new(options: JudgeAllOptions, usage: Arc<UsageLedger>) -> Self {
        Self { options, usage }
    }

    /// Judge a task, retrying per the configured policy.
    ///
    /// Never fails: exhaustion becomes [`JudgmentOutcome::Failed`] carrying
    /// the last error.
    pub async fn execute(&self, task: &Task, judge: &Judge) -> JudgmentOutcome {
        let result = self
            .options
            .retry
            .run_with_floor(
                || self.attempt(task, judge),
                |failure: &AttemptFailure| failure.error.is_retryable(),
                |failure: &AttemptFailure| failure.error.retry_after(),
            )
            .await;

        match result {
            Ok(judgment) => {
                tracing::info!(
                    prompt_id = %task.prompt_id,
                    judge = %task.judge_id,
                    top = ?judgment.top_answer(),
                    "Judged"
                );
                JudgmentOutcome::Judged(judgment)
            }
            Err(failure) => {
                tracing::error!(
                    prompt_id = %task.prompt_id,
                    judge = %task.judge_id,
                    error = %failure.error,
                    "Judgment failed"
                );
                JudgmentOutcome::Failed(JudgmentFailure {
                    prompt_id: task.prompt_id.clone(),
                    judge_id: task.judge_id.clone(),
                    error: failure.error.to_string(),
                    mapping: failure.mapping,
                })
            }
        }
    }

    /// One attempt, including at most one repair call.
    pub async fn attempt(&self, task: &Task, judge: &Judge) -> Result<Judgment, AttemptFailure> {
        let seed = self.options.seed.map(|run_seed| {
            derive_task_seed(
                run_seed,
                &task.prompt_id,
                &task.judge_id,
                self.options.seed_scope,
            )
        });
        let anonymized = anonymize(&task.answers, seed)
            .map_err(|e| AttemptFailure::new(e, &LabelMapping::new()))?;
        let mapping = &anonymized.mapping;

        tracing::debug!(
            prompt_id = %task.prompt_id,
            judge = %task.judge_id,
            answers = anonymized.answers.len(),
            seed = ?seed,
            "Answers anonymized"
        );

        let prompt = render_judge_prompt(
            &task.prompt_text,
            &anonymized,
            &task.answers,
            &judge.profile.vendor,
            self.options.hint_mode,
        );
        let output_schema = judge
            .backend
            .capabilities()
            .structured_output
            .then(|| judgment_output_schema(&mapping.labels()));
        let request = GenerateRequest {
            prompt,
            system_prompt: Some(SYSTEM_PROMPT.to_string()),
            output_schema,
            temperature: judge.profile.temperature.unwrap_or(self.options.temperature),
            max_tokens: self.options.max_tokens,
        };

        let output = self
            .call(task, judge, &request)
            .await
            .map_err(|e| AttemptFailure::new(e, mapping))?;

        let fields = match normalize(&output, mapping) {
            Ok(fields) => fields,
            Err(error) if judge.profile.repair_round_trip => {
                tracing::debug!(
                    prompt_id = %task.prompt_id,
                    judge = %task.judge_id,
                    error = %error,
                    "Invalid judgment, requesting repair"
                );
                let repair = GenerateRequest {
                    prompt: render_repair_prompt(&request.prompt),
                    ..request.clone()
                };
                let output = self
                    .call(task, judge, &repair)
                    .await
                    .map_err(|e| AttemptFailure::new(e, mapping))?;
                normalize(&output, mapping).map_err(|e| AttemptFailure::new(e, mapping))?
            }
            Err(error) => return Err(AttemptFailure::new(error, mapping)),
        };

        Ok(Judgment::from_fields(
            task,
            fields,
            mapping.clone(),
            &anonymized.answers,
        ))
    }

    async fn call(
        &self,
        task: &Task,
        judge: &Judge,
        request: &GenerateRequest,
    ) -> Result<BackendOutput, JudgeError> {
        let response = judge.backend.generate(request).await?;
        self.usage.record(&task.judge_id, &response.usage);

        tracing::debug!(
            prompt_id = %task.prompt_id,
            judge = %task.judge_id,
            model = %response.model,
            tokens = response.usage.total(),
            "Backend replied"
        );
        Ok(response.output)
    }
}
