//! Concurrent scheduler for judging tasks.
//!
//! Tasks are enumerated prompt-major, judges in roster order. At most
//! `workers` tasks are in flight: a semaphore permit is acquired before
//! each spawn and held by the worker. Every outcome lands in the slot of
//! its task index, so the report is ordered like the enumeration no matter
//! which worker finishes first.

use std::collections::HashMap;
use std::sync::Arc;

use blindjudge_core::{
    JudgmentFailure, JudgmentOutcome, LabelMapping, PromptAnswers, SeedScope, Task,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::{Id as TaskId, JoinError, JoinSet};

use crate::config::JudgingSettings;
use crate::executor::JudgmentExecutor;
use crate::prompts::HintMode;
use crate::resilience::{RetryPolicy, UsageLedger, UsageSummary};
use crate::roster::JudgeRoster;

/// Progress after one task completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub done: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Callback for progress updates. Invoked from the collecting loop, never
/// from a worker.
pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Options for one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeAllOptions {
    /// Maximum tasks in flight
    pub workers: usize,
    pub retry: RetryPolicy,
    pub hint_mode: HintMode,

    /// Run seed; `None` shuffles from entropy
    pub seed: Option<u64>,
    pub seed_scope: SeedScope,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for JudgeAllOptions {
    fn default() -> Self {
        Self::from(&JudgingSettings::default())
    }
}

impl From<&JudgingSettings> for JudgeAllOptions {
    fn from(settings: &JudgingSettings) -> Self {
        Self {
            workers: settings.workers,
            retry: settings.retry_policy(),
            hint_mode: settings.hint_mode,
            seed: settings.shuffle_seed,
            seed_scope: settings.seed_scope,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        }
    }
}

/// Outcomes of a batch, in task order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub outcomes: Vec<JudgmentOutcome>,
    pub succeeded: usize,
    pub failed: usize,
    pub usage: UsageSummary,
}

/// Runs batches of judging tasks on a bounded worker pool.
#[derive(Debug, Clone, Default)]
pub struct JudgingScheduler {
    options: JudgeAllOptions,
}

impl JudgingScheduler {
    pub fn new(options: JudgeAllOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &JudgeAllOptions {
        &self.options
    }

    /// Judge every prompt with every judge in the roster.
    pub async fn judge_all(
        &self,
        batch: &[PromptAnswers],
        roster: &JudgeRoster,
        progress: Option<ProgressSink>,
    ) -> BatchReport {
        let judges = roster.ids();
        self.run_tasks(build_tasks(batch, &judges), roster, progress)
            .await
    }

    /// Run prepared tasks. Outcome `i` belongs to `tasks[i]`.
    pub async fn run_tasks(
        &self,
        tasks: Vec<Task>,
        roster: &JudgeRoster,
        progress: Option<ProgressSink>,
    ) -> BatchReport {
        let total = tasks.len();
        if total == 0 {
            return BatchReport::default();
        }

        let workers = self.options.workers.max(1);
        tracing::info!(tasks = total, workers, judges = roster.len(), "Starting judging batch");

        let usage = Arc::new(UsageLedger::new());
        let executor = Arc::new(JudgmentExecutor::new(self.options.clone(), usage.clone()));
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut join_set = JoinSet::new();
        let mut collector = Collector::new(&tasks, progress);
        let mut spawned: HashMap<TaskId, usize> = HashMap::with_capacity(total);

        for (index, task) in tasks.into_iter().enumerate() {
            let Some(judge) = roster.get(&task.judge_id).cloned() else {
                collector.fail(index, format!("Judge '{}' is not in the roster", task.judge_id));
                continue;
            };

            let permit = loop {
                tokio::select! {
                    permit = semaphore.clone().acquire_owned() => break permit,
                    Some(joined) = join_set.join_next_with_id() => {
                        collector.collect(joined, &spawned);
                    }
                }
            };
            let Ok(permit) = permit else {
                collector.fail(index, "Worker pool closed".to_string());
                continue;
            };

            let executor = executor.clone();
            let handle = join_set.spawn(async move {
                let _permit = permit;
                let outcome = executor.execute(&task, &judge).await;
                (index, outcome)
            });
            spawned.insert(handle.id(), index);
        }

        while let Some(joined) = join_set.join_next_with_id().await {
            collector.collect(joined, &spawned);
        }

        let report = collector.finish(usage.summary());
        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            tokens = report.usage.total.total_tokens(),
            "Judging batch complete"
        );
        report
    }
}

/// Judge every prompt with every judge in the roster.
pub async fn judge_all(
    batch: &[PromptAnswers],
    roster: &JudgeRoster,
    options: JudgeAllOptions,
    progress: Option<ProgressSink>,
) -> BatchReport {
    JudgingScheduler::new(options)
        .judge_all(batch, roster, progress)
        .await
}

/// One task per (prompt, judge), prompt-major.
pub fn build_tasks(batch: &[PromptAnswers], judge_ids: &[&str]) -> Vec<Task> {
    let mut tasks = Vec::with_capacity(batch.len() * judge_ids.len());
    for entry in batch {
        let answers: Arc<[_]> = entry.answers.clone().into();
        for judge_id in judge_ids {
            tasks.push(Task {
                prompt_id: entry.prompt.id.clone(),
                prompt_text: entry.prompt.text.clone(),
                answers: answers.clone(),
                judge_id: judge_id.to_string(),
            });
        }
    }
    tasks
}

/// Slot vector plus counters, owned by the collecting loop.
struct Collector {
    slots: Vec<Option<JudgmentOutcome>>,
    keys: Vec<(String, String)>,
    succeeded: usize,
    failed: usize,
    progress: Option<ProgressSink>,
}

impl Collector {
    fn new(tasks: &[Task], progress: Option<ProgressSink>) -> Self {
        Self {
            slots: vec![None; tasks.len()],
            keys: tasks
                .iter()
                .map(|t| (t.prompt_id.clone(), t.judge_id.clone()))
                .collect(),
            succeeded: 0,
            failed: 0,
            progress,
        }
    }

    fn collect(
        &mut self,
        joined: Result<(TaskId, (usize, JudgmentOutcome)), JoinError>,
        spawned: &HashMap<TaskId, usize>,
    ) {
        match joined {
            Ok((_, (index, outcome))) => self.store(index, outcome),
            Err(error) => match spawned.get(&error.id()) {
                Some(&index) => {
                    tracing::error!(task = index, error = %error, "Worker panicked");
                    self.fail(index, format!("Worker failed: {}", error));
                }
                None => tracing::error!(error = %error, "Lost track of a failed worker"),
            },
        }
    }

    fn fail(&mut self, index: usize, error: String) {
        let (prompt_id, judge_id) = self.keys[index].clone();
        self.store(
            index,
            JudgmentOutcome::Failed(JudgmentFailure {
                prompt_id,
                judge_id,
                error,
                mapping: LabelMapping::new(),
            }),
        );
    }

    fn store(&mut self, index: usize, outcome: JudgmentOutcome) {
        if outcome.is_judged() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.slots[index] = Some(outcome);

        if let Some(sink) = &self.progress {
            sink(ProgressEvent {
                done: self.succeeded + self.failed,
                total: self.slots.len(),
                succeeded: self.succeeded,
                failed: self.failed,
            });
        }
    }

    fn finish(self, usage: UsageSummary) -> BatchReport {
        let outcomes = self
            .slots
            .into_iter()
            .zip(self.keys)
            .map(|(slot, (prompt_id, judge_id))| {
                slot.unwrap_or_else(|| {
                    JudgmentOutcome::Failed(JudgmentFailure {
                        prompt_id,
                        judge_id,
                        error: "Task produced no outcome".to_string(),
                        mapping: LabelMapping::new(),
                    })
                })
            })
            .collect();

        BatchReport {
            outcomes,
            succeeded: self.succeeded,
            failed: self.failed,
            usage,
        }
    }
}
