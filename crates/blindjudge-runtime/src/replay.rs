//! Re-run the failed entries of a record file in place.

use std::collections::HashMap;
use std::sync::Arc;

use blindjudge_core::{Answer, JudgmentRecord, PromptAnswers, Task};

use crate::resilience::UsageSummary;
use crate::roster::JudgeRoster;
use crate::scheduler::{JudgeAllOptions, JudgingScheduler, ProgressSink};

/// Result of a replay.
#[derive(Debug, Clone, Default)]
pub struct ReplayReport {
    /// Input records with replayed entries replaced at their positions
    pub records: Vec<JudgmentRecord>,

    /// Failed entries that were run again
    pub replayed: usize,

    /// Replayed entries that now carry a judgment
    pub recovered: usize,

    /// Failed entries that could not be rebuilt into a task
    pub skipped: usize,

    pub usage: UsageSummary,
}

/// Replay every record carrying `error`.
///
/// Tasks are rebuilt from `batch` by prompt id. Entries whose prompt has no
/// answers, or whose judge is not in the roster, are left as they are and
/// counted as skipped.
pub async fn replay_failures(
    mut records: Vec<JudgmentRecord>,
    batch: &[PromptAnswers],
    roster: &JudgeRoster,
    options: JudgeAllOptions,
    progress: Option<ProgressSink>,
) -> ReplayReport {
    let prompts: HashMap<&str, &PromptAnswers> = batch
        .iter()
        .map(|entry| (entry.prompt.id.as_str(), entry))
        .collect();
    let mut answer_sets: HashMap<&str, Arc<[Answer]>> = HashMap::new();

    let mut positions = Vec::new();
    let mut tasks = Vec::new();
    let mut skipped = 0;

    for (position, record) in records.iter().enumerate() {
        if !record.has_error() {
            continue;
        }
        let Some(entry) = prompts.get(record.prompt_id.as_str()) else {
            tracing::warn!(prompt_id = %record.prompt_id, "No answers for failed entry, skipping");
            skipped += 1;
            continue;
        };
        if roster.get(&record.judge_model).is_none() {
            tracing::warn!(
                prompt_id = %record.prompt_id,
                judge = %record.judge_model,
                "Judge not configured, skipping"
            );
            skipped += 1;
            continue;
        }

        let answers = answer_sets
            .entry(entry.prompt.id.as_str())
            .or_insert_with(|| entry.answers.clone().into())
            .clone();
        tasks.push(Task {
            prompt_id: entry.prompt.id.clone(),
            prompt_text: entry.prompt.text.clone(),
            answers,
            judge_id: record.judge_model.clone(),
        });
        positions.push(position);
    }

    tracing::info!(replaying = tasks.len(), skipped, "Replaying failed judgments");

    let report = JudgingScheduler::new(options)
        .run_tasks(tasks, roster, progress)
        .await;

    for (position, outcome) in positions.iter().zip(&report.outcomes) {
        records[*position] = JudgmentRecord::from(outcome);
    }

    ReplayReport {
        records,
        replayed: positions.len(),
        recovered: report.succeeded,
        skipped,
        usage: report.usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::RetryPolicy;
    use crate::testing::{batch, judge, roster, Reply, ScriptedBackend};
    use blindjudge_core::LabelMapping;
    use std::time::Duration;

    fn failed(prompt_id: &str, judge: &str) -> JudgmentRecord {
        JudgmentRecord {
            prompt_id: prompt_id.to_string(),
            judge_model: judge.to_string(),
            ranking: None,
            scores: None,
            justification: None,
            mapping: LabelMapping::new(),
            anonymized_answers: None,
            error: Some("Backend error: timeout".to_string()),
        }
    }

    fn judged(prompt_id: &str, judge: &str) -> JudgmentRecord {
        JudgmentRecord {
            error: None,
            justification: Some("kept".to_string()),
            ..failed(prompt_id, judge)
        }
    }

    fn options() -> JudgeAllOptions {
        JudgeAllOptions {
            workers: 2,
            retry: RetryPolicy::new(1, Duration::ZERO),
            ..JudgeAllOptions::default()
        }
    }

    #[tokio::test]
    async fn test_replayed_outcomes_written_back_in_place() {
        let backend = Arc::new(ScriptedBackend::always(Reply::Valid));
        let roster = roster(vec![judge("gpt_fast", backend.clone())]);
        let records = vec![
            judged("prompt_001", "gpt_fast"),
            failed("prompt_002", "gpt_fast"),
            judged("prompt_003", "gpt_fast"),
            failed("prompt_001", "claude_fast"),
            failed("prompt_099", "gpt_fast"),
        ];

        let report = replay_failures(records, &batch(3), &roster, options(), None).await;

        assert_eq!(report.replayed, 1);
        assert_eq!(report.recovered, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(backend.calls(), 1);

        assert_eq!(report.records.len(), 5);
        assert_eq!(report.records[0].justification.as_deref(), Some("kept"));
        assert!(!report.records[1].has_error());
        assert_eq!(report.records[1].key(), ("prompt_002", "gpt_fast"));
        assert_eq!(report.records[1].mapping.len(), 3);
        assert!(report.records[3].has_error());
        assert!(report.records[4].has_error());
    }

    #[tokio::test]
    async fn test_still_failing_entry_keeps_error() {
        let backend = Arc::new(ScriptedBackend::always(Reply::Garbage));
        let roster = roster(vec![judge("gpt_fast", backend)]);

        let report = replay_failures(
            vec![failed("prompt_001", "gpt_fast")],
            &batch(1),
            &roster,
            options(),
            None,
        )
        .await;

        assert_eq!(report.replayed, 1);
        assert_eq!(report.recovered, 0);
        let error = report.records[0].error.as_deref().unwrap();
        assert!(error.contains("No JSON object"));
        assert_eq!(report.records[0].mapping.len(), 3);
    }

    #[tokio::test]
    async fn test_nothing_to_replay() {
        let backend = Arc::new(ScriptedBackend::always(Reply::Valid));
        let roster = roster(vec![judge("gpt_fast", backend.clone())]);
        let records = vec![judged("prompt_001", "gpt_fast")];

        let report = replay_failures(records.clone(), &batch(1), &roster, options(), None).await;

        assert_eq!(report.records, records);
        assert_eq!(report.replayed, 0);
        assert_eq!(backend.calls(), 0);
    }
}
