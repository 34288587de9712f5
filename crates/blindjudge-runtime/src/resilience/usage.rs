//! Token usage accounting across a judging run.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::backends::TokenUsage;

/// Accumulated usage for one judge (or the whole run).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeUsage {
    /// Backend calls, repair calls included
    pub calls: u32,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl JudgeUsage {
    pub fn add(&mut self, usage: &TokenUsage) {
        self.calls += 1;
        self.prompt_tokens += u64::from(usage.prompt_tokens);
        self.completion_tokens += u64::from(usage.completion_tokens);
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    fn merge(&mut self, other: &JudgeUsage) {
        self.calls += other.calls;
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// Snapshot of a [`UsageLedger`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub per_judge: BTreeMap<String, JudgeUsage>,
    pub total: JudgeUsage,
}

/// Shared usage ledger, written once per backend response.
#[derive(Debug, Default)]
pub struct UsageLedger {
    usage: RwLock<BTreeMap<String, JudgeUsage>>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record usage after a call.
    pub fn record(&self, judge_id: &str, usage: &TokenUsage) {
        self.usage
            .write()
            .entry(judge_id.to_string())
            .or_default()
            .add(usage);
    }

    pub fn summary(&self) -> UsageSummary {
        let per_judge = self.usage.read().clone();
        let mut total = JudgeUsage::default();
        for usage in per_judge.values() {
            total.merge(usage);
        }
        UsageSummary { per_judge, total }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(prompt: u32, completion: u32) -> TokenUsage {
        TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
        }
    }

    #[test]
    fn test_ledger_accumulates_per_judge() {
        let ledger = UsageLedger::new();
        ledger.record("claude_fast", &usage(100, 20));
        ledger.record("claude_fast", &usage(50, 10));
        ledger.record("gpt_fast", &usage(10, 5));

        let summary = ledger.summary();
        assert_eq!(summary.per_judge["claude_fast"].calls, 2);
        assert_eq!(summary.per_judge["claude_fast"].total_tokens(), 180);
        assert_eq!(summary.total.calls, 3);
        assert_eq!(summary.total.total_tokens(), 195);
    }

    #[test]
    fn test_empty_ledger_summary() {
        assert_eq!(UsageLedger::new().summary(), UsageSummary::default());
    }

    #[test]
    fn test_concurrent_records() {
        let ledger = std::sync::Arc::new(UsageLedger::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        ledger.record("gemini_fast", &usage(1, 1));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(ledger.summary().total.calls, 800);
    }
}
