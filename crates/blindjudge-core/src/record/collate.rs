//! Merge re-run results back into a record file.

use std::collections::{BTreeMap, BTreeSet};

use super::JudgmentRecord;

/// Result of [`collate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollateReport {
    pub records: Vec<JudgmentRecord>,

    /// Failed base entries replaced by a regenerated success
    pub replaced: usize,

    /// Base entries that were already successful
    pub kept_ok: usize,

    /// Failed base entries with no regenerated entry at all
    pub no_regen_match: usize,

    /// Failed base entries whose regenerated entries also failed
    pub regen_still_bad: usize,

    /// Regenerated successes appended because the base lacked their key
    pub added: usize,
}

/// Replace failed entries of `base` with successful regenerated entries.
///
/// Entries are matched on `(prompt_id, judge_model)`. Base order is kept;
/// with `add_missing`, regenerated successes whose key is absent from the
/// base are appended in the order their key first succeeded in
/// `regenerated`. A key that succeeded more than once uses its last success.
pub fn collate(
    base: Vec<JudgmentRecord>,
    regenerated: &[JudgmentRecord],
    add_missing: bool,
) -> CollateReport {
    let mut good: BTreeMap<(&str, &str), &JudgmentRecord> = BTreeMap::new();
    let mut good_order: Vec<(&str, &str)> = Vec::new();
    let mut attempted: BTreeSet<(&str, &str)> = BTreeSet::new();
    for record in regenerated {
        attempted.insert(record.key());
        if !record.has_error() && good.insert(record.key(), record).is_none() {
            good_order.push(record.key());
        }
    }

    let mut report = CollateReport::default();
    let mut seen: BTreeSet<(String, String)> = BTreeSet::new();

    for entry in base {
        seen.insert((entry.prompt_id.clone(), entry.judge_model.clone()));

        if !entry.has_error() {
            report.kept_ok += 1;
            report.records.push(entry);
            continue;
        }

        let replacement = good.get(&entry.key()).copied();
        match replacement {
            Some(replacement) => {
                report.replaced += 1;
                report.records.push(replacement.clone());
            }
            None => {
                if attempted.contains(&entry.key()) {
                    report.regen_still_bad += 1;
                } else {
                    report.no_regen_match += 1;
                }
                report.records.push(entry);
            }
        }
    }

    if add_missing {
        for key @ (prompt_id, judge_model) in good_order {
            if !seen.contains(&(prompt_id.to_string(), judge_model.to_string())) {
                report.added += 1;
                report.records.push(good[&key].clone());
            }
        }
    }

    tracing::info!(
        replaced = report.replaced,
        kept_ok = report.kept_ok,
        no_regen_match = report.no_regen_match,
        regen_still_bad = report.regen_still_bad,
        added = report.added,
        "Collated regenerated judgments"
    );

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Label, LabelMapping};

    fn ok(prompt_id: &str, judge: &str, justification: &str) -> JudgmentRecord {
        let a = Label::parse("A").unwrap();
        let b = Label::parse("B").unwrap();
        let mut mapping = LabelMapping::new();
        mapping.insert(a, "x");
        mapping.insert(b, "y");
        JudgmentRecord {
            prompt_id: prompt_id.into(),
            judge_model: judge.into(),
            ranking: Some(vec![a, b]),
            scores: Some([(a, 7), (b, 3)].into_iter().collect()),
            justification: Some(justification.into()),
            mapping,
            anonymized_answers: None,
            error: None,
        }
    }

    fn bad(prompt_id: &str, judge: &str) -> JudgmentRecord {
        JudgmentRecord {
            prompt_id: prompt_id.into(),
            judge_model: judge.into(),
            ranking: None,
            scores: None,
            justification: None,
            mapping: LabelMapping::new(),
            anonymized_answers: None,
            error: Some(String::new()),
        }
    }

    #[test]
    fn test_counters() {
        let base = vec![
            ok("p1", "claude_fast", "original"),
            bad("p1", "gpt_fast"),
            bad("p2", "claude_fast"),
            bad("p2", "gpt_fast"),
        ];
        let regenerated = vec![
            ok("p1", "gpt_fast", "regen"),
            bad("p2", "claude_fast"),
            ok("p3", "claude_fast", "new"),
        ];

        let report = collate(base, &regenerated, false);

        assert_eq!(report.kept_ok, 1);
        assert_eq!(report.replaced, 1);
        assert_eq!(report.regen_still_bad, 1);
        assert_eq!(report.no_regen_match, 1);
        assert_eq!(report.added, 0);
        assert_eq!(report.records.len(), 4);
        assert_eq!(report.records[1].justification.as_deref(), Some("regen"));
        assert!(report.records[2].has_error());
    }

    #[test]
    fn test_successful_base_entry_never_replaced() {
        let base = vec![ok("p1", "claude_fast", "original")];
        let regenerated = vec![ok("p1", "claude_fast", "regen")];
        let report = collate(base, &regenerated, true);

        assert_eq!(report.records[0].justification.as_deref(), Some("original"));
        assert_eq!(report.added, 0);
    }

    #[test]
    fn test_add_missing_appends_new_successes_only() {
        let base = vec![bad("p1", "claude_fast")];
        let regenerated = vec![ok("p9", "gpt_fast", "new"), bad("p8", "gpt_fast")];
        let report = collate(base, &regenerated, true);

        assert_eq!(report.added, 1);
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.records[1].prompt_id, "p9");
    }

    #[test]
    fn test_add_missing_follows_regenerated_order() {
        let regenerated = vec![
            ok("p9", "gpt_fast", "first"),
            ok("p2", "claude_fast", "second"),
            bad("p1", "gpt_fast"),
            ok("p5", "gemini_flash", "third"),
            ok("p9", "gpt_fast", "retried"),
        ];
        let report = collate(Vec::new(), &regenerated, true);

        let added: Vec<(&str, Option<&str>)> = report
            .records
            .iter()
            .map(|r| (r.prompt_id.as_str(), r.justification.as_deref()))
            .collect();
        assert_eq!(
            added,
            vec![
                ("p9", Some("retried")),
                ("p2", Some("second")),
                ("p5", Some("third")),
            ]
        );
        assert_eq!(report.added, 3);
    }

    #[test]
    fn test_empty_error_string_counts_as_failure() {
        let report = collate(vec![bad("p1", "a")], &[ok("p1", "a", "fixed")], false);
        assert_eq!(report.replaced, 1);
    }
}
