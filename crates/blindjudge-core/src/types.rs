//! Core data model for blind judging.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Maximum number of competing answers in one judging task (`A..F`).
pub const MAX_LABELS: usize = 6;

/// Minimum number of competing answers in one judging task.
pub const MIN_LABELS: usize = 2;

/// Number of characters kept in anonymized answer previews.
pub const PREVIEW_CHARS: usize = 200;

/// A prompt that every vendor answered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Prompt {
    /// Stable prompt identifier (e.g., "writing_081")
    pub id: String,

    /// Category used by downstream reporting
    #[serde(default)]
    pub category: String,

    /// The question put to every generator
    pub text: String,
}

/// One generator's answer to one prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Answer {
    pub answer_id: String,
    pub prompt_id: String,
    pub vendor: String,
    pub tier: String,
    pub text: String,
}

/// An answer entry as stored in answer files.
///
/// Answer files repeat the prompt text and category on every entry; the
/// short field names are accepted as aliases.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerRecord {
    pub answer_id: String,
    pub prompt_id: String,
    #[serde(default)]
    pub prompt_text: String,
    #[serde(default)]
    pub category: String,
    #[serde(alias = "vendor")]
    pub model_vendor: String,
    #[serde(alias = "tier")]
    pub model_tier: String,
    #[serde(alias = "text")]
    pub answer_text: String,
}

impl AnswerRecord {
    /// The answer part of this record.
    pub fn to_answer(&self) -> Answer {
        Answer {
            answer_id: self.answer_id.clone(),
            prompt_id: self.prompt_id.clone(),
            vendor: self.model_vendor.clone(),
            tier: self.model_tier.clone(),
            text: self.answer_text.clone(),
        }
    }
}

/// All answers competing on one prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptAnswers {
    pub prompt: Prompt,
    pub answers: Vec<Answer>,
}

/// Group answer records by prompt, in order of first appearance.
///
/// Prompt text and category come from the first record of each group.
pub fn group_by_prompt(records: &[AnswerRecord]) -> Vec<PromptAnswers> {
    let mut groups: Vec<PromptAnswers> = Vec::new();
    let mut index: BTreeMap<&str, usize> = BTreeMap::new();

    for record in records {
        match index.get(record.prompt_id.as_str()) {
            Some(&slot) => groups[slot].answers.push(record.to_answer()),
            None => {
                index.insert(record.prompt_id.as_str(), groups.len());
                groups.push(PromptAnswers {
                    prompt: Prompt {
                        id: record.prompt_id.clone(),
                        category: record.category.clone(),
                        text: record.prompt_text.clone(),
                    },
                    answers: vec![record.to_answer()],
                });
            }
        }
    }

    groups
}

/// A single-letter anonymized identifier (`A`, `B`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Label(char);

impl Label {
    /// The label at position `index` (0 → `A`), if within `A..=Z`.
    pub fn nth(index: usize) -> Option<Self> {
        if index < 26 {
            Some(Self((b'A' + index as u8) as char))
        } else {
            None
        }
    }

    /// Parse a label from its exact textual form.
    pub fn parse(text: &str) -> Option<Self> {
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_uppercase() => Some(Self(c)),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        self.0
    }

    /// Zero-based position of this label in the alphabet.
    pub fn index(self) -> usize {
        (self.0 as u8 - b'A') as usize
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Label {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Label::parse(&value).ok_or_else(|| format!("invalid label '{}'", value))
    }
}

impl From<Label> for String {
    fn from(label: Label) -> Self {
        label.0.to_string()
    }
}

/// Label → answer_id correspondence for one judging task.
///
/// Revealed only to the pipeline, never to the judge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelMapping(BTreeMap<Label, String>);

impl LabelMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a label; returns the previous answer id if the label was taken.
    pub fn insert(&mut self, label: Label, answer_id: impl Into<String>) -> Option<String> {
        self.0.insert(label, answer_id.into())
    }

    pub fn answer_id(&self, label: Label) -> Option<&str> {
        self.0.get(&label).map(|s| s.as_str())
    }

    pub fn contains(&self, label: Label) -> bool {
        self.0.contains_key(&label)
    }

    /// Labels in alphabetical order.
    pub fn labels(&self) -> Vec<Label> {
        self.0.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Label, &str)> {
        self.0.iter().map(|(l, id)| (*l, id.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// An answer as shown to a judge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnonymizedAnswer {
    pub label: Label,
    pub text: String,
}

impl AnonymizedAnswer {
    /// Truncated copy for persisted records.
    pub fn preview(&self) -> Self {
        Self {
            label: self.label,
            text: preview_text(&self.text, PREVIEW_CHARS),
        }
    }
}

/// First `max_chars` characters of `text` followed by `...`.
pub fn preview_text(text: &str, max_chars: usize) -> String {
    let mut preview: String = text.chars().take(max_chars).collect();
    preview.push_str("...");
    preview
}

/// The unit of concurrent work: one prompt judged by one judge.
#[derive(Debug, Clone)]
pub struct Task {
    pub prompt_id: String,
    pub prompt_text: String,
    pub answers: Arc<[Answer]>,
    pub judge_id: String,
}

/// The three validated fields a judge returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JudgmentFields {
    /// Labels from best to worst
    pub ranking: Vec<Label>,

    /// Score in `[0, 10]` for every label
    pub scores: BTreeMap<Label, u8>,

    pub justification: String,
}

/// A validated judgment of one prompt's answer set by one judge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Judgment {
    pub prompt_id: String,
    pub judge_id: String,
    pub ranking: Vec<Label>,
    pub scores: BTreeMap<Label, u8>,
    pub justification: String,
    pub mapping: LabelMapping,

    /// Truncated anonymized answers, kept for auditability
    pub previews: Vec<AnonymizedAnswer>,
}

impl Judgment {
    /// Attach task identity and mapping to validated fields.
    pub fn from_fields(
        task: &Task,
        fields: JudgmentFields,
        mapping: LabelMapping,
        anonymized: &[AnonymizedAnswer],
    ) -> Self {
        Self {
            prompt_id: task.prompt_id.clone(),
            judge_id: task.judge_id.clone(),
            ranking: fields.ranking,
            scores: fields.scores,
            justification: fields.justification,
            mapping,
            previews: anonymized.iter().map(AnonymizedAnswer::preview).collect(),
        }
    }

    /// Answer id of the top-ranked label.
    pub fn top_answer(&self) -> Option<&str> {
        self.ranking
            .first()
            .and_then(|label| self.mapping.answer_id(*label))
    }
}

/// A task whose retries were exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JudgmentFailure {
    pub prompt_id: String,
    pub judge_id: String,
    pub error: String,

    /// Empty if the shuffle step never ran
    pub mapping: LabelMapping,
}

/// Outcome of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JudgmentOutcome {
    Judged(Judgment),
    Failed(JudgmentFailure),
}

impl JudgmentOutcome {
    pub fn is_judged(&self) -> bool {
        matches!(self, JudgmentOutcome::Judged(_))
    }

    pub fn prompt_id(&self) -> &str {
        match self {
            JudgmentOutcome::Judged(j) => &j.prompt_id,
            JudgmentOutcome::Failed(f) => &f.prompt_id,
        }
    }

    pub fn judge_id(&self) -> &str {
        match self {
            JudgmentOutcome::Judged(j) => &j.judge_id,
            JudgmentOutcome::Failed(f) => &f.judge_id,
        }
    }

    pub fn mapping(&self) -> &LabelMapping {
        match self {
            JudgmentOutcome::Judged(j) => &j.mapping,
            JudgmentOutcome::Failed(f) => &f.mapping,
        }
    }
}
