//! Persisted judgment records.
//!
//! A record file is a JSON array of entries keyed by
//! `(prompt_id, judge_model)`. An entry is either a judgment (ranking,
//! scores, justification, mapping, answer previews) or a failure (error and
//! the mapping in effect when it failed).

mod collate;
mod schema;

pub use collate::{collate, CollateReport};
pub use schema::{is_valid_record, validate_record_schema};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::parser::json_kind;
use crate::types::{AnonymizedAnswer, JudgmentOutcome, Label, LabelMapping};

/// Errors from reading or writing record files.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Invalid record JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record file must be a JSON array, found {0}")]
    NotArray(&'static str),

    #[error("Record {index} failed schema validation: {}", errors.join("; "))]
    Schema { index: usize, errors: Vec<String> },

    #[error("Failed to load record schema: {0}")]
    SchemaLoad(String),
}

/// One persisted outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgmentRecord {
    pub prompt_id: String,
    pub judge_model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ranking: Option<Vec<Label>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<BTreeMap<Label, u8>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,

    #[serde(default)]
    pub mapping: LabelMapping,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymized_answers: Option<Vec<AnonymizedAnswer>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JudgmentRecord {
    /// An entry carrying `error` is a failure, even if the message is empty.
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// The `(prompt_id, judge_model)` key.
    pub fn key(&self) -> (&str, &str) {
        (&self.prompt_id, &self.judge_model)
    }
}

impl From<&JudgmentOutcome> for JudgmentRecord {
    fn from(outcome: &JudgmentOutcome) -> Self {
        match outcome {
            JudgmentOutcome::Judged(j) => Self {
                prompt_id: j.prompt_id.clone(),
                judge_model: j.judge_id.clone(),
                ranking: Some(j.ranking.clone()),
                scores: Some(j.scores.clone()),
                justification: Some(j.justification.clone()),
                mapping: j.mapping.clone(),
                anonymized_answers: Some(j.previews.clone()),
                error: None,
            },
            JudgmentOutcome::Failed(f) => Self {
                prompt_id: f.prompt_id.clone(),
                judge_model: f.judge_id.clone(),
                ranking: None,
                scores: None,
                justification: None,
                mapping: f.mapping.clone(),
                anonymized_answers: None,
                error: Some(f.error.clone()),
            },
        }
    }
}

/// Schema violations of one entry in a record file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordIssue {
    pub index: usize,
    pub errors: Vec<String>,
}

/// Validate every entry of a record file, collecting all violations.
pub fn validate_records(value: &Value) -> Result<Vec<RecordIssue>, RecordError> {
    let entries = value
        .as_array()
        .ok_or_else(|| RecordError::NotArray(json_kind(value)))?;

    Ok(entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            validate_record_schema(entry)
                .err()
                .map(|errors| RecordIssue { index, errors })
        })
        .collect())
}

/// Parse a record file, validating each entry against the schema.
pub fn parse_records(json: &str) -> Result<Vec<JudgmentRecord>, RecordError> {
    let value: Value = serde_json::from_str(json)?;
    let entries = value
        .as_array()
        .ok_or_else(|| RecordError::NotArray(json_kind(&value)))?;

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            validate_record_schema(entry).map_err(|errors| RecordError::Schema { index, errors })?;
            Ok(serde_json::from_value(entry.clone())?)
        })
        .collect()
}

/// Serialize records as a pretty-printed JSON array.
pub fn records_to_json(records: &[JudgmentRecord]) -> Result<String, RecordError> {
    Ok(serde_json::to_string_pretty(records)?)
}
