//! Response normalizer.
//!
//! Judge backends answer in one of two shapes: a structured JSON value
//! (native structured output) or free text that should contain a JSON
//! object. Both are reduced to [`JudgmentFields`] validated against the
//! task's label set.

use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::parser::{extract_json_object, json_kind, ParseError};
use crate::types::{JudgmentFields, Label, LabelMapping};

/// Lowest allowed score.
pub const MIN_SCORE: i64 = 0;

/// Highest allowed score.
pub const MAX_SCORE: i64 = 10;

/// Fields every judgment must carry.
pub const REQUIRED_FIELDS: [&str; 3] = ["ranking", "scores", "justification"];

/// What a backend returned.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendOutput {
    /// Native structured output (or a loosely-typed mapping)
    Structured(Value),

    /// Raw text expected to contain a JSON object
    Text(String),
}

/// A judgment that violates the schema. Names the offending field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid judgment field '{field}': {reason}")]
pub struct SchemaError {
    pub field: String,
    pub reason: String,
}

impl SchemaError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors from normalization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Reduce a backend's output to validated judgment fields.
///
/// Structured objects are validated as-is and never touch the recovery
/// parser. Text (including a structured JSON string) is parsed first.
pub fn normalize(
    output: &BackendOutput,
    mapping: &LabelMapping,
) -> Result<JudgmentFields, NormalizeError> {
    match output {
        BackendOutput::Structured(Value::Object(object)) => Ok(validate_judgment(object, mapping)?),
        BackendOutput::Structured(Value::String(text)) | BackendOutput::Text(text) => {
            let object = extract_json_object(text)?;
            Ok(validate_judgment(&object, mapping)?)
        }
        BackendOutput::Structured(other) => Err(SchemaError::new(
            "judgment",
            format!("expected an object, found {}", json_kind(other)),
        )
        .into()),
    }
}

/// Validate a judgment object against the task's label set.
pub fn validate_judgment(
    object: &Map<String, Value>,
    mapping: &LabelMapping,
) -> Result<JudgmentFields, SchemaError> {
    for field in REQUIRED_FIELDS {
        if !object.contains_key(field) {
            return Err(SchemaError::new(field, "missing required field"));
        }
    }

    let ranking = validate_ranking(&object["ranking"], mapping)?;
    let scores = validate_scores(&object["scores"], mapping)?;
    let justification = object["justification"]
        .as_str()
        .ok_or_else(|| {
            SchemaError::new(
                "justification",
                format!("expected a string, found {}", json_kind(&object["justification"])),
            )
        })?
        .to_string();

    Ok(JudgmentFields {
        ranking,
        scores,
        justification,
    })
}

fn validate_ranking(value: &Value, mapping: &LabelMapping) -> Result<Vec<Label>, SchemaError> {
    let items = value.as_array().ok_or_else(|| {
        SchemaError::new(
            "ranking",
            format!("expected an array of labels, found {}", json_kind(value)),
        )
    })?;

    if items.len() != mapping.len() {
        return Err(SchemaError::new(
            "ranking",
            format!("expected {} labels, found {}", mapping.len(), items.len()),
        ));
    }

    let mut seen = BTreeSet::new();
    let mut ranking = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let field = format!("ranking[{}]", i);
        let label = item
            .as_str()
            .and_then(Label::parse)
            .ok_or_else(|| SchemaError::new(&field, format!("expected a label, found {}", item)))?;

        if !mapping.contains(label) {
            return Err(SchemaError::new(
                field,
                format!("label {} is not in the answer set", label),
            ));
        }
        if !seen.insert(label) {
            return Err(SchemaError::new(field, format!("duplicate label {}", label)));
        }
        ranking.push(label);
    }

    Ok(ranking)
}

fn validate_scores(value: &Value, mapping: &LabelMapping) -> Result<BTreeMap<Label, u8>, SchemaError> {
    let entries = value.as_object().ok_or_else(|| {
        SchemaError::new(
            "scores",
            format!("expected an object keyed by label, found {}", json_kind(value)),
        )
    })?;

    let mut scores = BTreeMap::new();
    for (key, raw) in entries {
        let field = format!("scores.{}", key);
        let label = Label::parse(key)
            .filter(|label| mapping.contains(*label))
            .ok_or_else(|| SchemaError::new(&field, "key is not a label in the answer set"))?;

        let score = integer_score(raw).map_err(|reason| SchemaError::new(&field, reason))?;
        if !(MIN_SCORE..=MAX_SCORE).contains(&score) {
            return Err(SchemaError::new(
                field,
                format!("score {} outside [{}, {}]", score, MIN_SCORE, MAX_SCORE),
            ));
        }
        scores.insert(label, score as u8);
    }

    if let Some(missing) = mapping.labels().into_iter().find(|l| !scores.contains_key(l)) {
        return Err(SchemaError::new(format!("scores.{}", missing), "missing score"));
    }

    Ok(scores)
}

/// Integral numbers only; `7.0` counts as 7, `7.5` and `"7"` do not.
fn integer_score(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Ok(i);
            }
            match n.as_f64() {
                Some(f) if f.is_finite() && f.fract() == 0.0 => Ok(f as i64),
                _ => Err(format!("expected an integer score, found {}", n)),
            }
        }
        other => Err(format!("expected an integer score, found {}", json_kind(other))),
    }
}

/// JSON Schema for a judgment over `labels`, for backends with native
/// structured output.
pub fn judgment_output_schema(labels: &[Label]) -> Value {
    let names: Vec<String> = labels.iter().map(|l| l.to_string()).collect();
    let score_properties: Map<String, Value> = names
        .iter()
        .map(|name| {
            (
                name.clone(),
                json!({"type": "integer", "minimum": MIN_SCORE, "maximum": MAX_SCORE}),
            )
        })
        .collect();

    json!({
        "type": "object",
        "properties": {
            "ranking": {
                "type": "array",
                "description": "Answer labels ordered from best to worst",
                "items": {"type": "string", "enum": names},
                "minItems": labels.len(),
                "maxItems": labels.len(),
                "uniqueItems": true
            },
            "scores": {
                "type": "object",
                "description": "Score from 0 to 10 for every label",
                "properties": score_properties,
                "required": names,
                "additionalProperties": false
            },
            "justification": {
                "type": "string",
                "description": "Short justification focused on answer quality"
            }
        },
        "required": REQUIRED_FIELDS,
        "additionalProperties": false
    })
}

/// Patch a schema for OpenAI-compatible strict mode.
///
/// Every object schema gets `additionalProperties: false` unless it sets
/// one, and `description` is dropped next to `$ref`.
pub fn strict_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(object) => {
            let mut patched = Map::with_capacity(object.len() + 1);
            let has_ref = object.contains_key("$ref");
            for (key, value) in object {
                if has_ref && key == "description" {
                    continue;
                }
                let value = match key.as_str() {
                    "additionalProperties" | "$ref" | "description" | "enum" | "required" => {
                        value.clone()
                    }
                    "properties" | "$defs" => match value {
                        Value::Object(entries) => Value::Object(
                            entries
                                .iter()
                                .map(|(name, sub)| (name.clone(), strict_schema(sub)))
                                .collect(),
                        ),
                        other => other.clone(),
                    },
                    _ => strict_schema(value),
                };
                patched.insert(key.clone(), value);
            }
            if object.get("type").and_then(Value::as_str) == Some("object")
                && !patched.contains_key("additionalProperties")
            {
                patched.insert("additionalProperties".to_string(), Value::Bool(false));
            }
            Value::Object(patched)
        }
        Value::Array(items) => Value::Array(items.iter().map(strict_schema).collect()),
        other => other.clone(),
    }
}
