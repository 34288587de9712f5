//! JSON Schema validation for persisted judgment records.
//!
//! Each entry of a record file is validated against
//! spec/judgment-record.schema.json, embedded at compile time.

use std::sync::OnceLock;

use super::RecordError;

/// Embedded record schema (loaded at compile time).
const RECORD_SCHEMA_JSON: &str = include_str!("../../../../spec/judgment-record.schema.json");

/// Compiled JSON Schema validator (initialized once, reused).
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

fn get_validator() -> Result<&'static jsonschema::Validator, RecordError> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = match serde_json::from_str(RECORD_SCHEMA_JSON) {
            Ok(v) => v,
            Err(e) => return Err(format!("Invalid schema JSON: {}", e)),
        };

        match jsonschema::options().build(&schema_value) {
            Ok(v) => Ok(v),
            Err(e) => Err(format!("Failed to compile schema: {}", e)),
        }
    });

    match result {
        Ok(v) => Ok(v),
        Err(e) => Err(RecordError::SchemaLoad(e.clone())),
    }
}

/// Validate one record entry against the schema.
///
/// Returns every violation, formatted with its instance path.
pub fn validate_record_schema(entry: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e.to_string()])?;

    let errors: Vec<String> = validator
        .iter_errors(entry)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Check a record entry without collecting messages.
pub fn is_valid_record(entry: &serde_json::Value) -> bool {
    get_validator()
        .map(|v| v.is_valid(entry))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn judged() -> serde_json::Value {
        json!({
            "prompt_id": "writing_081",
            "judge_model": "claude_fast",
            "ranking": ["B", "A"],
            "scores": {"A": 5, "B": 8},
            "justification": "B is clearer.",
            "mapping": {"A": "writing_081_gpt_fast", "B": "writing_081_claude_fast"},
            "anonymized_answers": [
                {"label": "A", "text": "First..."},
                {"label": "B", "text": "Second..."}
            ]
        })
    }

    #[test]
    fn test_judged_record_passes() {
        assert!(validate_record_schema(&judged()).is_ok());
    }

    #[test]
    fn test_failed_record_passes() {
        let value = json!({
            "prompt_id": "writing_081",
            "judge_model": "gpt_thinking",
            "error": "Invalid judgment field 'ranking': expected 2 labels, found 1",
            "mapping": {"A": "x", "B": "y"}
        });
        assert!(validate_record_schema(&value).is_ok());

        let without_mapping = json!({
            "prompt_id": "writing_081",
            "judge_model": "gpt_thinking",
            "error": "Cannot anonymize 1 answers"
        });
        assert!(is_valid_record(&without_mapping));
    }

    #[test]
    fn test_missing_identity_fails() {
        let mut value = judged();
        value.as_object_mut().unwrap().remove("judge_model");
        let errors = validate_record_schema(&value).unwrap_err();
        assert!(!errors.is_empty());
    }

    #[test]
    fn test_score_out_of_range_fails() {
        let mut value = judged();
        value["scores"]["B"] = json!(11);
        assert!(!is_valid_record(&value));
    }

    #[test]
    fn test_bad_label_fails() {
        let mut value = judged();
        value["mapping"] = json!({"a": "x", "B": "y"});
        assert!(!is_valid_record(&value));
    }

    #[test]
    fn test_neither_judgment_nor_error_fails() {
        let value = json!({"prompt_id": "p1", "judge_model": "claude_fast"});
        assert!(!is_valid_record(&value));
    }
}
