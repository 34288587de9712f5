//! # blindjudge-core
//!
//! Deterministic building blocks of blind multi-judge evaluation.
//!
//! Several generators answer the same prompt. Before a judge sees the
//! answers they are shuffled and relabelled `A, B, C, ...`, so the judge
//! cannot tell which vendor wrote which. The judge's reply is recovered
//! from whatever shape it arrives in and validated against the label set.
//!
//! This crate does no I/O and no async work:
//!
//! - [`anonymize`]: seeded shuffle and label assignment
//! - [`parser`]: recovery of a JSON object from noisy model output
//! - [`normalize`]: validation of a judge's reply into judgment fields
//! - [`record`]: persisted record format, schema validation, collation
//!
//! ## Example
//!
//! ```rust,ignore
//! use blindjudge_core::{anonymize, normalize, BackendOutput};
//!
//! let blind = anonymize(&answers, Some(42))?;
//! let reply = BackendOutput::Text(raw_model_text);
//! let fields = normalize(&reply, &blind.mapping)?;
//! println!("winner: {}", blind.mapping.answer_id(fields.ranking[0]).unwrap());
//! ```

pub mod anonymize;
pub mod normalize;
pub mod parser;
pub mod record;
pub mod types;

// Re-export main types at crate root
pub use anonymize::{anonymize, derive_task_seed, AnonymizeError, Anonymized, SeedScope};
pub use normalize::{
    judgment_output_schema, normalize, strict_schema, validate_judgment, BackendOutput,
    NormalizeError, SchemaError,
};
pub use parser::{extract_json_object, ParseError};
pub use record::{
    collate, parse_records, records_to_json, validate_record_schema, validate_records,
    CollateReport, JudgmentRecord, RecordError, RecordIssue,
};
pub use types::{
    group_by_prompt, preview_text, AnonymizedAnswer, Answer, AnswerRecord, Judgment,
    JudgmentFailure, JudgmentFields, JudgmentOutcome, Label, LabelMapping, Prompt,
    PromptAnswers, Task, MAX_LABELS, MIN_LABELS, PREVIEW_CHARS,
};
