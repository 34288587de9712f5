//! Recovery parser: extract one JSON object from noisy model output.
//!
//! Strategies, in order:
//! 1. Strip a leading/trailing code fence
//! 2. Strict parse of the stripped text
//! 3. Bracket-balanced scan for the first candidate object (quote and
//!    escape aware)
//! 4. Strict parse of the candidate, then again after trailing-comma repair
//!
//! The first balanced span that parses wins, never the largest or last.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use std::ops::Range;
use thiserror::Error;

use crate::types::PREVIEW_CHARS;

lazy_static! {
    /// Opening fence with optional language tag (```json, ```JSON, ```)
    static ref LEADING_FENCE: Regex = Regex::new(r"^```[A-Za-z0-9_+-]*[ \t]*\r?\n?").unwrap();
}

/// Errors from recovery parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("No JSON object found in response: {preview}")]
    NoObject { preview: String },

    #[error("Could not parse JSON from response ({reason}): {preview}")]
    Malformed { reason: String, preview: String },
}

impl ParseError {
    /// Truncated input kept for diagnostics.
    pub fn preview(&self) -> &str {
        match self {
            ParseError::NoObject { preview } | ParseError::Malformed { preview, .. } => preview,
        }
    }
}

/// Extract the first well-formed JSON object from `text`.
pub fn extract_json_object(text: &str) -> Result<Map<String, Value>, ParseError> {
    let stripped = strip_code_fence(text);

    if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(stripped) {
        return Ok(object);
    }

    let mut last_error: Option<String> = None;
    for span in CandidateSpans::new(stripped) {
        let candidate = &stripped[span];
        match parse_object(candidate) {
            Ok(object) => return Ok(object),
            Err(strict_error) => {
                let repaired = strip_trailing_commas(candidate);
                match parse_object(&repaired) {
                    Ok(object) => {
                        tracing::debug!("Recovered JSON object after trailing-comma repair");
                        return Ok(object);
                    }
                    Err(_) => last_error = Some(strict_error),
                }
            }
        }
    }

    let preview = preview(text);
    Err(match last_error {
        Some(reason) => ParseError::Malformed { reason, preview },
        None => ParseError::NoObject { preview },
    })
}

/// Remove a leading fence line and a trailing fence marker, if present.
pub fn strip_code_fence(text: &str) -> &str {
    let mut body = text.trim();
    if let Some(fence) = LEADING_FENCE.find(body) {
        body = &body[fence.end()..];
    }
    if let Some(stripped) = body.strip_suffix("```") {
        body = stripped;
    }
    body.trim()
}

/// Remove commas that directly precede a closing `}` or `]`.
///
/// Commas inside string literals are left alone.
pub fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }

    out
}

fn parse_object(candidate: &str) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(other) => Err(format!("expected object, found {}", json_kind(&other))),
        Err(e) => Err(e.to_string()),
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn preview(text: &str) -> String {
    let mut preview: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().nth(PREVIEW_CHARS).is_some() {
        preview.push_str("...");
    }
    preview
}

/// Iterator over balanced `{...}` spans, in order of their opening brace.
///
/// After yielding a span the scan resumes past its closing brace; objects
/// nested inside a balanced span are never candidates on their own.
struct CandidateSpans<'a> {
    bytes: &'a [u8],
    from: usize,
}

impl<'a> CandidateSpans<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            bytes: text.as_bytes(),
            from: 0,
        }
    }
}

impl Iterator for CandidateSpans<'_> {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let span = find_balanced(self.bytes, self.from)?;
        self.from = span.end;
        Some(span)
    }
}

/// Find the first balanced object starting at or after `from`.
///
/// Brackets count only outside string literals; a backslash inside a string
/// escapes the next byte. A mismatched closer, or input ending with the
/// stack still open, discards the candidate and the scan resumes after its
/// opening brace. All delimiters are ASCII, so byte offsets are always char
/// boundaries.
fn find_balanced(bytes: &[u8], mut from: usize) -> Option<Range<usize>> {
    'candidate: loop {
        let start = from + bytes.get(from..)?.iter().position(|&b| b == b'{')?;
        let mut stack: Vec<u8> = vec![b'}'];
        let mut in_string = false;
        let mut escaped = false;

        for (i, &b) in bytes.iter().enumerate().skip(start + 1) {
            if in_string {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_string = false;
                }
                continue;
            }

            match b {
                b'"' => in_string = true,
                b'{' => stack.push(b'}'),
                b'[' => stack.push(b']'),
                b'}' | b']' => {
                    if stack.pop() != Some(b) {
                        from = start + 1;
                        continue 'candidate;
                    }
                    if stack.is_empty() {
                        return Some(start..i + 1);
                    }
                }
                _ => {}
            }
        }

        // Unterminated
        from = start + 1;
    }
}
