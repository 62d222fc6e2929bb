//! Extraction of structured records from free-form model replies.
//!
//! Replies are tried against three strategies in order, first success wins:
//! the whole text, the outermost brace span, and the brace span after code
//! fences and line breaks are stripped. Every attempt is checked for the
//! record's required fields; unknown fields are tolerated.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::core::records::StructuredRecord;

/// Extraction strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    /// Parse the entire reply.
    Whole,
    /// Parse from the first `{` to the last `}`.
    Braces,
    /// Strip fences and line breaks, then parse the brace span.
    Cleaned,
}

impl ParseStrategy {
    pub const ALL: [ParseStrategy; 3] = [
        ParseStrategy::Whole,
        ParseStrategy::Braces,
        ParseStrategy::Cleaned,
    ];

    fn candidate(self, raw: &str) -> Option<String> {
        match self {
            ParseStrategy::Whole => Some(raw.trim().to_string()),
            ParseStrategy::Braces => brace_span(raw).map(str::to_string),
            ParseStrategy::Cleaned => {
                let cleaned = strip_wrappers(raw);
                brace_span(&cleaned).map(str::to_string)
            }
        }
    }
}

impl std::fmt::Display for ParseStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseStrategy::Whole => write!(f, "whole"),
            ParseStrategy::Braces => write!(f, "braces"),
            ParseStrategy::Cleaned => write!(f, "cleaned"),
        }
    }
}

/// Why one strategy did not yield a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub strategy: ParseStrategy,
    pub reason: String,
}

/// No strategy produced a schema-valid object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no valid {kind} record in reply ({})", describe_attempts(.attempts))]
pub struct ParseFailure {
    pub kind: &'static str,
    pub attempts: Vec<Attempt>,
}

fn describe_attempts(attempts: &[Attempt]) -> String {
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.strategy, a.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Substring from the first `{` to the last `}` inclusive.
fn brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Remove code-fence markers and embedded line breaks.
fn strip_wrappers(text: &str) -> String {
    text.replace("```json", "")
        .replace("```JSON", "")
        .replace("```", "")
        .replace(['\r', '\n'], " ")
}

fn check_object(candidate: &str, required: &[&str]) -> Result<Map<String, Value>, String> {
    let value: Value = serde_json::from_str(candidate).map_err(|e| e.to_string())?;
    let Value::Object(object) = value else {
        return Err("not an object".to_string());
    };

    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|field| !object.contains_key(*field))
        .collect();
    if !missing.is_empty() {
        return Err(format!("missing fields: {}", missing.join(", ")));
    }

    Ok(object)
}

fn extract(
    raw: &str,
    required: &[&str],
    kind: &'static str,
) -> Result<Map<String, Value>, ParseFailure> {
    let mut attempts = Vec::with_capacity(ParseStrategy::ALL.len());

    for strategy in ParseStrategy::ALL {
        let Some(candidate) = strategy.candidate(raw) else {
            attempts.push(Attempt {
                strategy,
                reason: "no braces".to_string(),
            });
            continue;
        };

        match check_object(&candidate, required) {
            Ok(object) => {
                tracing::debug!(%strategy, kind, "parsed model reply");
                return Ok(object);
            }
            Err(reason) => attempts.push(Attempt { strategy, reason }),
        }
    }

    Err(ParseFailure { kind, attempts })
}

/// Extract an object containing every field in `required`.
pub fn parse_object(raw: &str, required: &[&str]) -> Result<Map<String, Value>, ParseFailure> {
    extract(raw, required, "object")
}

/// Extract and decode a record of type `R`.
pub fn parse<R: StructuredRecord>(raw: &str) -> Result<R, ParseFailure> {
    extract(raw, R::REQUIRED_FIELDS, R::KIND).map(|object| R::from_object(&object))
}
