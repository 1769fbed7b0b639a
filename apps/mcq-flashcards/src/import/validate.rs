//! Turning untrusted service output into cards.

use serde_json::Value;
use thiserror::Error;

use crate::models::{CardError, FlashcardMcq, IdGenerator};

/// Why a single record was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error("record is not an object")]
    NotAnObject,
    #[error("\"question\" is missing or not a string")]
    QuestionNotString,
    #[error("\"question\" is empty")]
    EmptyQuestion,
    #[error("\"options\" is missing or not an array")]
    OptionsNotArray,
    #[error("option {0} is not a string")]
    OptionNotString(usize),
    #[error("\"correctOptionIndex\" is missing or not an integer")]
    IndexNotInteger,
    #[error("\"correctOptionIndex\" {index} is out of range for {len} options")]
    IndexOutOfRange { index: i64, len: usize },
    #[error(transparent)]
    Card(#[from] CardError),
}

/// A structurally valid record, not yet a card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportCandidate {
    pub question: String,
    pub options: Vec<String>,
    pub correct_option_index: usize,
    pub explanation: Option<String>,
    pub topic: Option<String>,
}

impl ImportCandidate {
    /// Promote to a card with fresh ids and normalized optional fields.
    pub fn into_card(self, ids: &dyn IdGenerator) -> Result<FlashcardMcq, CardError> {
        Ok(
            FlashcardMcq::new(ids, self.question, self.options, self.correct_option_index)?
                .with_topic(self.topic)
                .with_explanation(self.explanation),
        )
    }
}

/// Remove a surrounding ```` ``` ```` fence (with optional language tag).
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// JSON type name, for diagnostics.
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Check one record's shape.
pub fn parse_candidate(value: &Value) -> Result<ImportCandidate, RecordError> {
    let obj = value.as_object().ok_or(RecordError::NotAnObject)?;

    let question = obj
        .get("question")
        .and_then(Value::as_str)
        .ok_or(RecordError::QuestionNotString)?;
    if question.trim().is_empty() {
        return Err(RecordError::EmptyQuestion);
    }

    let options = obj
        .get("options")
        .and_then(Value::as_array)
        .ok_or(RecordError::OptionsNotArray)?
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_str()
                .map(str::to_string)
                .ok_or(RecordError::OptionNotString(i))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let index = obj
        .get("correctOptionIndex")
        .and_then(as_integer)
        .ok_or(RecordError::IndexNotInteger)?;
    let correct_option_index = usize::try_from(index)
        .ok()
        .filter(|&i| i < options.len())
        .ok_or(RecordError::IndexOutOfRange {
            index,
            len: options.len(),
        })?;

    Ok(ImportCandidate {
        question: question.to_string(),
        options,
        correct_option_index,
        explanation: optional_string(obj.get("explanation")),
        topic: optional_string(obj.get("topic")),
    })
}

/// Validate and promote one record.
pub fn validate_record(value: &Value, ids: &dyn IdGenerator) -> Result<FlashcardMcq, RecordError> {
    Ok(parse_candidate(value)?.into_card(ids)?)
}

fn as_integer(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

// Non-string values in optional fields are dropped rather than rejected.
fn optional_string(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_string)
}
