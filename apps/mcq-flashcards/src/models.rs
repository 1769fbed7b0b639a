//! Data models for MCQ flashcards.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Unique identifiers.
pub type CardId = Uuid;
pub type OptionId = Uuid;

/// Source of fresh identifiers for cards and options.
pub trait IdGenerator: Send + Sync {
    /// Return a globally unique identifier.
    fn new_id(&self) -> Uuid;
}

/// Random v4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn new_id(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Reasons a card fails its structural invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CardError {
    #[error("question is empty")]
    EmptyQuestion,
    #[error("a card needs at least 2 options, got {0}")]
    TooFewOptions(usize),
    #[error("option {0} has empty text")]
    EmptyOptionText(usize),
    #[error("duplicate option id {0}")]
    DuplicateOptionId(OptionId),
    #[error("correct option index {index} is out of range for {len} options")]
    CorrectIndexOutOfRange { index: usize, len: usize },
    #[error("correct option id does not match exactly one option")]
    CorrectOptionMismatch,
}

/// An answer choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McqOption {
    /// Unique within the owning card.
    pub id: OptionId,
    /// Display text.
    pub text: String,
}

/// A multiple-choice flashcard.
///
/// Serialized with the camelCase field names used by the persisted
/// collection, so stored data stays readable by other clients of the
/// same layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashcardMcq {
    /// Unique identifier.
    pub id: CardId,
    /// Question text.
    pub question: String,
    /// Answer choices, in display order.
    pub options: Vec<McqOption>,
    /// Id of the single correct option.
    pub correct_option_id: OptionId,
    /// Optional topic label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Optional explanation shown after answering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    /// Name of the document this card was imported from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
}

impl FlashcardMcq {
    /// Build a card from option texts and the index of the correct one.
    ///
    /// Fresh ids are drawn from `ids` for the card and every option.
    pub fn new(
        ids: &dyn IdGenerator,
        question: impl Into<String>,
        options: Vec<String>,
        correct_index: usize,
    ) -> Result<Self, CardError> {
        let question = question.into();
        if question.trim().is_empty() {
            return Err(CardError::EmptyQuestion);
        }
        if options.len() < 2 {
            return Err(CardError::TooFewOptions(options.len()));
        }
        if let Some(pos) = options.iter().position(|t| t.trim().is_empty()) {
            return Err(CardError::EmptyOptionText(pos));
        }
        if correct_index >= options.len() {
            return Err(CardError::CorrectIndexOutOfRange {
                index: correct_index,
                len: options.len(),
            });
        }

        let options: Vec<McqOption> = options
            .into_iter()
            .map(|text| McqOption {
                id: ids.new_id(),
                text,
            })
            .collect();
        let correct_option_id = options[correct_index].id;

        Ok(Self {
            id: ids.new_id(),
            question,
            options,
            correct_option_id,
            topic: None,
            explanation: None,
            source_name: None,
        })
    }

    /// Set topic; blank values become `None`.
    pub fn with_topic(mut self, topic: Option<String>) -> Self {
        self.topic = normalize_optional(topic);
        self
    }

    /// Set explanation; blank values become `None`.
    pub fn with_explanation(mut self, explanation: Option<String>) -> Self {
        self.explanation = normalize_optional(explanation);
        self
    }

    /// Tag with the name of the originating document.
    pub fn with_source(mut self, source_name: Option<String>) -> Self {
        self.source_name = normalize_optional(source_name);
        self
    }

    /// The option whose id is `correct_option_id`.
    pub fn correct_option(&self) -> Option<&McqOption> {
        self.options.iter().find(|o| o.id == self.correct_option_id)
    }

    /// Whether `option_id` is the correct answer.
    pub fn is_correct(&self, option_id: OptionId) -> bool {
        option_id == self.correct_option_id
    }

    /// Check the structural invariants.
    pub fn validate(&self) -> Result<(), CardError> {
        if self.question.trim().is_empty() {
            return Err(CardError::EmptyQuestion);
        }
        if self.options.len() < 2 {
            return Err(CardError::TooFewOptions(self.options.len()));
        }
        for (i, option) in self.options.iter().enumerate() {
            if option.text.trim().is_empty() {
                return Err(CardError::EmptyOptionText(i));
            }
            if self.options[..i].iter().any(|o| o.id == option.id) {
                return Err(CardError::DuplicateOptionId(option.id));
            }
        }
        let matches = self
            .options
            .iter()
            .filter(|o| o.id == self.correct_option_id)
            .count();
        if matches != 1 {
            return Err(CardError::CorrectOptionMismatch);
        }
        Ok(())
    }
}

/// Trim an optional string, mapping blank values to `None`.
pub fn normalize_optional(value: Option<String>) -> Option<String> {
    value.and_then(|s| {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            None
        } else if trimmed.len() == s.len() {
            Some(s)
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Deterministic ids for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct SequentialIds(std::sync::atomic::AtomicU64);

#[cfg(test)]
impl IdGenerator for SequentialIds {
    fn new_id(&self) -> Uuid {
        let n = self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Uuid::from_u128(n as u128 + 1)
    }
}
