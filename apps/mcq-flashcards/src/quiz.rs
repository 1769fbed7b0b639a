//! Self-quiz sessions over a set of cards.

use crate::models::{CardId, FlashcardMcq, OptionId};
use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuizError {
    #[error("quiz is already complete")]
    Finished,
    #[error("current question was already answered")]
    AlreadyAnswered,
    #[error("option {0} does not belong to the current question")]
    UnknownOption(OptionId),
}

/// How a session is built.
#[derive(Debug, Clone, Default)]
pub struct QuizSettings {
    /// Shuffle each card's options as well as the card order.
    pub shuffle_options: bool,
    /// Keep at most this many questions.
    pub question_limit: Option<usize>,
}

/// Result of answering one question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerOutcome {
    pub correct: bool,
    pub correct_option_id: OptionId,
    pub explanation: Option<String>,
}

/// A shuffled run through a set of cards.
#[derive(Debug, Clone)]
pub struct QuizSession {
    cards: Vec<FlashcardMcq>,
    current_index: usize,
    answers: Vec<(CardId, OptionId, bool)>,
    current_answered: bool,
}

impl QuizSession {
    pub fn new<R: Rng + ?Sized>(
        mut cards: Vec<FlashcardMcq>,
        settings: &QuizSettings,
        rng: &mut R,
    ) -> Self {
        cards.shuffle(rng);
        if let Some(limit) = settings.question_limit {
            cards.truncate(limit);
        }
        if settings.shuffle_options {
            for card in &mut cards {
                card.options.shuffle(rng);
            }
        }

        Self {
            cards,
            current_index: 0,
            answers: Vec::new(),
            current_answered: false,
        }
    }

    pub fn current(&self) -> Option<&FlashcardMcq> {
        self.cards.get(self.current_index)
    }

    /// Answer the current question.
    pub fn answer(&mut self, option_id: OptionId) -> Result<AnswerOutcome, QuizError> {
        let card = self.cards.get(self.current_index).ok_or(QuizError::Finished)?;
        if self.current_answered {
            return Err(QuizError::AlreadyAnswered);
        }
        if !card.options.iter().any(|o| o.id == option_id) {
            return Err(QuizError::UnknownOption(option_id));
        }

        let correct = card.is_correct(option_id);
        self.answers.push((card.id, option_id, correct));
        self.current_answered = true;

        Ok(AnswerOutcome {
            correct,
            correct_option_id: card.correct_option_id,
            explanation: card.explanation.clone(),
        })
    }

    /// Move to the next question. Unanswered questions count as skipped.
    pub fn next_question(&mut self) -> bool {
        if self.is_complete() {
            return false;
        }
        self.current_index += 1;
        self.current_answered = false;
        !self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.current_index >= self.cards.len()
    }

    pub fn is_current_answered(&self) -> bool {
        self.current_answered
    }

    pub fn total(&self) -> usize {
        self.cards.len()
    }

    /// 1-based position of the current question.
    pub fn position(&self) -> usize {
        (self.current_index + 1).min(self.cards.len())
    }

    pub fn answered(&self) -> usize {
        self.answers.len()
    }

    pub fn score(&self) -> usize {
        self.answers.iter().filter(|(_, _, correct)| *correct).count()
    }

    pub fn accuracy(&self) -> f64 {
        if self.answers.is_empty() {
            0.0
        } else {
            self.score() as f64 / self.answers.len() as f64
        }
    }

    pub fn cards(&self) -> &[FlashcardMcq] {
        &self.cards
    }
}
