//! Multiple-choice flashcards with a local card store and AI-assisted PDF
//! import.

pub mod app;
pub mod config;
pub mod import;
pub mod models;
pub mod quiz;
pub mod storage;
pub mod store;

pub use app::{user_message, App, ImportSlot, ImportSummary, QuizFilter};
pub use config::Config;
pub use import::{ExtractReport, ImportError, ImportPipeline, ImportResult};
pub use models::{CardId, FlashcardMcq, IdGenerator, McqOption, OptionId, UuidGenerator};
pub use quiz::{AnswerOutcome, QuizSession, QuizSettings};
pub use storage::{KeyValueStorage, MemoryStorage, SqliteStorage, StorageError};
pub use store::CardStore;
