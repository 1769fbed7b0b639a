//! Application state: wires the card store, the import pipeline and quiz
//! sessions together.

use crate::config::{Config, QuizConfig};
use crate::import::{GeminiClient, ImportError, ImportPipeline, ImportResult};
use crate::models::{normalize_optional, CardId, FlashcardMcq};
use crate::quiz::{QuizSession, QuizSettings};
use crate::storage::{KeyValueStorage, SqliteStorage};
use crate::store::CardStore;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Outcome of a finished import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
    pub source_name: Option<String>,
}

/// Which cards a quiz draws from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuizFilter {
    All,
    Source(String),
}

/// Tracks the single in-flight import.
///
/// Clones share state, so a clone can be handed to a signal handler or a UI
/// to cancel the import the app is currently running. Every import token is
/// a child of the slot's parent token, so cancelling the parent stops any
/// import started through this slot.
///
/// [`App::import_document`] holds `&mut App` for the whole import. A caller
/// that needs to start a second import while one is running, such as a UI
/// event loop, drives the slot directly: [`begin`](Self::begin) cancels the
/// outstanding import before handing out a new token.
#[derive(Debug, Clone, Default)]
pub struct ImportSlot {
    parent: CancellationToken,
    state: Arc<Mutex<SlotState>>,
}

#[derive(Debug, Default)]
struct SlotState {
    next_generation: u64,
    current: Option<(u64, CancellationToken)>,
}

impl ImportSlot {
    /// A slot whose imports are all cancelled when `parent` is.
    pub fn with_parent(parent: CancellationToken) -> Self {
        Self {
            parent,
            state: Arc::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cancel any outstanding import and register a new one.
    pub fn begin(&self) -> (u64, CancellationToken) {
        let mut state = self.lock();
        if let Some((generation, previous)) = state.current.take() {
            info!(generation, "cancelling outstanding import");
            previous.cancel();
        }
        let generation = state.next_generation;
        state.next_generation += 1;
        let token = self.parent.child_token();
        state.current = Some((generation, token.clone()));
        (generation, token)
    }

    /// Cancel the outstanding import, if any.
    pub fn cancel(&self) -> bool {
        match self.lock().current.as_ref() {
            Some((_, token)) if !token.is_cancelled() => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Cancel the outstanding import and every import started later.
    pub fn shutdown(&self) {
        self.parent.cancel();
    }

    pub fn is_active(&self) -> bool {
        self.lock()
            .current
            .as_ref()
            .is_some_and(|(_, token)| !token.is_cancelled())
    }

    /// Clear the slot if it still belongs to `generation`.
    fn finish(&self, generation: u64) {
        let mut state = self.lock();
        if state.current.as_ref().is_some_and(|(g, _)| *g == generation) {
            state.current = None;
        }
    }
}

pub struct App<S: KeyValueStorage = SqliteStorage> {
    pub config: Config,
    pub store: CardStore<S>,
    pipeline: ImportPipeline,
    imports: ImportSlot,
}

impl App<SqliteStorage> {
    /// Open the on-disk store and the configured extraction service.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let storage = SqliteStorage::open(&config.db_path())?;
        let client = GeminiClient::new(&config.service)?;
        let pipeline = ImportPipeline::new(Arc::new(client))
            .with_encode_chunk(config.import.encode_chunk_size);
        Ok(Self::with_parts(config, CardStore::open(storage), pipeline))
    }
}

impl<S: KeyValueStorage> App<S> {
    pub fn with_parts(config: Config, store: CardStore<S>, pipeline: ImportPipeline) -> Self {
        Self {
            config,
            store,
            pipeline,
            imports: ImportSlot::default(),
        }
    }

    /// Use `imports` for import cancellation, e.g. a slot whose parent is an
    /// app-wide shutdown token.
    pub fn with_import_slot(mut self, imports: ImportSlot) -> Self {
        self.imports = imports;
        self
    }

    /// Handle for cancelling imports from elsewhere.
    pub fn import_slot(&self) -> ImportSlot {
        self.imports.clone()
    }

    /// Extract cards from `document`, tag them with `source_name` and
    /// append them as one batch.
    ///
    /// Any import still running through this app's [`ImportSlot`] is
    /// cancelled first. Nothing is appended unless extraction completes
    /// uncancelled.
    pub async fn import_document(
        &mut self,
        document: &[u8],
        source_name: &str,
    ) -> ImportResult<ImportSummary> {
        let (generation, token) = self.imports.begin();
        let result = self.pipeline.extract_with_report(document, &token).await;
        let cancelled = token.is_cancelled();
        self.imports.finish(generation);

        let report = result?;
        if cancelled {
            return Err(ImportError::Cancelled);
        }

        let source_name = normalize_optional(Some(source_name.to_string()));
        let cards: Vec<FlashcardMcq> = report
            .cards
            .into_iter()
            .map(|card| card.with_source(source_name.clone()))
            .collect();
        let imported = cards.len();
        self.store.bulk_append(cards);

        info!(imported, skipped = report.skipped, source = ?source_name, "import appended");
        Ok(ImportSummary {
            imported,
            skipped: report.skipped,
            source_name,
        })
    }

    pub fn cancel_import(&self) -> bool {
        self.imports.cancel()
    }

    /// Generate one card with the service and store it.
    pub async fn generate_card(
        &mut self,
        topic: &str,
        option_count: usize,
        cancel: &CancellationToken,
    ) -> ImportResult<FlashcardMcq> {
        let card = self.pipeline.generate_one(topic, option_count, cancel).await?;
        self.store.create(card.clone());
        Ok(card)
    }

    pub fn cards_for_source(&self, source_name: &str) -> Vec<&FlashcardMcq> {
        self.store.cards_for_source(source_name)
    }

    pub fn delete_source(&mut self, source_name: &str) -> usize {
        self.store.delete_source(source_name)
    }

    pub fn delete_card(&mut self, id: CardId) -> bool {
        self.store.delete(id) > 0
    }

    pub fn start_quiz(&self, filter: &QuizFilter) -> QuizSession {
        build_quiz(&self.store, filter, &self.config.quiz)
    }
}

/// Build a shuffled quiz over the cards selected by `filter`.
pub fn build_quiz<S: KeyValueStorage>(
    store: &CardStore<S>,
    filter: &QuizFilter,
    config: &QuizConfig,
) -> QuizSession {
    let cards: Vec<FlashcardMcq> = match filter {
        QuizFilter::All => store.cards().to_vec(),
        QuizFilter::Source(name) => store.cards_for_source(name).into_iter().cloned().collect(),
    };
    let settings = QuizSettings {
        shuffle_options: config.shuffle_options,
        question_limit: config.question_limit,
    };
    QuizSession::new(cards, &settings, &mut rand::thread_rng())
}

/// Text suitable for showing to the user after a failed import.
pub fn user_message(error: &ImportError) -> String {
    match error {
        ImportError::Cancelled => "Import cancelled.".to_string(),
        ImportError::MalformedResponse { .. } => {
            "The AI service returned a response that could not be read. Please try again.".to_string()
        }
        ImportError::UnexpectedShape { .. } => {
            "The AI service returned data in an unexpected format.".to_string()
        }
        ImportError::InvalidResult(reason) => format!("The generated question was unusable: {reason}"),
        ImportError::Service(e) => format!("Could not reach the AI service: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::fake::ScriptedClient;
    use crate::storage::MemoryStorage;

    const BODY: &str = r#"[
        {"question":"Q1","options":["A","B"],"correctOptionIndex":0},
        {"question":"Q2","options":["C","D"],"correctOptionIndex":1},
        {"question":"","options":["E","F"],"correctOptionIndex":0}
    ]"#;

    fn app(client: ScriptedClient) -> App<MemoryStorage> {
        let pipeline = ImportPipeline::new(Arc::new(client));
        App::with_parts(Config::default(), CardStore::open(MemoryStorage::new()), pipeline)
    }

    #[tokio::test]
    async fn test_import_tags_and_appends_once() {
        let mut app = app(ScriptedClient::replying(BODY));
        let summary = app.import_document(b"%PDF", " biology.pdf ").await.unwrap();

        assert_eq!(
            summary,
            ImportSummary {
                imported: 2,
                skipped: 1,
                source_name: Some("biology.pdf".to_string()),
            }
        );
        assert_eq!(app.store.storage().writes(), 1);
        assert_eq!(app.store.source_names(), vec!["biology.pdf"]);
        let questions: Vec<_> = app.store.cards().iter().map(|c| c.question.as_str()).collect();
        assert_eq!(questions, vec!["Q1", "Q2"]);
        assert!(!app.import_slot().is_active());
    }

    #[tokio::test]
    async fn test_blank_source_name_left_unset() {
        let mut app = app(ScriptedClient::replying(BODY));
        app.import_document(b"%PDF", "   ").await.unwrap();
        assert!(app.store.source_names().is_empty());
        assert!(app.store.cards().iter().all(|c| c.source_name.is_none()));
    }

    #[tokio::test]
    async fn test_failed_import_appends_nothing() {
        let mut app = app(ScriptedClient::replying("not json"));
        let err = app.import_document(b"%PDF", "x.pdf").await.unwrap_err();
        assert!(matches!(err, ImportError::MalformedResponse { .. }));
        assert!(app.store.is_empty());
        assert_eq!(app.store.storage().writes(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_import_appends_nothing() {
        let mut app = app(ScriptedClient::hanging());
        let slot = app.import_slot();
        tokio::spawn(async move {
            while !slot.is_active() {
                tokio::task::yield_now().await;
            }
            slot.cancel();
        });

        let err = app.import_document(b"%PDF", "x.pdf").await.unwrap_err();
        assert!(matches!(err, ImportError::Cancelled));
        assert!(app.store.is_empty());
        assert_eq!(app.store.storage().writes(), 0);
    }

    #[test]
    fn test_new_import_cancels_previous() {
        let slot = ImportSlot::default();
        let (first_gen, first) = slot.begin();
        let (second_gen, second) = slot.begin();

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_ne!(first_gen, second_gen);

        // A stale finish must not clear the newer import.
        slot.finish(first_gen);
        assert!(slot.is_active());
        slot.finish(second_gen);
        assert!(!slot.is_active());
        assert!(!slot.cancel());
    }

    #[test]
    fn test_shutdown_cancels_outstanding_and_later_imports() {
        let shutdown = CancellationToken::new();
        let slot = ImportSlot::with_parent(shutdown.clone());
        let (_, running) = slot.begin();

        shutdown.cancel();
        assert!(running.is_cancelled());
        assert!(!slot.is_active());

        let (_, later) = slot.begin();
        assert!(later.is_cancelled());
    }

    #[tokio::test]
    async fn test_import_after_shutdown_is_cancelled() {
        let slot = ImportSlot::default();
        let mut app = app(ScriptedClient::replying(BODY)).with_import_slot(slot.clone());
        slot.shutdown();

        let err = app.import_document(b"%PDF", "x.pdf").await.unwrap_err();
        assert!(matches!(err, ImportError::Cancelled));
        assert!(app.store.is_empty());
    }

    #[tokio::test]
    async fn test_second_import_through_slot_cancels_first() {
        let mut app = app(ScriptedClient::hanging());
        let slot = app.import_slot();
        let ui = slot.clone();
        let starter = tokio::spawn(async move {
            while !ui.is_active() {
                tokio::task::yield_now().await;
            }
            // A second import registering on the shared slot.
            ui.begin()
        });

        let err = app.import_document(b"%PDF", "x.pdf").await.unwrap_err();
        assert!(matches!(err, ImportError::Cancelled));
        let (_, second) = starter.await.unwrap();
        assert!(!second.is_cancelled());
        assert!(slot.is_active());
        assert!(app.store.is_empty());
    }

    #[tokio::test]
    async fn test_generate_card_is_stored() {
        let body = r#"{"question":"Q","options":["A","B","C"],"correctOptionIndex":2}"#;
        let mut app = app(ScriptedClient::replying(body));
        let card = app
            .generate_card("Chemistry", 3, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(app.store.cards(), &[card.clone()]);
        assert_eq!(card.topic.as_deref(), Some("Chemistry"));
    }

    #[tokio::test]
    async fn test_quiz_by_source() {
        let mut app = app(ScriptedClient::replying(BODY).then(Ok(BODY.to_string())));
        app.import_document(b"%PDF", "a.pdf").await.unwrap();
        app.import_document(b"%PDF", "b.pdf").await.unwrap();

        let quiz = app.start_quiz(&QuizFilter::Source("b.pdf".to_string()));
        assert_eq!(quiz.total(), 2);
        assert!(quiz
            .cards()
            .iter()
            .all(|c| c.source_name.as_deref() == Some("b.pdf")));
        assert_eq!(app.start_quiz(&QuizFilter::All).total(), 4);

        assert_eq!(app.delete_source("a.pdf"), 2);
        assert_eq!(app.cards_for_source("a.pdf").len(), 0);
        assert_eq!(app.store.len(), 2);
    }

    #[test]
    fn test_user_messages_are_distinct() {
        let malformed = user_message(&ImportError::MalformedResponse {
            message: "expected value".to_string(),
            raw: "oops".to_string(),
        });
        let shape = user_message(&ImportError::UnexpectedShape {
            expected: "array",
            found: "object",
        });
        assert_ne!(malformed, shape);
        assert!(!malformed.contains("oops"));
        assert_eq!(user_message(&ImportError::Cancelled), "Import cancelled.");
    }
}
