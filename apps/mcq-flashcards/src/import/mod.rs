//! Import pipeline: document in, validated cards out.
//!
//! The pipeline checks its cancellation token before starting, between
//! encode chunks, while the service request is outstanding, and on every
//! record of the response. A cancelled run never returns partial results.

mod client;
mod encode;
mod prompt;
mod validate;

pub use client::{ClientError, ClientResult, ExtractionClient, GeminiClient, PromptPart, ResponseFormat};
pub use encode::encode_base64;
pub use prompt::{generate_prompt, EXTRACT_PROMPT, PDF_MIME_TYPE};
pub use validate::{json_kind, parse_candidate, strip_code_fence, validate_record, ImportCandidate, RecordError};

#[cfg(test)]
pub(crate) use client::fake;

use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::{FlashcardMcq, IdGenerator, UuidGenerator};

/// Default encode chunk: 192 KiB of input per step.
pub const DEFAULT_ENCODE_CHUNK: usize = 3 * 64 * 1024;

#[derive(Debug, Error)]
pub enum ImportError {
    /// Aborted through the cancellation token.
    #[error("Import cancelled")]
    Cancelled,
    /// The service reply was not JSON.
    #[error("Malformed response: {message}")]
    MalformedResponse { message: String, raw: String },
    /// Valid JSON, wrong top-level type.
    #[error("Unexpected response shape: expected {expected}, got {found}")]
    UnexpectedShape {
        expected: &'static str,
        found: &'static str,
    },
    /// A single generated card that cannot be used.
    #[error("Invalid result: {0}")]
    InvalidResult(String),
    /// Transport or service failure.
    #[error("Extraction service error: {0}")]
    Service(#[from] ClientError),
}

pub type ImportResult<T> = Result<T, ImportError>;

pub(crate) fn cancelled(stage: &'static str) -> ImportError {
    info!(stage, "import cancelled");
    ImportError::Cancelled
}

/// Cards from one document plus the number of rejected records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractReport {
    pub cards: Vec<FlashcardMcq>,
    pub skipped: usize,
}

pub struct ImportPipeline {
    client: Arc<dyn ExtractionClient>,
    ids: Arc<dyn IdGenerator>,
    encode_chunk: usize,
}

impl ImportPipeline {
    pub fn new(client: Arc<dyn ExtractionClient>) -> Self {
        Self {
            client,
            ids: Arc::new(UuidGenerator),
            encode_chunk: DEFAULT_ENCODE_CHUNK,
        }
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_encode_chunk(mut self, bytes: usize) -> Self {
        self.encode_chunk = bytes;
        self
    }

    /// Extract cards from a PDF. Malformed records are dropped.
    pub async fn extract(
        &self,
        document: &[u8],
        cancel: &CancellationToken,
    ) -> ImportResult<Vec<FlashcardMcq>> {
        Ok(self.extract_with_report(document, cancel).await?.cards)
    }

    /// Like [`extract`](Self::extract), also reporting how many records
    /// were dropped.
    pub async fn extract_with_report(
        &self,
        document: &[u8],
        cancel: &CancellationToken,
    ) -> ImportResult<ExtractReport> {
        if cancel.is_cancelled() {
            return Err(cancelled("start"));
        }

        let encoded = encode_base64(document, self.encode_chunk, cancel).await?;
        debug!(bytes = document.len(), encoded = encoded.len(), "document encoded");

        let parts = [
            PromptPart::text(EXTRACT_PROMPT),
            PromptPart::inline(PDF_MIME_TYPE, encoded),
        ];
        let raw = self.request(&parts, cancel).await?;

        let records = match parse_response(&raw)? {
            Value::Array(records) => records,
            other => {
                return Err(ImportError::UnexpectedShape {
                    expected: "array",
                    found: json_kind(&other),
                })
            }
        };

        let mut report = ExtractReport {
            cards: Vec::with_capacity(records.len()),
            skipped: 0,
        };
        for (index, record) in records.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(cancelled("validate"));
            }
            match validate_record(record, self.ids.as_ref()) {
                Ok(card) => report.cards.push(card),
                Err(reason) => {
                    warn!(index, %reason, "skipping malformed record");
                    report.skipped += 1;
                }
            }
        }
        if cancel.is_cancelled() {
            return Err(cancelled("validate"));
        }

        info!(
            imported = report.cards.len(),
            skipped = report.skipped,
            "extraction finished"
        );
        Ok(report)
    }

    /// Ask the service for one card about `topic` with exactly
    /// `option_count` options.
    pub async fn generate_one(
        &self,
        topic: &str,
        option_count: usize,
        cancel: &CancellationToken,
    ) -> ImportResult<FlashcardMcq> {
        if option_count < 2 {
            return Err(ImportError::InvalidResult(format!(
                "option count must be at least 2, got {option_count}"
            )));
        }
        if cancel.is_cancelled() {
            return Err(cancelled("start"));
        }

        let parts = [PromptPart::text(generate_prompt(topic, option_count))];
        let raw = self.request(&parts, cancel).await?;

        let value = parse_response(&raw)?;
        if !value.is_object() {
            return Err(ImportError::UnexpectedShape {
                expected: "object",
                found: json_kind(&value),
            });
        }

        let mut candidate =
            parse_candidate(&value).map_err(|e| ImportError::InvalidResult(e.to_string()))?;
        if candidate.options.len() != option_count {
            return Err(ImportError::InvalidResult(format!(
                "expected {option_count} options, got {}",
                candidate.options.len()
            )));
        }
        if candidate.topic.as_deref().map_or(true, |t| t.trim().is_empty()) {
            candidate.topic = Some(topic.to_string());
        }

        candidate
            .into_card(self.ids.as_ref())
            .map_err(|e| ImportError::InvalidResult(e.to_string()))
    }

    async fn request(&self, parts: &[PromptPart], cancel: &CancellationToken) -> ImportResult<String> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(cancelled("request")),
            reply = self.client.request(parts, ResponseFormat::Json) => reply.map_err(ImportError::from),
        }
    }
}

fn parse_response(raw: &str) -> ImportResult<Value> {
    serde_json::from_str(strip_code_fence(raw)).map_err(|e| {
        warn!(error = %e, "service reply is not valid JSON");
        ImportError::MalformedResponse {
            message: e.to_string(),
            raw: raw.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::fake::ScriptedClient;
    use super::*;
    use crate::models::SequentialIds;
    use base64::{engine::general_purpose::STANDARD, Engine};

    const PDF: &[u8] = b"%PDF-1.4 fake document";

    fn pipeline(client: ScriptedClient) -> (ImportPipeline, Arc<ScriptedClient>) {
        let client = Arc::new(client);
        let pipeline = ImportPipeline::new(client.clone()).with_ids(Arc::new(SequentialIds::default()));
        (pipeline, client)
    }

    /// Hands out ids until the `n`th request, which also cancels `token`.
    struct CancelOnNthId {
        token: CancellationToken,
        n: usize,
        issued: std::sync::atomic::AtomicUsize,
    }

    impl IdGenerator for CancelOnNthId {
        fn new_id(&self) -> uuid::Uuid {
            let issued = self.issued.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            if issued == self.n {
                self.token.cancel();
            }
            uuid::Uuid::new_v4()
        }
    }

    const MIXED: &str = r#"[{"question":"Q1","options":["A","B"],"correctOptionIndex":0}, {"question":"","options":["A","B"],"correctOptionIndex":0}]"#;

    #[tokio::test]
    async fn test_extract_drops_invalid_records() {
        let (pipeline, client) = pipeline(ScriptedClient::replying(MIXED));
        let cards = pipeline.extract(PDF, &CancellationToken::new()).await.unwrap();

        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].question, "Q1");
        assert_eq!(cards[0].correct_option().unwrap().text, "A");
        assert_eq!(cards[0].source_name, None);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_validation_discards_partial_result() {
        let body = r#"[
            {"question":"Q1","options":["A","B"],"correctOptionIndex":0},
            {"question":"Q2","options":["C","D"],"correctOptionIndex":1},
            {"question":"Q3","options":["E","F"],"correctOptionIndex":0}
        ]"#;
        let token = CancellationToken::new();
        let ids = CancelOnNthId {
            token: token.clone(),
            n: 3,
            issued: Default::default(),
        };
        let pipeline = ImportPipeline::new(Arc::new(ScriptedClient::replying(body))).with_ids(Arc::new(ids));

        let err = pipeline.extract(PDF, &token).await.unwrap_err();
        assert!(matches!(err, ImportError::Cancelled));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_extract_reports_skipped() {
        let (pipeline, _) = pipeline(ScriptedClient::replying(MIXED));
        let report = pipeline
            .extract_with_report(PDF, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.cards.len(), 1);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn test_extract_sends_prompt_and_document() {
        let (pipeline, client) = pipeline(ScriptedClient::replying("[]"));
        pipeline.extract(PDF, &CancellationToken::new()).await.unwrap();

        let parts = client.last_parts();
        assert_eq!(parts[0], PromptPart::text(EXTRACT_PROMPT));
        assert_eq!(parts[1], PromptPart::inline(PDF_MIME_TYPE, STANDARD.encode(PDF)));
    }

    #[tokio::test]
    async fn test_fenced_response_parses_like_plain() {
        let fenced = format!("```json\n{MIXED}\n```");
        let (plain_pipeline, _) = pipeline(ScriptedClient::replying(MIXED));
        let (fenced_pipeline, _) = pipeline(ScriptedClient::replying(&fenced));
        let token = CancellationToken::new();

        let plain = plain_pipeline.extract(PDF, &token).await.unwrap();
        let fenced = fenced_pipeline.extract(PDF, &token).await.unwrap();
        assert_eq!(plain, fenced);
    }

    #[tokio::test]
    async fn test_preserves_source_order() {
        let body = r#"[
            {"question":"first","options":["a","b"],"correctOptionIndex":1},
            {"question":"second","options":["c","d","e"],"correctOptionIndex":2,"topic":"t"}
        ]"#;
        let (pipeline, _) = pipeline(ScriptedClient::replying(body));
        let cards = pipeline.extract(PDF, &CancellationToken::new()).await.unwrap();
        let questions: Vec<_> = cards.iter().map(|c| c.question.as_str()).collect();
        assert_eq!(questions, vec!["first", "second"]);
        assert_eq!(cards[1].topic.as_deref(), Some("t"));
    }

    #[tokio::test]
    async fn test_empty_array_is_success() {
        let (pipeline, _) = pipeline(ScriptedClient::replying("[]"));
        let cards = pipeline.extract(PDF, &CancellationToken::new()).await.unwrap();
        assert!(cards.is_empty());
    }

    #[tokio::test]
    async fn test_non_json_is_malformed() {
        let (pipeline, _) = pipeline(ScriptedClient::replying("Sorry, I can't help with that."));
        let err = pipeline.extract(PDF, &CancellationToken::new()).await.unwrap_err();
        match err {
            ImportError::MalformedResponse { raw, message } => {
                assert_eq!(raw, "Sorry, I can't help with that.");
                assert!(!message.is_empty());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_object_response_is_unexpected_shape() {
        let (pipeline, _) = pipeline(ScriptedClient::replying(r#"{"question":"Q"}"#));
        let err = pipeline.extract(PDF, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            ImportError::UnexpectedShape { expected: "array", found: "object" }
        ));
    }

    #[tokio::test]
    async fn test_service_error_propagates() {
        let client = ScriptedClient::default().then(Err(ClientError::Status {
            status: 503,
            body: "overloaded".to_string(),
        }));
        let (pipeline, _) = pipeline(client);
        let err = pipeline.extract(PDF, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ImportError::Service(ClientError::Status { status: 503, .. })));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (pipeline, client) = pipeline(ScriptedClient::replying(MIXED));
        let token = CancellationToken::new();
        token.cancel();

        let err = pipeline.extract(PDF, &token).await.unwrap_err();
        assert!(matches!(err, ImportError::Cancelled));
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_while_request_outstanding() {
        let (pipeline, client) = pipeline(ScriptedClient::hanging());
        let token = CancellationToken::new();

        let canceller = token.clone();
        let waiter = client.clone();
        tokio::spawn(async move {
            while waiter.calls() == 0 {
                tokio::task::yield_now().await;
            }
            canceller.cancel();
        });

        let err = pipeline.extract(PDF, &token).await.unwrap_err();
        assert!(matches!(err, ImportError::Cancelled));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_generate_one() {
        let body = r#"{"question":"What do plants produce?","options":["Oxygen","Iron","Salt","Gold"],"correctOptionIndex":0,"explanation":"Photosynthesis releases oxygen."}"#;
        let (pipeline, client) = pipeline(ScriptedClient::replying(body));
        let card = pipeline
            .generate_one("Photosynthesis", 4, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(card.options.len(), 4);
        assert_eq!(card.correct_option().unwrap().text, "Oxygen");
        assert_eq!(card.topic.as_deref(), Some("Photosynthesis"));
        assert_eq!(client.last_parts(), vec![PromptPart::text(generate_prompt("Photosynthesis", 4))]);
    }

    #[tokio::test]
    async fn test_generate_one_wrong_option_count() {
        let body = r#"{"question":"Q","options":["A","B","C"],"correctOptionIndex":0}"#;
        let (pipeline, _) = pipeline(ScriptedClient::replying(body));
        let err = pipeline
            .generate_one("Photosynthesis", 4, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::InvalidResult(_)));
    }

    #[tokio::test]
    async fn test_generate_one_index_out_of_range() {
        let body = r#"{"question":"Q","options":["A","B"],"correctOptionIndex":5}"#;
        let (pipeline, _) = pipeline(ScriptedClient::replying(body));
        let err = pipeline
            .generate_one("Topic", 2, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::InvalidResult(_)));
    }

    #[tokio::test]
    async fn test_generate_one_array_is_unexpected_shape() {
        let (pipeline, _) = pipeline(ScriptedClient::replying("[]"));
        let err = pipeline
            .generate_one("Topic", 2, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ImportError::UnexpectedShape { expected: "object", found: "array" }
        ));
    }

    #[tokio::test]
    async fn test_generate_one_rejects_small_option_count() {
        let (pipeline, client) = pipeline(ScriptedClient::replying("{}"));
        let err = pipeline
            .generate_one("Topic", 1, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::InvalidResult(_)));
        assert_eq!(client.calls(), 0);
    }
}
