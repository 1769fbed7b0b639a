//! The authoritative card collection and its persistence.
//!
//! Every mutation rewrites the whole collection under a single key. A failed
//! write is logged and otherwise ignored: the in-memory collection stays the
//! source of truth for the rest of the session.

use crate::models::{CardId, FlashcardMcq};
use crate::storage::KeyValueStorage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Key holding the serialized collection.
pub const STORAGE_KEY: &str = "mcq-flashcards";

/// Current persisted schema version.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Serialize)]
struct PersistedRef<'a> {
    version: u32,
    cards: &'a [FlashcardMcq],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Persisted {
    Versioned {
        version: u32,
        cards: Vec<FlashcardMcq>,
    },
    Legacy(Vec<FlashcardMcq>),
}

#[derive(Debug, Error)]
enum DecodeError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported schema version {0}")]
    UnsupportedVersion(u32),
}

fn decode(raw: &str) -> Result<Vec<FlashcardMcq>, DecodeError> {
    match serde_json::from_str::<Persisted>(raw)? {
        Persisted::Versioned { version, cards } if version <= SCHEMA_VERSION => Ok(cards),
        Persisted::Versioned { version, .. } => Err(DecodeError::UnsupportedVersion(version)),
        Persisted::Legacy(cards) => Ok(cards),
    }
}

/// Owns the card collection; all storage access goes through here.
pub struct CardStore<S: KeyValueStorage> {
    storage: S,
    cards: Vec<FlashcardMcq>,
}

impl<S: KeyValueStorage> CardStore<S> {
    /// Create a store and load whatever the storage currently holds.
    pub fn open(storage: S) -> Self {
        let mut store = Self {
            storage,
            cards: Vec::new(),
        };
        store.load();
        store
    }

    /// Re-read the collection from storage, replacing the in-memory copy.
    ///
    /// Never fails: missing or undecodable data yields an empty collection.
    pub fn load(&mut self) -> &[FlashcardMcq] {
        self.cards = match self.storage.get(STORAGE_KEY) {
            Ok(Some(raw)) => match decode(&raw) {
                Ok(cards) => {
                    debug!(count = cards.len(), "loaded card collection");
                    cards
                }
                Err(e) => {
                    warn!(error = %e, "stored card collection is unreadable, starting empty");
                    Vec::new()
                }
            },
            Ok(None) => {
                debug!("no stored card collection");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "failed to read card collection, starting empty");
                Vec::new()
            }
        };
        &self.cards
    }

    pub fn cards(&self) -> &[FlashcardMcq] {
        &self.cards
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn get(&self, id: CardId) -> Option<&FlashcardMcq> {
        self.cards.iter().find(|c| c.id == id)
    }

    /// Append a card. The caller supplies a fresh id.
    pub fn create(&mut self, card: FlashcardMcq) {
        self.cards.push(card);
        self.persist();
    }

    /// Replace the first card with the same id, keeping its position.
    ///
    /// Returns `false` and leaves the collection untouched when no card
    /// matches.
    pub fn update(&mut self, card: FlashcardMcq) -> bool {
        let Some(slot) = self.cards.iter_mut().find(|c| c.id == card.id) else {
            debug!(id = %card.id, "update for unknown card ignored");
            return false;
        };
        *slot = card;
        self.persist();
        true
    }

    /// Remove every card with `id`. Returns how many were removed.
    ///
    /// The collection is written even when nothing matched, so a write that
    /// failed earlier is retried.
    pub fn delete(&mut self, id: CardId) -> usize {
        self.remove_where(|c| c.id == id)
    }

    /// Remove every card imported from `source_name`.
    pub fn delete_source(&mut self, source_name: &str) -> usize {
        self.remove_where(|c| c.source_name.as_deref() == Some(source_name))
    }

    /// Append a batch in order with a single persistence write.
    pub fn bulk_append(&mut self, cards: Vec<FlashcardMcq>) {
        self.cards.extend(cards);
        self.persist();
    }

    /// Distinct non-empty source names, in order of first appearance.
    pub fn source_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for name in self.cards.iter().filter_map(|c| c.source_name.as_deref()) {
            if !name.is_empty() && !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    pub fn cards_for_source(&self, source_name: &str) -> Vec<&FlashcardMcq> {
        self.cards
            .iter()
            .filter(|c| c.source_name.as_deref() == Some(source_name))
            .collect()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    fn remove_where(&mut self, pred: impl Fn(&FlashcardMcq) -> bool) -> usize {
        let before = self.cards.len();
        self.cards.retain(|c| !pred(c));
        let removed = before - self.cards.len();
        self.persist();
        removed
    }

    fn persist(&mut self) {
        let payload = PersistedRef {
            version: SCHEMA_VERSION,
            cards: &self.cards,
        };
        let raw = match serde_json::to_string(&payload) {
            Ok(raw) => raw,
            Err(e) => {
                error!(error = %e, "failed to serialize card collection");
                return;
            }
        };
        if let Err(e) = self.storage.set(STORAGE_KEY, &raw) {
            warn!(error = %e, count = self.cards.len(), "failed to persist card collection, keeping in-memory state");
        }
    }
}
