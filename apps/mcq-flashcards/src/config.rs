//! Configuration for MCQ flashcards.

use crate::import::DEFAULT_ENCODE_CHUNK;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const FALLBACK_DB_FILE: &str = "mcq-flashcards.db";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub quiz: QuizConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    pub fn load() -> Self {
        Self::config_path()
            .and_then(|p| std::fs::read_to_string(p).ok())
            .and_then(|s| toml::from_str(&s).ok())
            .unwrap_or_default()
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(path) = Self::config_path() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let content = toml::to_string_pretty(self)?;
            std::fs::write(path, content)?;
        }
        Ok(())
    }

    pub fn config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "mcq-flashcards")
            .map(|d| d.config_dir().join("config.toml"))
    }

    /// Database location: the configured override, else the data dir, else
    /// the working directory.
    pub fn db_path(&self) -> PathBuf {
        self.storage
            .db_path
            .clone()
            .or_else(|| {
                directories::ProjectDirs::from("", "", "mcq-flashcards")
                    .map(|d| d.data_dir().join("cards.db"))
            })
            .unwrap_or_else(|| PathBuf::from(FALLBACK_DB_FILE))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Inline key; takes precedence over `api_key_env`.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String { "https://generativelanguage.googleapis.com".to_string() }
fn default_model() -> String { "gemini-1.5-flash".to_string() }
fn default_api_key_env() -> String { "GEMINI_API_KEY".to_string() }
fn default_timeout() -> u64 { 120 }

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout(),
        }
    }
}

impl ServiceConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Bytes of document encoded between cancellation checks.
    #[serde(default = "default_encode_chunk")]
    pub encode_chunk_size: usize,
}

fn default_encode_chunk() -> usize { DEFAULT_ENCODE_CHUNK }

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            encode_chunk_size: DEFAULT_ENCODE_CHUNK,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizConfig {
    #[serde(default = "default_true")]
    pub shuffle_options: bool,
    #[serde(default)]
    pub question_limit: Option<usize>,
}

fn default_true() -> bool { true }

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            shuffle_options: true,
            question_limit: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}
