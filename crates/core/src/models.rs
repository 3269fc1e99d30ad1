use crate::chunking::{ChunkingConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const DEFAULT_EXTENSIONS: [&str; 4] = ["pdf", "docx", "txt", "html"];

/// What the tracker remembers about one indexed file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentRecord {
    pub hash: String,
    pub last_processed: DateTime<Utc>,
    #[serde(default)]
    pub file_type: String,
    #[serde(default)]
    pub size: u64,
    pub chunk_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub source_path: String,
    pub chunk_index: usize,
    pub text: String,
}

/// A chunk as listed back from the store, without its vector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredChunk {
    pub chunk_id: String,
    pub source_path: String,
    pub chunk_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMatch {
    pub chunk_id: String,
    pub source_path: String,
    pub chunk_index: usize,
    pub text: String,
    pub distance: f64,
}

impl ChunkMatch {
    pub fn similarity(&self) -> f64 {
        1.0 - self.distance
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryHit {
    pub text: String,
    pub source_path: String,
    pub chunk_index: usize,
    pub similarity: f64,
}

impl From<ChunkMatch> for QueryHit {
    fn from(value: ChunkMatch) -> Self {
        Self {
            similarity: value.similarity(),
            text: value.text,
            source_path: value.source_path,
            chunk_index: value.chunk_index,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub query: String,
    pub hits: Vec<QueryHit>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: i64,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub messages: Vec<Message>,
    pub summary: Option<String>,
}

/// Row shape returned by conversation listing and search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationSummary {
    pub id: i64,
    pub title: String,
    pub last_updated: DateTime<Utc>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SystemStats {
    pub total_documents: usize,
    pub total_chunks: usize,
    pub document_types: BTreeMap<String, usize>,
    pub average_chunks_per_doc: f64,
    pub processed_documents: Vec<String>,
    pub last_processed: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct IndexingOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embed_batch_size: usize,
    pub embed_concurrency: usize,
}

impl Default for IndexingOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            embed_batch_size: 32,
            embed_concurrency: 4,
        }
    }
}

impl From<&IndexingOptions> for ChunkingConfig {
    fn from(value: &IndexingOptions) -> Self {
        ChunkingConfig::new(value.chunk_size, value.chunk_overlap)
    }
}

#[derive(Debug, Clone)]
pub struct FailedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct IndexingReport {
    pub processed: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<FailedFile>,
    pub removed_chunks: usize,
    pub interrupted: bool,
}

#[derive(Debug, Clone)]
pub struct ResponseOptions {
    pub top_k: usize,
    pub history_turns: usize,
    pub language: String,
    pub answer_model: String,
    pub summary_model: String,
}

impl Default for ResponseOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            history_turns: 10,
            language: "English".to_string(),
            answer_model: "gemini-2.0-flash".to_string(),
            summary_model: "gemini-1.5-flash".to_string(),
        }
    }
}
