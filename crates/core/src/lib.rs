pub mod chunking;
pub mod conversation;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod models;
pub mod orchestrator;
pub mod prompts;
pub mod retry;
pub mod stores;
pub mod traits;
pub mod tracker;

#[cfg(test)]
mod testing;

pub use chunking::{chunk_id, split_text, ChunkingConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
pub use conversation::{ConversationStore, DEFAULT_CONVERSATIONS_DB};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, EmbeddingMode, GeminiEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use engine::QueryEngine;
pub use error::{
    ConversationError, EmbeddingError, GenerationError, IngestError, ParseError, QueryError,
    RemoteError, StoreError, TrackerError,
};
pub use extractor::{ExtractorRegistry, TextExtractor};
pub use generation::{GeminiGenerator, TextGenerator};
pub use models::{
    ChunkMatch, ChunkRecord, Conversation, ConversationSummary, DocumentRecord, FailedFile,
    IndexingOptions, IndexingReport, Message, QueryHit, QueryResult, ResponseOptions, Role,
    StoredChunk, SystemStats, DEFAULT_EXTENSIONS,
};
pub use orchestrator::{default_extensions, discover_files, Indexer};
pub use retry::RetryPolicy;
pub use stores::{InMemoryChunkStore, QdrantStore};
pub use traits::ChunkStore;
pub use tracker::{DocumentTracker, DEFAULT_CACHE_FILE};
