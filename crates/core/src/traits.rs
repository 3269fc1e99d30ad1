use crate::models::{ChunkMatch, ChunkRecord, StoredChunk};
use crate::StoreError;
use async_trait::async_trait;

/// Similarity index holding chunk texts and their vectors.
///
/// `add` upserts: re-adding an existing chunk id replaces it.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn add(&self, chunks: &[ChunkRecord], embeddings: &[Vec<f32>]) -> Result<(), StoreError>;

    async fn delete(&self, chunk_ids: &[String]) -> Result<(), StoreError>;

    async fn get_all(&self) -> Result<Vec<StoredChunk>, StoreError>;

    /// Nearest `top_k` chunks to `query_vector`, closest first.
    async fn query(&self, query_vector: &[f32], top_k: usize)
        -> Result<Vec<ChunkMatch>, StoreError>;
}
