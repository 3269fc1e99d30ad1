use crate::models::{ChunkMatch, ChunkRecord, StoredChunk};
use crate::traits::ChunkStore;
use crate::StoreError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;

struct Entry {
    chunk: ChunkRecord,
    vector: Vec<f32>,
}

#[derive(Default)]
pub struct InMemoryChunkStore {
    entries: RwLock<BTreeMap<String, Entry>>,
}

impl InMemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries
            .read()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn text_of(&self, chunk_id: &str) -> Option<String> {
        self.entries
            .read()
            .ok()?
            .get(chunk_id)
            .map(|entry| entry.chunk.text.clone())
    }
}

fn poisoned() -> StoreError {
    StoreError::Request("in-memory store lock poisoned".to_string())
}

pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        1.0
    } else {
        1.0 - f64::from(dot / (mag_a * mag_b))
    }
}

#[async_trait]
impl ChunkStore for InMemoryChunkStore {
    async fn add(&self, chunks: &[ChunkRecord], embeddings: &[Vec<f32>]) -> Result<(), StoreError> {
        if chunks.len() != embeddings.len() {
            return Err(StoreError::Request(format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                chunks.len()
            )));
        }

        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        for (chunk, vector) in chunks.iter().zip(embeddings) {
            entries.insert(
                chunk.chunk_id.clone(),
                Entry {
                    chunk: chunk.clone(),
                    vector: vector.clone(),
                },
            );
        }
        Ok(())
    }

    async fn delete(&self, chunk_ids: &[String]) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        for id in chunk_ids {
            entries.remove(id);
        }
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<StoredChunk>, StoreError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries
            .values()
            .map(|entry| StoredChunk {
                chunk_id: entry.chunk.chunk_id.clone(),
                source_path: entry.chunk.source_path.clone(),
                chunk_index: entry.chunk.chunk_index,
            })
            .collect())
    }

    async fn query(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ChunkMatch>, StoreError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        let mut matches: Vec<ChunkMatch> = entries
            .values()
            .map(|entry| ChunkMatch {
                chunk_id: entry.chunk.chunk_id.clone(),
                source_path: entry.chunk.source_path.clone(),
                chunk_index: entry.chunk.chunk_index,
                text: entry.chunk.text.clone(),
                distance: cosine_distance(query_vector, &entry.vector),
            })
            .collect();

        matches.sort_by(|left, right| {
            left.distance
                .total_cmp(&right.distance)
                .then_with(|| left.chunk_id.cmp(&right.chunk_id))
        });
        matches.truncate(top_k);
        Ok(matches)
    }
}
