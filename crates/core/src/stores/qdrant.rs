use crate::models::{ChunkMatch, ChunkRecord, StoredChunk};
use crate::traits::ChunkStore;
use crate::StoreError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

const SCROLL_PAGE: usize = 256;

/// Chunk store backed by a Qdrant collection using cosine distance.
///
/// Qdrant point ids must be integers or UUIDs, so each chunk id is mapped to
/// a name-based UUID and the original id travels in the payload.
pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

pub fn point_id(chunk_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes()).to_string()
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Result<Self, StoreError> {
        let endpoint = endpoint.into();
        Url::parse(&endpoint)?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    fn backend_error(status: StatusCode) -> StoreError {
        StoreError::BackendResponse {
            backend: "qdrant".to_string(),
            details: status.to_string(),
        }
    }

    pub async fn ensure_collection(&self) -> Result<(), StoreError> {
        let response = self.client.get(self.collection_url()).send().await?;
        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(Self::backend_error(response.status()));
        }

        let response = self
            .client
            .put(self.collection_url())
            .json(&json!({
                "vectors": { "size": self.vector_size, "distance": "Cosine" }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::backend_error(response.status()));
        }

        info!(collection = %self.collection, vector_size = self.vector_size, "created qdrant collection");
        Ok(())
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, StoreError> {
        let response = self
            .client
            .post(format!("{}{}", self.collection_url(), path))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::backend_error(response.status()));
        }

        Ok(response.json().await?)
    }
}

fn payload_str(hit: &Value, field: &str) -> String {
    hit.pointer(&format!("/payload/{field}"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn payload_index(hit: &Value) -> usize {
    hit.pointer("/payload/chunk_index")
        .and_then(Value::as_u64)
        .unwrap_or_default() as usize
}

#[async_trait]
impl ChunkStore for QdrantStore {
    async fn add(&self, chunks: &[ChunkRecord], embeddings: &[Vec<f32>]) -> Result<(), StoreError> {
        if chunks.len() != embeddings.len() {
            return Err(StoreError::Request(format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                chunks.len()
            )));
        }

        let points = chunks
            .iter()
            .zip(embeddings.iter())
            .map(|(chunk, embedding)| {
                if embedding.len() != self.vector_size {
                    return Err(StoreError::Request(format!(
                        "embedding dimension {} != {}",
                        embedding.len(),
                        self.vector_size
                    )));
                }

                Ok(json!({
                    "id": point_id(&chunk.chunk_id),
                    "vector": embedding,
                    "payload": {
                        "chunk_id": chunk.chunk_id,
                        "source": chunk.source_path,
                        "chunk_index": chunk.chunk_index,
                        "text": chunk.text,
                    },
                }))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        if points.is_empty() {
            return Ok(());
        }

        debug!(collection = %self.collection, points = points.len(), "upserting chunks");
        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::backend_error(response.status()));
        }

        Ok(())
    }

    async fn delete(&self, chunk_ids: &[String]) -> Result<(), StoreError> {
        if chunk_ids.is_empty() {
            return Ok(());
        }

        let points: Vec<String> = chunk_ids.iter().map(|id| point_id(id)).collect();
        debug!(collection = %self.collection, points = points.len(), "deleting chunks");
        self.post("/points/delete?wait=true", json!({ "points": points }))
            .await?;
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<StoredChunk>, StoreError> {
        let mut chunks = Vec::new();
        let mut offset = Value::Null;

        loop {
            let mut body = json!({
                "limit": SCROLL_PAGE,
                "with_payload": ["chunk_id", "source", "chunk_index"],
                "with_vector": false,
            });
            if !offset.is_null() {
                body["offset"] = offset.clone();
            }

            let parsed = self.post("/points/scroll", body).await?;
            let points = parsed
                .pointer("/result/points")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            chunks.extend(points.iter().map(|point| StoredChunk {
                chunk_id: payload_str(point, "chunk_id"),
                source_path: payload_str(point, "source"),
                chunk_index: payload_index(point),
            }));

            offset = parsed
                .pointer("/result/next_page_offset")
                .cloned()
                .unwrap_or(Value::Null);
            if offset.is_null() || points.is_empty() {
                break;
            }
        }

        Ok(chunks)
    }

    async fn query(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ChunkMatch>, StoreError> {
        if query_vector.len() != self.vector_size {
            return Err(StoreError::Request(format!(
                "query vector dim {} is not {}",
                query_vector.len(),
                self.vector_size
            )));
        }

        let parsed = self
            .post(
                "/points/search",
                json!({
                    "vector": query_vector,
                    "limit": top_k,
                    "with_payload": true,
                }),
            )
            .await?;

        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(hits
            .iter()
            .map(|hit| {
                let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
                ChunkMatch {
                    chunk_id: payload_str(hit, "chunk_id"),
                    source_path: payload_str(hit, "source"),
                    chunk_index: payload_index(hit),
                    text: payload_str(hit, "text"),
                    distance: 1.0 - score,
                }
            })
            .collect())
    }
}
