use crate::embeddings::Embedder;
use crate::generation::TextGenerator;
use crate::models::{Message, QueryHit, QueryResult, ResponseOptions};
use crate::prompts::{answer_prompt, build_reference_block, build_transcript, summary_prompt};
use crate::traits::ChunkStore;
use crate::QueryError;
use std::sync::Arc;
use tracing::{debug, info};

/// Answers questions from retrieved chunks plus conversation history.
pub struct QueryEngine<S, E, G>
where
    S: ChunkStore + ?Sized,
    E: Embedder + ?Sized,
    G: TextGenerator,
{
    store: Arc<S>,
    embedder: Arc<E>,
    generator: G,
    options: ResponseOptions,
}

impl<S, E, G> QueryEngine<S, E, G>
where
    S: ChunkStore + ?Sized,
    E: Embedder + ?Sized,
    G: TextGenerator,
{
    pub fn new(store: Arc<S>, embedder: Arc<E>, generator: G) -> Self {
        Self {
            store,
            embedder,
            generator,
            options: ResponseOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ResponseOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ResponseOptions {
        &self.options
    }

    /// Embeds `text` in query mode and returns the `top_k` closest chunks.
    pub async fn query(&self, text: &str, top_k: usize) -> Result<QueryResult, QueryError> {
        let vector = self.embedder.embed_query(text).await?;
        let matches = self.store.query(&vector, top_k).await?;
        debug!(query = %text, top_k, hits = matches.len(), "retrieved chunks");

        Ok(QueryResult {
            query: text.to_string(),
            hits: matches.into_iter().map(QueryHit::from).collect(),
        })
    }

    pub async fn answer(&self, question: &str, history: &[Message]) -> Result<String, QueryError> {
        let retrieved = self.query(question, self.options.top_k).await?;
        let references = build_reference_block(&retrieved.hits);
        let transcript = build_transcript(history, self.options.history_turns);
        let prompt = answer_prompt(&self.options.language, &transcript, &references, question);

        info!(
            model = %self.options.answer_model,
            references = retrieved.hits.len(),
            "generating answer"
        );
        Ok(self
            .generator
            .generate(&prompt, &self.options.answer_model)
            .await?)
    }

    pub async fn summarize(&self, history: &[Message]) -> Result<String, QueryError> {
        let transcript = build_transcript(history, self.options.history_turns);
        let prompt = summary_prompt(&self.options.language, &transcript);

        debug!(model = %self.options.summary_model, "generating summary");
        Ok(self
            .generator
            .generate(&prompt, &self.options.summary_model)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::EmbeddingMode;
    use crate::models::ChunkRecord;
    use crate::stores::InMemoryChunkStore;
    use crate::testing::{CountingEmbedder, RecordingGenerator};

    async fn seeded_store(embedder: &CountingEmbedder) -> Arc<InMemoryChunkStore> {
        let store = Arc::new(InMemoryChunkStore::new());
        let chunks = vec![
            ChunkRecord {
                chunk_id: "pumps_chunk_0".to_string(),
                source_path: "/docs/pumps.txt".to_string(),
                chunk_index: 0,
                text: "hydraulic pump seals wear out".to_string(),
            },
            ChunkRecord {
                chunk_id: "bread_chunk_0".to_string(),
                source_path: "/docs/bread.txt".to_string(),
                chunk_index: 0,
                text: "knead the dough for ten minutes".to_string(),
            },
        ];
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = embedder
            .embed_documents(&texts)
            .await
            .expect("seed embeddings");
        store.add(&chunks, &vectors).await.expect("seed store");
        store
    }

    #[tokio::test]
    async fn query_uses_query_mode_and_ranks_by_similarity() -> Result<(), QueryError> {
        let embedder = Arc::new(CountingEmbedder::default());
        let store = seeded_store(&embedder).await;
        let engine = QueryEngine::new(store, Arc::clone(&embedder), RecordingGenerator::replying("ok"));

        let result = engine.query("hydraulic pump seals", 2).await?;
        assert_eq!(result.hits.len(), 2);
        assert_eq!(result.hits[0].source_path, "/docs/pumps.txt");
        assert!(result.hits[0].similarity > result.hits[1].similarity);

        let modes = embedder.modes.lock().map(|m| m.clone()).unwrap_or_default();
        assert_eq!(modes.last(), Some(&EmbeddingMode::Query));
        Ok(())
    }

    #[tokio::test]
    async fn answer_composes_references_and_history() -> Result<(), QueryError> {
        let embedder = Arc::new(CountingEmbedder::default());
        let store = seeded_store(&embedder).await;
        let engine = QueryEngine::new(store, embedder, RecordingGenerator::replying("Seals wear."))
            .with_options(ResponseOptions {
                top_k: 1,
                language: "Ukrainian".to_string(),
                ..ResponseOptions::default()
            });

        let history = vec![
            Message::user("hi"),
            Message::assistant("hello"),
            Message::user("what wears out in pumps?"),
        ];
        let answer = engine.answer("what wears out in pumps?", &history).await?;
        assert_eq!(answer, "Seals wear.");

        let prompts = engine.generator.prompts();
        assert_eq!(prompts.len(), 1);
        let (prompt, model) = &prompts[0];
        assert_eq!(model, &ResponseOptions::default().answer_model);
        assert!(prompt.contains("From /docs/pumps.txt:\nhydraulic pump seals wear out"));
        assert!(!prompt.contains("knead the dough"));
        assert!(prompt.contains("User: hi\nAssistant: hello"));
        assert!(prompt.contains("Answer in the specified language: Ukrainian"));
        assert!(prompt.contains("Current Question: what wears out in pumps?"));
        Ok(())
    }

    #[tokio::test]
    async fn summarize_skips_retrieval() -> Result<(), QueryError> {
        let embedder = Arc::new(CountingEmbedder::default());
        let store = seeded_store(&embedder).await;
        let calls_before = embedder.calls();
        let engine = QueryEngine::new(store, Arc::clone(&embedder), RecordingGenerator::replying("A greeting."));

        let summary = engine
            .summarize(&[Message::user("hi"), Message::assistant("hello")])
            .await?;
        assert_eq!(summary, "A greeting.");
        assert_eq!(embedder.calls(), calls_before);

        let prompts = engine.generator.prompts();
        assert_eq!(prompts[0].1, ResponseOptions::default().summary_model);
        assert!(!prompts[0].0.contains("Reference Passages"));
        Ok(())
    }

    #[tokio::test]
    async fn generation_errors_propagate() {
        let embedder = Arc::new(CountingEmbedder::default());
        let store = seeded_store(&embedder).await;
        let engine = QueryEngine::new(store, embedder, RecordingGenerator::failing());

        assert!(matches!(
            engine.answer("anything", &[]).await,
            Err(QueryError::Generation(_))
        ));
    }

    #[tokio::test]
    async fn embedding_errors_propagate() {
        let embedder = Arc::new(CountingEmbedder::default());
        let store = seeded_store(&embedder).await;
        embedder.set_failing(true);
        let engine = QueryEngine::new(store, embedder, RecordingGenerator::replying("unused"));

        assert!(matches!(
            engine.answer("anything", &[]).await,
            Err(QueryError::Embedding(_))
        ));
        assert!(engine.generator.prompts().is_empty());
    }
}
