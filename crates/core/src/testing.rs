use crate::embeddings::{Embedder, EmbeddingMode};
use crate::error::{EmbeddingError, GenerationError, RemoteError, StoreError};
use crate::generation::TextGenerator;
use crate::models::{ChunkMatch, ChunkRecord, StoredChunk};
use crate::stores::InMemoryChunkStore;
use crate::traits::ChunkStore;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

pub(crate) fn http_response(status: u16, body: &str) -> String {
    format!(
        "HTTP/1.1 {status} Status\r\nContent-Type: application/json\r\nRetry-After: 0\r\nConnection: close\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
}

pub(crate) type Captured = Arc<Mutex<Vec<String>>>;

/// Serves `responses` one connection at a time and records each request as
/// `"<request line>\n<body>"`.
pub(crate) async fn spawn_mock_server(responses: Vec<String>) -> (String, Captured) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let port = listener.local_addr().expect("mock server addr").port();
    let captured: Captured = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&captured);

    tokio::spawn(async move {
        for response in responses {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let (reader, mut writer) = stream.split();
            let mut reader = BufReader::new(reader);

            let mut request_line = String::new();
            reader.read_line(&mut request_line).await.unwrap_or(0);

            let mut content_length = 0usize;
            let mut line = String::new();
            loop {
                line.clear();
                reader.read_line(&mut line).await.unwrap_or(0);
                if line == "\r\n" || line == "\n" || line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap_or(0);
                    }
                }
            }

            let mut body = vec![0u8; content_length];
            reader.read_exact(&mut body).await.ok();
            if let Ok(mut requests) = sink.lock() {
                requests.push(format!(
                    "{}\n{}",
                    request_line.trim_end(),
                    String::from_utf8_lossy(&body)
                ));
            }

            writer.write_all(response.as_bytes()).await.ok();
            writer.shutdown().await.ok();
        }
    });

    (format!("http://127.0.0.1:{port}"), captured)
}

/// Deterministic embedder that counts calls and can be told to fail.
#[derive(Default)]
pub(crate) struct CountingEmbedder {
    pub calls: AtomicUsize,
    pub texts: AtomicUsize,
    pub fail: AtomicBool,
    pub modes: Mutex<Vec<EmbeddingMode>>,
}

impl CountingEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn texts(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Embedder for CountingEmbedder {
    fn dimensions(&self) -> usize {
        crate::embeddings::DEFAULT_EMBEDDING_DIMENSIONS
    }

    async fn embed(
        &self,
        texts: &[String],
        mode: EmbeddingMode,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        if let Ok(mut modes) = self.modes.lock() {
            modes.push(mode);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(EmbeddingError::Remote(RemoteError::Status {
                backend: "counting".to_string(),
                status: 500,
                body: "induced failure".to_string(),
            }));
        }
        crate::embeddings::CharacterNgramEmbedder::default()
            .embed(texts, mode)
            .await
    }
}

/// Generator that records prompts and answers with a canned reply.
pub(crate) struct RecordingGenerator {
    pub reply: String,
    pub prompts: Mutex<Vec<(String, String)>>,
    pub fail: bool,
}

impl RecordingGenerator {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::replying("")
        }
    }

    pub fn prompts(&self) -> Vec<(String, String)> {
        self.prompts
            .lock()
            .map(|prompts| prompts.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TextGenerator for RecordingGenerator {
    async fn generate(&self, prompt: &str, model: &str) -> Result<String, GenerationError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push((prompt.to_string(), model.to_string()));
        }
        if self.fail {
            return Err(GenerationError::EmptyResponse("recording".to_string()));
        }
        Ok(self.reply.clone())
    }
}

/// In-memory store whose writes and listings can be switched to fail.
#[derive(Default)]
pub(crate) struct FlakyStore {
    pub inner: InMemoryChunkStore,
    pub fail_add: AtomicBool,
    pub fail_delete: AtomicBool,
    pub fail_get_all: AtomicBool,
}

impl FlakyStore {
    pub fn ids(&self) -> Vec<String> {
        self.inner.ids()
    }

    pub fn text_of(&self, chunk_id: &str) -> Option<String> {
        self.inner.text_of(chunk_id)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

fn induced(operation: &str) -> StoreError {
    StoreError::BackendResponse {
        backend: "flaky".to_string(),
        details: format!("induced {operation} failure"),
    }
}

#[async_trait]
impl ChunkStore for FlakyStore {
    async fn add(&self, chunks: &[ChunkRecord], embeddings: &[Vec<f32>]) -> Result<(), StoreError> {
        if self.fail_add.load(Ordering::SeqCst) {
            return Err(induced("add"));
        }
        self.inner.add(chunks, embeddings).await
    }

    async fn delete(&self, chunk_ids: &[String]) -> Result<(), StoreError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(induced("delete"));
        }
        self.inner.delete(chunk_ids).await
    }

    async fn get_all(&self) -> Result<Vec<StoredChunk>, StoreError> {
        if self.fail_get_all.load(Ordering::SeqCst) {
            return Err(induced("get_all"));
        }
        self.inner.get_all().await
    }

    async fn query(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<ChunkMatch>, StoreError> {
        self.inner.query(query_vector, top_k).await
    }
}
