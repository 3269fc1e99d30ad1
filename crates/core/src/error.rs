use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to extract text from {path}: {details}")]
    Extract { path: PathBuf, details: String },
}

impl ParseError {
    pub fn extract(path: &std::path::Path, details: impl std::fmt::Display) -> Self {
        Self::Extract {
            path: path.to_path_buf(),
            details: details.to_string(),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::Io { path, .. } | Self::Extract { path, .. } => path,
        }
    }
}

/// Failure of an HTTP call to a remote model service, after retries.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{backend} returned {status}: {body}")]
    Status {
        backend: String,
        status: u16,
        body: String,
    },

    #[error("{0} kept rate limiting after all retries")]
    RateLimited(String),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("embedding count {got} doesn't match input count {expected}")]
    CountMismatch { expected: usize, got: usize },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("{0} returned no text")]
    EmptyResponse(String),
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("tracker serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("message serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("conversation {0} not found")]
    NotFound(i64),

    #[error("stored timestamp is not RFC 3339: {0}")]
    Timestamp(#[from] chrono::ParseError),
}

/// Failure of a single indexing step, tagged with the stage that failed.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("parse stage failed: {0}")]
    Parse(#[from] ParseError),

    #[error("embedding stage failed for {path}: {source}")]
    Embedding {
        path: PathBuf,
        #[source]
        source: EmbeddingError,
    },

    #[error("store stage failed for {path}: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: StoreError,
    },

    #[error("tracker stage failed for {path}: {source}")]
    Tracker {
        path: PathBuf,
        #[source]
        source: TrackerError,
    },

    #[error("directory does not exist: {0}")]
    MissingDirectory(PathBuf),

    #[error("garbage collection failed: {0}")]
    Garbage(#[source] StoreError),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("chunk lookup failed: {0}")]
    Store(#[from] StoreError),

    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
