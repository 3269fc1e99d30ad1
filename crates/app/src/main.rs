use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use docrecall_core::{
    default_extensions, CharacterNgramEmbedder, ChunkStore, ConversationStore, DocumentTracker,
    Embedder, GeminiEmbedder, GeminiGenerator, InMemoryChunkStore, Indexer, IndexingOptions,
    Message, QdrantStore, QueryEngine, ResponseOptions, DEFAULT_CACHE_FILE,
    DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_CONVERSATIONS_DB,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const PAGE_SIZE: usize = 10;
const NO_SUMMARY: &str = "No summary available";

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StoreKind {
    /// Process-local store, discarded on exit.
    Memory,
    Qdrant,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EmbedderKind {
    Gemini,
    /// Offline character trigram hashing.
    Ngram,
}

#[derive(Parser)]
#[command(name = "docrecall", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON file remembering which documents were indexed
    #[arg(long, env = "DOCRECALL_CACHE", default_value = DEFAULT_CACHE_FILE)]
    cache_file: PathBuf,

    /// SQLite database holding conversations
    #[arg(long, env = "DOCRECALL_DB", default_value = DEFAULT_CONVERSATIONS_DB)]
    conversations_db: String,

    /// Qdrant base URL
    #[arg(long, default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection
    #[arg(long, default_value = "document_chunks")]
    qdrant_collection: String,

    #[arg(long, value_enum, default_value = "qdrant")]
    store: StoreKind,

    #[arg(long, value_enum, default_value = "gemini")]
    embedder: EmbedderKind,

    /// Google API key for Gemini embeddings and answers
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    #[arg(long, default_value_t = DEFAULT_CHUNK_OVERLAP)]
    chunk_overlap: usize,

    /// Embedding batches in flight per document
    #[arg(long, default_value_t = 4)]
    embed_concurrency: usize,

    /// Language answers and summaries are written in
    #[arg(long, default_value = "English")]
    language: String,
}

#[derive(Subcommand)]
enum Command {
    /// Index new and changed documents under a folder, then drop stale chunks.
    Process {
        folder: PathBuf,
        /// File extensions to include (repeatable).
        #[arg(long = "ext")]
        extensions: Vec<String>,
    },
    /// Ask a question, continuing a conversation or starting one.
    Ask {
        question: String,
        #[arg(long)]
        conversation: Option<i64>,
        /// Title for a newly created conversation.
        #[arg(long)]
        title: Option<String>,
    },
    /// Start an empty conversation.
    New { title: Option<String> },
    /// List conversations, most recently updated first.
    List {
        #[arg(long, default_value = "1")]
        page: usize,
    },
    /// Print a conversation's messages.
    Show { id: i64 },
    /// Find conversations mentioning some text.
    Search { text: String },
    /// Print a conversation's stored summary.
    Summary { id: i64 },
    /// Summarise what has been indexed.
    Stats,
    /// List indexed sources and their stored chunk numbers.
    Sources,
    /// Remove one document from the index.
    Remove { path: PathBuf },
    /// Re-index tracked documents that changed on disk.
    Refresh,
}

impl Cli {
    fn api_key(&self) -> anyhow::Result<&str> {
        self.api_key
            .as_deref()
            .context("a Google API key is required (--api-key or GOOGLE_API_KEY)")
    }

    fn embedder(&self) -> anyhow::Result<Arc<dyn Embedder>> {
        let embedder: Arc<dyn Embedder> = match self.embedder {
            EmbedderKind::Gemini => Arc::new(GeminiEmbedder::new(self.api_key()?)),
            EmbedderKind::Ngram => Arc::new(CharacterNgramEmbedder::default()),
        };
        Ok(embedder)
    }

    async fn store(&self, dimensions: usize) -> anyhow::Result<Arc<dyn ChunkStore>> {
        let store: Arc<dyn ChunkStore> = match self.store {
            StoreKind::Memory => {
                warn!("memory store selected; indexed chunks are lost on exit");
                Arc::new(InMemoryChunkStore::new())
            }
            StoreKind::Qdrant => {
                let store = QdrantStore::new(&self.qdrant_url, &self.qdrant_collection, dimensions)?;
                store.ensure_collection().await?;
                Arc::new(store)
            }
        };
        Ok(store)
    }

    fn indexing_options(&self) -> IndexingOptions {
        IndexingOptions {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            embed_concurrency: self.embed_concurrency,
            ..IndexingOptions::default()
        }
    }

    fn response_options(&self) -> ResponseOptions {
        ResponseOptions {
            language: self.language.clone(),
            ..ResponseOptions::default()
        }
    }

    async fn indexer(&self) -> anyhow::Result<Indexer<dyn ChunkStore, dyn Embedder>> {
        let embedder = self.embedder()?;
        let store = self.store(embedder.dimensions()).await?;
        let tracker = DocumentTracker::open(&self.cache_file);
        Ok(Indexer::new(store, embedder, tracker).with_options(self.indexing_options()))
    }

    async fn engine(&self) -> anyhow::Result<QueryEngine<dyn ChunkStore, dyn Embedder, GeminiGenerator>> {
        let embedder = self.embedder()?;
        let store = self.store(embedder.dimensions()).await?;
        let generator = GeminiGenerator::new(self.api_key()?);
        Ok(QueryEngine::new(store, embedder, generator).with_options(self.response_options()))
    }
}

fn default_title(question: &str) -> String {
    let mut title: String = question.chars().take(50).collect();
    if question.chars().count() > 50 {
        title.push_str("...");
    }
    title
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "docrecall boot"
    );

    match &cli.command {
        Command::Process { folder, extensions } => {
            let extensions = if extensions.is_empty() {
                default_extensions()
            } else {
                extensions.clone()
            };

            let mut indexer = cli.indexer().await?;
            let interrupt = indexer.interrupt_flag();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, finishing current file");
                    interrupt.store(true, Ordering::SeqCst);
                }
            });

            let report = indexer
                .process_directory(&absolute(folder), &extensions)
                .await?;
            for failed in &report.failed {
                warn!(path = %failed.path.display(), reason = %failed.reason, "not indexed");
            }
            println!(
                "processed={} skipped={} failed={} removed_chunks={}{}",
                report.processed.len(),
                report.skipped.len(),
                report.failed.len(),
                report.removed_chunks,
                if report.interrupted { " (interrupted)" } else { "" }
            );
        }
        Command::Ask {
            question,
            conversation,
            title,
        } => {
            let conversations = ConversationStore::open(&cli.conversations_db).await?;
            let engine = cli.engine().await?;

            let id = match conversation {
                Some(id) => *id,
                None => {
                    let title = title.clone().unwrap_or_else(|| default_title(question));
                    conversations.create(&title).await?
                }
            };
            let mut messages = match conversations.get(id).await? {
                Some(existing) => existing.messages,
                None => bail!("conversation {id} not found"),
            };

            messages.push(Message::user(question.as_str()));
            let answer = engine.answer(question, &messages).await?;
            messages.push(Message::assistant(answer.as_str()));

            let summary = match engine.summarize(&messages).await {
                Ok(summary) => summary,
                Err(error) => {
                    warn!(conversation = id, error = %error, "summary generation failed");
                    NO_SUMMARY.to_string()
                }
            };
            conversations.update(id, &messages, Some(summary.as_str())).await?;

            println!("{answer}");
            println!("\n[conversation {id}]");
        }
        Command::New { title } => {
            let conversations = ConversationStore::open(&cli.conversations_db).await?;
            let title = title
                .clone()
                .unwrap_or_else(|| format!("Conversation {}", Utc::now().format("%Y-%m-%d %H:%M")));
            let id = conversations.create(&title).await?;
            println!("{id}");
        }
        Command::List { page } => {
            let conversations = ConversationStore::open(&cli.conversations_db).await?;
            let offset = page.saturating_sub(1) * PAGE_SIZE;
            for entry in conversations.list(PAGE_SIZE, offset).await? {
                println!(
                    "[{}] {} (updated {})\n  {}",
                    entry.id,
                    entry.title,
                    entry.last_updated.to_rfc3339(),
                    entry.summary.as_deref().unwrap_or(NO_SUMMARY)
                );
            }
        }
        Command::Show { id } => {
            let conversations = ConversationStore::open(&cli.conversations_db).await?;
            let Some(conversation) = conversations.get(*id).await? else {
                bail!("conversation {id} not found");
            };
            println!("{} (started {})", conversation.title, conversation.start_time.to_rfc3339());
            for message in conversation.messages {
                println!("{}: {}", message.role.as_str(), message.content);
            }
        }
        Command::Search { text } => {
            let conversations = ConversationStore::open(&cli.conversations_db).await?;
            for entry in conversations.search(text).await? {
                println!("[{}] {}", entry.id, entry.title);
            }
        }
        Command::Summary { id } => {
            let conversations = ConversationStore::open(&cli.conversations_db).await?;
            let Some(conversation) = conversations.get(*id).await? else {
                bail!("conversation {id} not found");
            };
            println!("{}", conversation.summary.as_deref().unwrap_or(NO_SUMMARY));
        }
        Command::Stats => {
            let stats = cli.indexer().await?.stats();
            println!("documents: {}", stats.total_documents);
            println!("chunks: {}", stats.total_chunks);
            println!("average chunks per document: {:.2}", stats.average_chunks_per_doc);
            for (file_type, count) in &stats.document_types {
                println!("  {file_type}: {count}");
            }
            if let Some(last) = stats.last_processed {
                println!("last processed: {}", last.to_rfc3339());
            }
        }
        Command::Sources => {
            let sources = cli.indexer().await?.document_sources().await?;
            for (source, chunks) in sources {
                println!("{source}: {} chunks {:?}", chunks.len(), chunks);
            }
        }
        Command::Remove { path } => {
            let mut indexer = cli.indexer().await?;
            let path = absolute(path);
            indexer.remove_document(&path).await?;
            println!("removed {}", path.display());
        }
        Command::Refresh => {
            let report = cli.indexer().await?.refresh_tracked().await;
            for failed in &report.failed {
                warn!(path = %failed.path.display(), reason = %failed.reason, "not refreshed");
            }
            println!(
                "refreshed={} failed={}",
                report.processed.len(),
                report.failed.len()
            );
        }
    }

    Ok(())
}

fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
