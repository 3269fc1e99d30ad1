use crate::chunking::{chunk_ids, split_text};
use crate::embeddings::Embedder;
use crate::error::{EmbeddingError, IngestError, ParseError};
use crate::extractor::ExtractorRegistry;
use crate::models::{
    ChunkRecord, FailedFile, IndexingOptions, IndexingReport, SystemStats, DEFAULT_EXTENSIONS,
};
use crate::traits::ChunkStore;
use crate::tracker::{digest_file, path_key, DocumentTracker};
use futures::{stream, StreamExt, TryStreamExt};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Recursively lists files under `folder` whose extension is in
/// `extensions` (case-insensitive, with or without a leading dot).
pub fn discover_files(folder: &Path, extensions: &[String]) -> Vec<PathBuf> {
    let wanted: HashSet<String> = extensions
        .iter()
        .map(|ext| ext.trim_start_matches('.').to_lowercase())
        .collect();

    let mut files = Vec::new();
    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let matches = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| wanted.contains(&ext.to_lowercase()));

        if matches {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect()
}

/// Keeps the tracker and the chunk store in step while files are added,
/// changed, and removed.
pub struct Indexer<S, E>
where
    S: ChunkStore + ?Sized,
    E: Embedder + ?Sized,
{
    store: Arc<S>,
    embedder: Arc<E>,
    tracker: DocumentTracker,
    extractors: ExtractorRegistry,
    options: IndexingOptions,
    interrupt: Arc<AtomicBool>,
}

impl<S, E> Indexer<S, E>
where
    S: ChunkStore + ?Sized,
    E: Embedder + ?Sized,
{
    pub fn new(store: Arc<S>, embedder: Arc<E>, tracker: DocumentTracker) -> Self {
        Self {
            store,
            embedder,
            tracker,
            extractors: ExtractorRegistry::default(),
            options: IndexingOptions::default(),
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_options(mut self, options: IndexingOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_extractors(mut self, extractors: ExtractorRegistry) -> Self {
        self.extractors = extractors;
        self
    }

    /// Raising this flag stops a directory scan after the current file.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    pub fn tracker(&self) -> &DocumentTracker {
        &self.tracker
    }

    /// Extracts, chunks, embeds and stores one file, then records it.
    ///
    /// The tracker is only updated once every chunk is stored, so an error
    /// from any stage leaves the previous record in place.
    pub async fn process_file(&mut self, path: &Path) -> Result<Vec<String>, IngestError> {
        let Some(extractor) = self.extractors.for_path(path) else {
            warn!(path = %path.display(), "unsupported file type, skipping");
            return Ok(Vec::new());
        };

        let hash = digest_file(path).map_err(|source| IngestError::Tracker {
            path: path.to_path_buf(),
            source,
        })?;

        let owned = path.to_path_buf();
        let text = tokio::task::spawn_blocking(move || extractor.extract(&owned))
            .await
            .map_err(|join_error| ParseError::extract(path, join_error))??;

        let pieces = split_text(&text, (&self.options).into());
        let ids = chunk_ids(path, pieces.len());
        let source_path = path_key(path);

        let vectors = self
            .embed_chunks(&pieces)
            .await
            .map_err(|source| IngestError::Embedding {
                path: path.to_path_buf(),
                source,
            })?;

        let records: Vec<ChunkRecord> = ids
            .iter()
            .zip(pieces)
            .enumerate()
            .map(|(chunk_index, (chunk_id, text))| ChunkRecord {
                chunk_id: chunk_id.clone(),
                source_path: source_path.clone(),
                chunk_index,
                text,
            })
            .collect();

        self.store
            .add(&records, &vectors)
            .await
            .map_err(|source| IngestError::Store {
                path: path.to_path_buf(),
                source,
            })?;

        let previous = self.tracker.chunk_ids(path);
        if let Err(source) = self.tracker.record_hashed(path, hash, ids.clone()) {
            let added: Vec<String> = ids
                .iter()
                .filter(|id| !previous.contains(id))
                .cloned()
                .collect();
            if let Err(rollback) = self.store.delete(&added).await {
                warn!(path = %path.display(), error = %rollback, "could not roll back stored chunks");
            }
            return Err(IngestError::Tracker {
                path: path.to_path_buf(),
                source,
            });
        }

        let current: HashSet<&String> = ids.iter().collect();
        let stale: Vec<String> = previous
            .into_iter()
            .filter(|id| !current.contains(id))
            .collect();
        if !stale.is_empty() {
            match self.store.delete(&stale).await {
                Ok(()) => debug!(path = %path.display(), removed = stale.len(), "dropped outdated chunks"),
                Err(err) => warn!(path = %path.display(), error = %err, "outdated chunks left for garbage collection"),
            }
        }

        info!(path = %path.display(), chunks = ids.len(), "processed file");
        Ok(ids)
    }

    async fn embed_chunks(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let batch_size = self.options.embed_batch_size.max(1);
        let concurrency = self.options.embed_concurrency.max(1);
        let embedder = &self.embedder;

        let batches: Vec<Vec<Vec<f32>>> = stream::iter(texts.chunks(batch_size))
            .map(|batch| embedder.embed_documents(batch))
            .buffered(concurrency)
            .try_collect()
            .await?;

        let vectors: Vec<Vec<f32>> = batches.into_iter().flatten().collect();
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                got: vectors.len(),
            });
        }
        Ok(vectors)
    }

    /// Indexes every matching file below `root`, skipping unchanged ones,
    /// then garbage-collects chunks no tracked document references.
    /// A failing file is logged and reported; the scan goes on.
    pub async fn process_directory(
        &mut self,
        root: &Path,
        extensions: &[String],
    ) -> Result<IndexingReport, IngestError> {
        if !root.is_dir() {
            return Err(IngestError::MissingDirectory(root.to_path_buf()));
        }

        let mut report = IndexingReport::default();
        for path in discover_files(root, extensions) {
            if self.interrupt.load(Ordering::SeqCst) {
                warn!(root = %root.display(), "interrupted, stopping scan");
                report.interrupted = true;
                break;
            }

            if !self.extractors.supports(&path) {
                warn!(path = %path.display(), "no extractor for file type, skipping");
                report.skipped.push(path);
                continue;
            }

            if self.tracker.is_processed(&path) {
                info!(path = %path.display(), "skipping already processed file");
                report.skipped.push(path);
                continue;
            }

            match self.process_file(&path).await {
                Ok(_) => report.processed.push(path),
                Err(err) => {
                    error!(path = %path.display(), error = %err, "failed to process file");
                    report.failed.push(FailedFile {
                        path,
                        reason: err.to_string(),
                    });
                }
            }
        }

        if report.interrupted {
            warn!("garbage collection skipped after interrupted scan");
            return Ok(report);
        }

        report.removed_chunks = self.collect_garbage().await?;
        info!(
            root = %root.display(),
            processed = report.processed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            removed_chunks = report.removed_chunks,
            "directory scan finished"
        );
        Ok(report)
    }

    /// Forgets records whose files are gone, then deletes every stored chunk
    /// that no remaining record references. Returns the number deleted.
    pub async fn collect_garbage(&mut self) -> Result<usize, IngestError> {
        let vanished: Vec<String> = self
            .tracker
            .records()
            .filter(|(path, _)| !Path::new(path).exists())
            .map(|(path, _)| path.to_string())
            .collect();
        for path in vanished {
            match self.tracker.remove(Path::new(&path)) {
                Ok(_) => info!(path = %path, "forgetting vanished file"),
                Err(err) => warn!(path = %path, error = %err, "could not forget vanished file"),
            }
        }

        let live: HashSet<&str> = self
            .tracker
            .records()
            .filter_map(|(_, record)| record.chunk_ids.as_ref())
            .flatten()
            .map(String::as_str)
            .collect();

        let stale: Vec<String> = self
            .store
            .get_all()
            .await
            .map_err(IngestError::Garbage)?
            .into_iter()
            .map(|chunk| chunk.chunk_id)
            .filter(|id| !live.contains(id.as_str()))
            .collect();

        if !stale.is_empty() {
            self.store
                .delete(&stale)
                .await
                .map_err(IngestError::Garbage)?;
            info!(removed = stale.len(), "removed obsolete chunks");
        }

        Ok(stale.len())
    }

    /// Forgets a document, then deletes its chunks. Unknown paths are a no-op.
    ///
    /// Chunks left behind by a failed delete are no longer referenced by any
    /// record, so the next garbage collection removes them.
    pub async fn remove_document(&mut self, path: &Path) -> Result<(), IngestError> {
        if self.tracker.get(path).is_none() {
            debug!(path = %path.display(), "remove requested for untracked document");
            return Ok(());
        }

        let ids = self.tracker.chunk_ids(path);
        self.tracker
            .remove(path)
            .map_err(|source| IngestError::Tracker {
                path: path.to_path_buf(),
                source,
            })?;

        if !ids.is_empty() {
            self.store
                .delete(&ids)
                .await
                .map_err(|source| IngestError::Store {
                    path: path.to_path_buf(),
                    source,
                })?;
        }

        info!(path = %path.display(), chunks = ids.len(), "removed document");
        Ok(())
    }

    /// Re-processes tracked files that still exist but changed on disk.
    pub async fn refresh_tracked(&mut self) -> IndexingReport {
        let changed: Vec<PathBuf> = self
            .tracker
            .records()
            .map(|(path, _)| PathBuf::from(path))
            .filter(|path| path.exists() && !self.tracker.is_processed(path))
            .collect();

        let mut report = IndexingReport::default();
        for path in changed {
            match self.process_file(&path).await {
                Ok(_) => report.processed.push(path),
                Err(err) => {
                    error!(path = %path.display(), error = %err, "failed to refresh file");
                    report.failed.push(FailedFile {
                        path,
                        reason: err.to_string(),
                    });
                }
            }
        }
        report
    }

    pub fn stats(&self) -> SystemStats {
        let mut stats = SystemStats::default();

        for (path, record) in self.tracker.records() {
            let chunks = record.chunk_ids.as_ref().map_or(0, Vec::len);
            stats.total_documents += 1;
            stats.total_chunks += chunks;
            *stats
                .document_types
                .entry(record.file_type.clone())
                .or_insert(0) += 1;
            stats.processed_documents.push(path.to_string());
            if stats
                .last_processed
                .map_or(true, |latest| record.last_processed > latest)
            {
                stats.last_processed = Some(record.last_processed);
            }
        }

        if stats.total_documents > 0 {
            stats.average_chunks_per_doc = stats.total_chunks as f64 / stats.total_documents as f64;
        }
        stats
    }

    /// Chunk ordinals currently stored, grouped by source path.
    pub async fn document_sources(&self) -> Result<BTreeMap<String, Vec<usize>>, IngestError> {
        let mut sources: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for chunk in self.store.get_all().await.map_err(IngestError::Garbage)? {
            sources
                .entry(chunk.source_path)
                .or_default()
                .push(chunk.chunk_index);
        }
        for indexes in sources.values_mut() {
            indexes.sort_unstable();
        }
        Ok(sources)
    }
}
