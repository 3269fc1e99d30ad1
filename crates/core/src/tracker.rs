use crate::error::TrackerError;
use crate::models::DocumentRecord;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

pub const DEFAULT_CACHE_FILE: &str = "document_cache.json";

/// Content-hash cache of indexed files, persisted as one JSON document.
///
/// This is the only authority on whether a file needs (re)processing and on
/// which chunk ids belong to it.
#[derive(Debug)]
pub struct DocumentTracker {
    cache_file: PathBuf,
    records: BTreeMap<String, DocumentRecord>,
}

pub fn digest_file(path: &Path) -> Result<String, TrackerError> {
    let bytes = fs::read(path).map_err(|source| TrackerError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

impl DocumentTracker {
    /// Loads the cache at `cache_file`. A missing file starts empty; an
    /// unreadable or corrupt one is logged and also starts empty.
    pub fn open(cache_file: impl Into<PathBuf>) -> Self {
        let cache_file = cache_file.into();
        let records = match fs::read_to_string(&cache_file) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(records) => records,
                Err(err) => {
                    error!(path = %cache_file.display(), error = %err, "corrupt document cache, starting empty");
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                error!(path = %cache_file.display(), error = %err, "unreadable document cache, starting empty");
                BTreeMap::new()
            }
        };

        Self {
            cache_file,
            records,
        }
    }

    pub fn cache_file(&self) -> &Path {
        &self.cache_file
    }

    pub fn hash_file(&self, path: &Path) -> Result<String, TrackerError> {
        digest_file(path)
    }

    pub fn is_processed(&self, path: &Path) -> bool {
        if !path.exists() {
            return false;
        }

        let Some(record) = self.records.get(&path_key(path)) else {
            return false;
        };

        match digest_file(path) {
            Ok(current) => current == record.hash && record.chunk_ids.is_some(),
            Err(err) => {
                debug!(path = %path.display(), error = %err, "cannot hash tracked file");
                false
            }
        }
    }

    pub fn record(&mut self, path: &Path, chunk_ids: Vec<String>) -> Result<(), TrackerError> {
        let hash = digest_file(path)?;
        self.record_hashed(path, hash, chunk_ids)
    }

    /// Upserts a record using a hash computed by the caller, typically before
    /// the file was read, so a concurrent edit is picked up by the next scan.
    pub fn record_hashed(
        &mut self,
        path: &Path,
        hash: String,
        chunk_ids: Vec<String>,
    ) -> Result<(), TrackerError> {
        let size = fs::metadata(path).map(|meta| meta.len()).unwrap_or_default();
        let file_type = path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
            .unwrap_or_default();

        let mut next = self.records.clone();
        next.insert(
            path_key(path),
            DocumentRecord {
                hash,
                last_processed: Utc::now(),
                file_type,
                size,
                chunk_ids: Some(chunk_ids),
            },
        );
        self.commit(next)
    }

    pub fn chunk_ids(&self, path: &Path) -> Vec<String> {
        self.records
            .get(&path_key(path))
            .and_then(|record| record.chunk_ids.clone())
            .unwrap_or_default()
    }

    pub fn get(&self, path: &Path) -> Option<&DocumentRecord> {
        self.records.get(&path_key(path))
    }

    /// Returns whether a record was removed.
    pub fn remove(&mut self, path: &Path) -> Result<bool, TrackerError> {
        let key = path_key(path);
        if !self.records.contains_key(&key) {
            return Ok(false);
        }
        let mut next = self.records.clone();
        next.remove(&key);
        self.commit(next)?;
        Ok(true)
    }

    pub fn records(&self) -> impl Iterator<Item = (&str, &DocumentRecord)> {
        self.records
            .iter()
            .map(|(path, record)| (path.as_str(), record))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Writes `next` to disk and only then adopts it, so a failed write
    /// leaves the in-memory records matching the file.
    fn commit(&mut self, next: BTreeMap<String, DocumentRecord>) -> Result<(), TrackerError> {
        self.save(&next)?;
        self.records = next;
        Ok(())
    }

    fn save(&self, records: &BTreeMap<String, DocumentRecord>) -> Result<(), TrackerError> {
        let io_error = |source| TrackerError::Io {
            path: self.cache_file.clone(),
            source,
        };

        if let Some(parent) = self.cache_file.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_error)?;
            }
        }

        let file_name = self
            .cache_file
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| DEFAULT_CACHE_FILE.to_string());
        let tmp_path = self.cache_file.with_file_name(format!(".{file_name}.tmp"));

        let json = serde_json::to_string_pretty(records)?;
        fs::write(&tmp_path, json).map_err(io_error)?;
        fs::rename(&tmp_path, &self.cache_file).map_err(io_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn checksum_is_reproducible() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let file_path = dir.path().join("a.txt");
        fs::write(&file_path, b"abc")?;

        let first = digest_file(&file_path)?;
        let second = digest_file(&file_path)?;
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        Ok(())
    }

    #[test]
    fn hashing_a_missing_file_fails() {
        assert!(digest_file(Path::new("/definitely/not/here.txt")).is_err());
    }

    #[test]
    fn recorded_file_is_processed_until_it_changes() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let file_path = dir.path().join("notes.txt");
        fs::write(&file_path, "first version")?;

        let mut tracker = DocumentTracker::open(dir.path().join("cache.json"));
        assert!(!tracker.is_processed(&file_path));

        tracker.record(&file_path, vec!["notes_chunk_0".to_string()])?;
        assert!(tracker.is_processed(&file_path));
        assert_eq!(tracker.chunk_ids(&file_path), vec!["notes_chunk_0"]);

        fs::write(&file_path, "second version")?;
        assert!(!tracker.is_processed(&file_path));
        Ok(())
    }

    #[test]
    fn deleted_file_is_not_processed() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let file_path = dir.path().join("gone.txt");
        fs::write(&file_path, "soon gone")?;

        let mut tracker = DocumentTracker::open(dir.path().join("cache.json"));
        tracker.record(&file_path, Vec::new())?;
        fs::remove_file(&file_path)?;

        assert!(!tracker.is_processed(&file_path));
        assert!(tracker.get(&file_path).is_some());
        Ok(())
    }

    #[test]
    fn records_survive_reopen() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let cache = dir.path().join("state").join("cache.json");
        let file_path = dir.path().join("doc.txt");
        fs::write(&file_path, "persist me")?;

        {
            let mut tracker = DocumentTracker::open(&cache);
            tracker.record(&file_path, vec!["doc_chunk_0".to_string(), "doc_chunk_1".to_string()])?;
        }

        let reopened = DocumentTracker::open(&cache);
        assert_eq!(reopened.len(), 1);
        assert!(reopened.is_processed(&file_path));
        let record = reopened.get(&file_path).expect("record should be persisted");
        assert_eq!(record.file_type, ".txt");
        assert_eq!(record.size, 10);
        assert_eq!(reopened.chunk_ids(&file_path).len(), 2);
        assert!(!dir.path().join("state").join(".cache.json.tmp").exists());
        Ok(())
    }

    #[test]
    fn corrupt_cache_starts_empty() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let cache = dir.path().join("cache.json");
        fs::write(&cache, "{ not json")?;

        let tracker = DocumentTracker::open(&cache);
        assert!(tracker.is_empty());
        Ok(())
    }

    #[test]
    fn remove_unknown_path_is_noop() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut tracker = DocumentTracker::open(dir.path().join("cache.json"));
        assert!(!tracker.remove(Path::new("/nowhere.txt"))?);
        assert!(!dir.path().join("cache.json").exists());
        Ok(())
    }

    fn block_cache_writes(cache: &Path) -> std::io::Result<()> {
        let tmp = cache.with_file_name(".cache.json.tmp");
        fs::create_dir_all(tmp)
    }

    #[test]
    fn failed_save_keeps_previous_record() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let cache = dir.path().join("cache.json");
        let file_path = dir.path().join("doc.txt");
        fs::write(&file_path, "original")?;

        let mut tracker = DocumentTracker::open(&cache);
        tracker.record(&file_path, vec!["doc_chunk_0".to_string()])?;
        let before = tracker.get(&file_path).cloned();

        fs::write(&file_path, "edited and longer")?;
        block_cache_writes(&cache)?;
        let result = tracker.record(&file_path, vec!["doc_chunk_0".to_string(), "doc_chunk_1".to_string()]);

        assert!(matches!(result, Err(TrackerError::Io { .. })));
        assert_eq!(tracker.get(&file_path).cloned(), before);
        assert!(!tracker.is_processed(&file_path));
        assert_eq!(DocumentTracker::open(&cache).get(&file_path).cloned(), before);
        Ok(())
    }

    #[test]
    fn failed_remove_keeps_record() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let cache = dir.path().join("cache.json");
        let file_path = dir.path().join("doc.txt");
        fs::write(&file_path, "content")?;

        let mut tracker = DocumentTracker::open(&cache);
        tracker.record(&file_path, vec!["doc_chunk_0".to_string()])?;
        block_cache_writes(&cache)?;

        assert!(tracker.remove(&file_path).is_err());
        assert_eq!(tracker.chunk_ids(&file_path), vec!["doc_chunk_0"]);
        assert!(tracker.is_processed(&file_path));
        Ok(())
    }

    #[test]
    fn remove_persists() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let cache = dir.path().join("cache.json");
        let file_path = dir.path().join("doc.txt");
        fs::write(&file_path, "content")?;

        let mut tracker = DocumentTracker::open(&cache);
        tracker.record(&file_path, vec!["doc_chunk_0".to_string()])?;
        assert!(tracker.remove(&file_path)?);

        let reopened = DocumentTracker::open(&cache);
        assert!(reopened.is_empty());
        assert!(reopened.chunk_ids(&file_path).is_empty());
        Ok(())
    }
}
