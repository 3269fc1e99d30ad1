use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::warn;

pub const DEFAULT_CHUNK_SIZE: usize = 1_000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

/// Window sizes for [`split_text`], measured in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size,
            overlap,
        }
    }

    /// Returns a config whose overlap is strictly smaller than the chunk size.
    pub fn clamped(self) -> Self {
        if self.chunk_size > 0 && self.overlap >= self.chunk_size {
            let overlap = self.chunk_size / 2;
            warn!(
                chunk_size = self.chunk_size,
                requested = self.overlap,
                adjusted = overlap,
                "chunk overlap too large, clamping"
            );
            return Self {
                chunk_size: self.chunk_size,
                overlap,
            };
        }
        self
    }
}

/// Splits `text` with a sliding window of `chunk_size` characters that
/// advances by `chunk_size - overlap`. Windows that are blank after trimming
/// are skipped; emitted chunks keep their original whitespace.
pub fn split_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    let config = config.clamped();
    let mut chunks = Vec::new();

    if text.is_empty() || config.chunk_size == 0 {
        return chunks;
    }

    let chars: Vec<char> = text.chars().collect();
    let step = config.chunk_size.saturating_sub(config.overlap);
    let mut start = 0;

    while start < chars.len() {
        let end = (start + config.chunk_size).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        if !piece.trim().is_empty() {
            chunks.push(piece);
        }

        if end == chars.len() {
            break;
        }

        if step == 0 {
            warn!(start, end, "chunking made no progress, stopping");
            break;
        }
        start += step;
    }

    chunks
}

/// Stable identifier for the `index`-th chunk of `source`.
///
/// The file stem keeps ids readable; the short path digest keeps files with
/// the same name in different directories apart.
pub fn chunk_id(source: &Path, index: usize) -> String {
    let stem = source
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string());

    let mut hasher = Sha256::new();
    hasher.update(source.to_string_lossy().as_bytes());
    let digest = format!("{:x}", hasher.finalize());

    format!("{stem}-{}_chunk_{index}", &digest[..8])
}

pub fn chunk_ids(source: &Path, count: usize) -> Vec<String> {
    (0..count).map(|index| chunk_id(source, index)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_window_example() {
        let chunks = split_text("0123456789", ChunkingConfig::new(4, 1));
        assert_eq!(chunks, vec!["0123", "3456", "6789"]);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(split_text("", ChunkingConfig::default()).is_empty());
    }

    #[test]
    fn short_text_yields_single_chunk() {
        let chunks = split_text("short text", ChunkingConfig::new(50, 10));
        assert_eq!(chunks, vec!["short text"]);
    }

    #[test]
    fn chunks_never_exceed_chunk_size() {
        let text = "This is a long string of text that needs to be split into smaller chunks.";
        let chunks = split_text(text, ChunkingConfig::new(50, 10));
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 50));
        assert!(text.starts_with(chunks[0].as_str()));
        assert!(text.ends_with(chunks[chunks.len() - 1].as_str()));
    }

    #[test]
    fn windows_advance_by_size_minus_overlap() {
        let text: String = ('a'..='z').collect();
        let chunks = split_text(&text, ChunkingConfig::new(10, 3));
        let starts: Vec<char> = chunks
            .iter()
            .filter_map(|chunk| chunk.chars().next())
            .collect();
        assert_eq!(starts, vec!['a', 'h', 'o', 'v']);
    }

    #[test]
    fn blank_windows_are_skipped() {
        let text = format!("abcd{}efgh", " ".repeat(8));
        let chunks = split_text(&text, ChunkingConfig::new(4, 0));
        assert_eq!(chunks, vec!["abcd", "efgh"]);
    }

    #[test]
    fn oversized_overlap_is_clamped_to_half() {
        let config = ChunkingConfig::new(4, 4).clamped();
        assert_eq!(config.overlap, 2);

        let chunks = split_text("abcdefgh", ChunkingConfig::new(4, 9));
        assert_eq!(chunks, vec!["abcd", "cdef", "efgh"]);
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let chunks = split_text("привіт світ", ChunkingConfig::new(6, 0));
        assert_eq!(chunks, vec!["привіт", " світ"]);
    }

    #[test]
    fn splitting_is_deterministic() {
        let text = "Hydraulic pressure and flow ".repeat(20);
        let config = ChunkingConfig::new(64, 16);
        assert_eq!(split_text(&text, config), split_text(&text, config));
    }

    #[test]
    fn chunk_ids_differ_for_same_stem_in_other_directories() {
        let first = chunk_id(Path::new("/docs/a/report.txt"), 0);
        let second = chunk_id(Path::new("/docs/b/report.txt"), 0);
        assert_ne!(first, second);
        assert!(first.starts_with("report-"));
        assert!(first.ends_with("_chunk_0"));
    }

    #[test]
    fn chunk_ids_are_stable() {
        let path = Path::new("/docs/manual.pdf");
        assert_eq!(chunk_ids(path, 3), chunk_ids(path, 3));
        assert_eq!(chunk_ids(path, 3)[2], chunk_id(path, 2));
    }
}
