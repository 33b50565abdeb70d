//! Chunking utilities for splitting a document into bounded passages.
//!
//! A document's cleaned text is split into sentences, and consecutive
//! sentences are grouped into fixed-size chunks that are each embedded and
//! retrieved independently. Groups that end up too long (usually a table or
//! reference list that extraction flattened into one "sentence") are
//! dropped instead of truncated.

use tracing::debug;

use crate::text_util::{clean_extracted_text, split_sentences};

/// Default number of sentences grouped into one chunk.
pub const DEFAULT_SENTENCES_PER_CHUNK: usize = 5;

/// Default upper bound on a chunk's length in characters.
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 2000;

/// Chunking configuration.
///
/// # Examples
///
/// ```
/// use docseek::chunking::{ChunkingConfig, DEFAULT_MAX_CHUNK_CHARS};
///
/// let config = ChunkingConfig::default();
/// assert_eq!(config.sentences_per_chunk, 5);
/// assert_eq!(config.max_chunk_chars, DEFAULT_MAX_CHUNK_CHARS);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Number of consecutive sentences per chunk.
    pub sentences_per_chunk: usize,
    /// Chunks longer than this many characters are skipped.
    pub max_chunk_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            sentences_per_chunk: DEFAULT_SENTENCES_PER_CHUNK,
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
        }
    }
}

/// A chunk of text from a larger document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The chunk text content.
    pub text: String,
    /// Zero-based position among the document's kept chunks.
    pub index: usize,
}

/// Group sentences into chunks of `config.sentences_per_chunk`.
///
/// # Examples
///
/// ```
/// use docseek::chunking::{chunk_sentences, ChunkingConfig};
///
/// let sentences: Vec<String> =
///     (1..=7).map(|i| format!("Sentence {i}.")).collect();
/// let chunks = chunk_sentences(&sentences, &ChunkingConfig::default());
/// assert_eq!(chunks.len(), 2);
/// assert!(chunks[0].text.starts_with("Sentence 1."));
/// assert_eq!(chunks[1].text, "Sentence 6. Sentence 7.");
/// ```
pub fn chunk_sentences(
    sentences: &[String],
    config: &ChunkingConfig,
) -> Vec<Chunk> {
    let per_chunk = config.sentences_per_chunk.max(1);
    let mut chunks = Vec::new();

    for (group, window) in sentences.chunks(per_chunk).enumerate() {
        let text = window.join(" ");
        let len = text.chars().count();
        if len > config.max_chunk_chars {
            debug!(group, len, "skipping oversized chunk");
            continue;
        }
        chunks.push(Chunk {
            text,
            index: chunks.len(),
        });
    }

    chunks
}

/// Clean raw extracted text, split it into sentences and chunk them.
pub fn chunk_document(raw_text: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    let cleaned = clean_extracted_text(raw_text);
    let sentences = split_sentences(&cleaned);
    chunk_sentences(&sentences, config)
}
