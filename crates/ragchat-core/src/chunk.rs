//! Fixed-window text chunker with overlap.
//!
//! Splits document text into [`Chunk`]s of `chunk_size` characters where
//! consecutive chunks share `overlap` characters. Offsets are counted in
//! Unicode scalar values, so multi-byte text never splits inside a
//! character.
//!
//! # Algorithm
//!
//! 1. Reject `chunk_size == 0` or `overlap >= chunk_size`.
//! 2. Chunk `i` starts at `i × (chunk_size − overlap)` and ends at
//!    `start + chunk_size`, clipped to the text length.
//! 3. Stop after the first chunk that reaches the end of the text; the
//!    final chunk may be shorter than `chunk_size`.
//! 4. Empty text yields no chunks.
//!
//! Each chunk receives a deterministic id (`{document_id}:{index}`) and a
//! SHA-256 hash of its text.
//!
//! # Example
//!
//! ```rust
//! use ragchat_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("doc-1", "The cat sat. The dog ran.", 10, 2).unwrap();
//! let spans: Vec<(usize, usize)> = chunks.iter().map(|c| (c.char_start, c.char_end)).collect();
//! assert_eq!(spans, vec![(0, 10), (8, 18), (16, 25)]);
//! ```

use sha2::{Digest, Sha256};

use crate::error::{RagError, RagResult};
use crate::models::Chunk;

/// Split `text` into overlapping character windows.
///
/// # Errors
///
/// Returns [`RagError::Config`] when `chunk_size` is zero or `overlap` is
/// not strictly smaller than `chunk_size`.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> RagResult<Vec<Chunk>> {
    validate_params(chunk_size, overlap)?;

    if text.is_empty() {
        return Ok(Vec::new());
    }

    // Byte offset of every character, plus the end of the string.
    let offsets: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total_chars = offsets.len() - 1;
    let stride = chunk_size - overlap;

    let mut chunks = Vec::with_capacity(total_chars / stride + 1);
    let mut start = 0usize;
    loop {
        let end = (start + chunk_size).min(total_chars);
        let slice = &text[offsets[start]..offsets[end]];
        chunks.push(make_chunk(document_id, chunks.len(), slice, start, end));
        if end == total_chars {
            break;
        }
        start += stride;
    }

    Ok(chunks)
}

/// Check chunking parameters without touching any text.
pub fn validate_params(chunk_size: usize, overlap: usize) -> RagResult<()> {
    if chunk_size == 0 {
        return Err(RagError::Config("chunk_size must be > 0".to_string()));
    }
    if overlap >= chunk_size {
        return Err(RagError::Config(format!(
            "overlap ({}) must be smaller than chunk_size ({})",
            overlap, chunk_size
        )));
    }
    Ok(())
}

/// Rebuild the original text from an ordered run of chunks by dropping the
/// characters each chunk shares with its predecessor.
pub fn reconstruct(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    let mut covered = 0usize;
    for chunk in chunks {
        let skip = covered.saturating_sub(chunk.char_start);
        out.extend(chunk.text.chars().skip(skip));
        covered = covered.max(chunk.char_end);
    }
    out
}

/// Deterministic chunk id for a document/index pair.
pub fn chunk_id(document_id: &str, sequence_index: usize) -> String {
    format!("{}:{}", document_id, sequence_index)
}

/// SHA-256 of `text`, hex encoded.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(
    document_id: &str,
    index: usize,
    text: &str,
    char_start: usize,
    char_end: usize,
) -> Chunk {
    Chunk {
        id: chunk_id(document_id, index),
        document_id: document_id.to_string(),
        sequence_index: index,
        text: text.to_string(),
        char_start,
        char_end,
        hash: hash_text(text),
        embedding: None,
    }
}
