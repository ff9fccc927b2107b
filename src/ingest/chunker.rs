//! Fixed-width character chunking.
//!
//! Chunks are cut on `char` boundaries, never in the middle of a UTF-8
//! sequence. There is no sentence or paragraph awareness: a chunk is exactly
//! `size` characters except possibly the last one.

use crate::errors::{RagError, RagResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWidthChunker {
    size: usize,
    overlap: usize,
}

impl FixedWidthChunker {
    pub fn new(size: usize, overlap: usize) -> RagResult<Self> {
        if size == 0 {
            return Err(RagError::Config("chunk_size must be positive".into()));
        }
        if overlap >= size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({overlap}) must be smaller than chunk_size ({size})"
            )));
        }
        Ok(Self { size, overlap })
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let step = self.size - self.overlap;
        let mut chunks = Vec::with_capacity(chars.len() / step + 1);
        let mut start = 0usize;
        while start < chars.len() {
            let end = (start + self.size).min(chars.len());
            chunks.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += step;
        }
        chunks
    }
}

impl Default for FixedWidthChunker {
    fn default() -> Self {
        Self {
            size: 500,
            overlap: 0,
        }
    }
}
