//! Turning an input PDF into fixed-width text chunks.

pub mod chunker;
pub mod pdf;

pub use chunker::FixedWidthChunker;
pub use pdf::extract_text;
