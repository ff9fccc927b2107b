pub mod embedder;
pub mod index;
pub mod memory;
pub mod pipeline;
pub mod record;
pub mod similarity;
pub mod table;
