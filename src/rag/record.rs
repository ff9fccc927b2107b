use serde::{Deserialize, Serialize};

/// The only persisted entity: one chunk of source text plus its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub text: String,
    /// Path of the document the chunk came from.
    pub source: String,
    pub vector: Vec<f32>,
}

impl ChunkRecord {
    pub fn new(ordinal: usize, text: String, source: String, vector: Vec<f32>) -> Self {
        Self {
            id: format!("id_{ordinal}"),
            text,
            source,
            vector,
        }
    }
}

/// A record returned by a nearest-neighbour query. Smaller distance is closer.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub record: ChunkRecord,
    pub distance: f32,
}
