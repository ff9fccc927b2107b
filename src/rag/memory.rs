//! Ephemeral, process-local collections. Nothing survives the process.

use std::collections::HashSet;
use std::time::Duration;

use crate::errors::{RagError, RagResult};
use crate::rag::index::{check_dimensions, rank, Distance, VectorIndex};
use crate::rag::record::{ChunkRecord, SearchHit};

/// Hands out named collections; a name can only be created once per client.
#[derive(Debug, Default)]
pub struct MemoryClient {
    names: HashSet<String>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_collection(&mut self, name: &str, distance: Distance) -> RagResult<MemoryCollection> {
        if name.trim().is_empty() {
            return Err(RagError::Store("collection name is required".into()));
        }
        if !self.names.insert(name.to_string()) {
            return Err(RagError::Store(format!("collection '{name}' already exists")));
        }
        tracing::debug!(collection = name, ?distance, "memory collection created");
        Ok(MemoryCollection {
            name: name.to_string(),
            distance,
            dimension: None,
            records: Vec::new(),
        })
    }
}

#[derive(Debug)]
pub struct MemoryCollection {
    name: String,
    distance: Distance,
    dimension: Option<usize>,
    records: Vec<ChunkRecord>,
}

impl MemoryCollection {
    /// Inserts in slices of `batch_size`, sleeping `pause` between slices.
    pub async fn add_batched(
        &mut self,
        records: Vec<ChunkRecord>,
        batch_size: usize,
        pause: Duration,
    ) -> RagResult<usize> {
        let batch_size = batch_size.max(1);
        let total = records.len();
        let mut iter = records.into_iter().peekable();
        let mut start = 0usize;
        while iter.peek().is_some() {
            let batch: Vec<ChunkRecord> = iter.by_ref().take(batch_size).collect();
            let end = start + batch.len();
            tracing::info!(collection = %self.name, start, end, total, "inserting batch");
            self.add(batch)?;
            start = end;
            if start < total && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }
        Ok(total)
    }
}

impl VectorIndex for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn add(&mut self, records: Vec<ChunkRecord>) -> RagResult<()> {
        self.dimension = check_dimensions(self.dimension, &records)?;
        self.records.extend(records);
        Ok(())
    }

    fn search(&self, query: &[f32], limit: usize) -> RagResult<Vec<SearchHit>> {
        rank(&self.records, self.dimension, self.distance, query, limit)
    }
}
