//! Brute-force nearest-neighbour search shared by the two local stores.

use serde::{Deserialize, Serialize};

use crate::errors::{RagError, RagResult};
use crate::rag::record::{ChunkRecord, SearchHit};
use crate::rag::similarity::{cosine_similarity, dot, squared_l2};

/// Distance metric. Every variant orders "smaller is closer".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distance {
    /// Squared Euclidean distance.
    #[default]
    L2,
    /// `1 - cosine_similarity`.
    Cosine,
    /// Negated inner product.
    Dot,
}

impl Distance {
    pub fn measure(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Distance::L2 => squared_l2(a, b),
            Distance::Cosine => 1.0 - cosine_similarity(a, b),
            Distance::Dot => -dot(a, b),
        }
    }
}

/// Minimal contract of a local vector store.
pub trait VectorIndex: Send + Sync {
    fn name(&self) -> &str;

    /// Fixed by the first inserted record; `None` while empty.
    fn dimension(&self) -> Option<usize>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn add(&mut self, records: Vec<ChunkRecord>) -> RagResult<()>;

    fn search(&self, query: &[f32], limit: usize) -> RagResult<Vec<SearchHit>>;
}

/// Checks that every record matches `expected` (or the first record when unset) and returns the dimension.
pub(crate) fn check_dimensions(expected: Option<usize>, records: &[ChunkRecord]) -> RagResult<Option<usize>> {
    let mut dimension = expected;
    for record in records {
        match dimension {
            None => {
                if record.vector.is_empty() {
                    return Err(RagError::Store(format!("record {} has an empty vector", record.id)));
                }
                dimension = Some(record.vector.len());
            }
            Some(dim) if dim != record.vector.len() => {
                return Err(RagError::Store(format!(
                    "record {} has {} dimensions, expected {}",
                    record.id,
                    record.vector.len(),
                    dim
                )));
            }
            Some(_) => {}
        }
    }
    Ok(dimension)
}

/// Scans `records` and returns the `limit` closest ones, ties kept in insertion order.
pub(crate) fn rank(
    records: &[ChunkRecord],
    dimension: Option<usize>,
    distance: Distance,
    query: &[f32],
    limit: usize,
) -> RagResult<Vec<SearchHit>> {
    let Some(dim) = dimension else {
        return Ok(Vec::new());
    };
    if query.len() != dim {
        return Err(RagError::Store(format!(
            "query has {} dimensions, index expects {}",
            query.len(),
            dim
        )));
    }
    let mut scored: Vec<(usize, f32)> = records
        .iter()
        .enumerate()
        .map(|(i, r)| (i, distance.measure(query, &r.vector)))
        .collect();
    scored.sort_by(|a, b| a.1.total_cmp(&b.1));
    Ok(scored
        .into_iter()
        .take(limit)
        .map(|(i, d)| SearchHit {
            record: records[i].clone(),
            distance: d,
        })
        .collect())
}
