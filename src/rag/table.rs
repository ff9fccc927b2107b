//! Persistent tables stored as a schema file plus a JSONL data file.
//!
//! Layout for a table `docs` in `dir`:
//!   `dir/docs.schema.json`  dimension, distance and creation time
//!   `dir/docs.jsonl`        one `ChunkRecord` per line, append-only

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{RagError, RagResult};
use crate::rag::index::{check_dimensions, rank, Distance, VectorIndex};
use crate::rag::record::{ChunkRecord, SearchHit};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub dimension: usize,
    pub distance: Distance,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct DiskTable {
    dir: PathBuf,
    name: String,
    schema: TableSchema,
    records: Vec<ChunkRecord>,
}

/// Removes `dir` and everything under it. Returns whether anything was removed.
pub fn reset_dir(dir: &Path) -> RagResult<bool> {
    if !dir.exists() {
        return Ok(false);
    }
    std::fs::remove_dir_all(dir)?;
    tracing::info!(path = %dir.display(), "store directory cleared");
    Ok(true)
}

/// First candidate directory that exists on disk.
pub fn find_store_dir(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|p| p.is_dir()).cloned()
}

fn validate_name(name: &str) -> RagResult<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(RagError::Store(format!(
            "invalid table name '{name}' (use letters, digits, '_' or '-')"
        )))
    }
}

fn schema_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.schema.json"))
}

fn data_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.jsonl"))
}

pub fn table_exists(dir: &Path, name: &str) -> bool {
    schema_path(dir, name).exists()
}

impl DiskTable {
    /// Creates a new table from `records`; the schema is inferred from the first record.
    pub fn create(dir: &Path, name: &str, records: Vec<ChunkRecord>, distance: Distance) -> RagResult<Self> {
        validate_name(name)?;
        if table_exists(dir, name) {
            return Err(RagError::Store(format!(
                "table '{name}' already exists in {}",
                dir.display()
            )));
        }
        let dimension = check_dimensions(None, &records)?
            .ok_or_else(|| RagError::Store("cannot create a table without records".into()))?;
        std::fs::create_dir_all(dir)?;

        let schema = TableSchema {
            dimension,
            distance,
            created_at: Utc::now(),
        };
        std::fs::write(schema_path(dir, name), serde_json::to_vec_pretty(&schema)?)?;
        std::fs::write(data_path(dir, name), b"")?;

        let mut table = Self {
            dir: dir.to_path_buf(),
            name: name.to_string(),
            schema,
            records: Vec::new(),
        };
        table.append(records)?;
        tracing::info!(
            table = name,
            path = %dir.display(),
            rows = table.records.len(),
            dimension,
            "table created"
        );
        Ok(table)
    }

    pub fn open(dir: &Path, name: &str) -> RagResult<Self> {
        validate_name(name)?;
        let schema_file = schema_path(dir, name);
        if !schema_file.exists() {
            return Err(RagError::Store(format!(
                "table '{name}' not found in {}",
                dir.display()
            )));
        }
        let schema: TableSchema = serde_json::from_slice(&std::fs::read(&schema_file)?)?;

        let file = std::fs::File::open(data_path(dir, name))?;
        let mut records = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: ChunkRecord = serde_json::from_str(&line).map_err(|e| {
                RagError::Store(format!("invalid row at line {} of table '{name}': {e}", line_no + 1))
            })?;
            records.push(record);
        }
        check_dimensions(Some(schema.dimension), &records)?;
        tracing::debug!(table = name, rows = records.len(), "table opened");
        Ok(Self {
            dir: dir.to_path_buf(),
            name: name.to_string(),
            schema,
            records,
        })
    }

    /// Opens `name` in the first candidate directory that exists.
    pub fn open_first(candidates: &[PathBuf], name: &str) -> RagResult<Self> {
        let dir = find_store_dir(candidates).ok_or_else(|| {
            RagError::Store(format!(
                "no store directory found (tried {})",
                candidates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;
        Self::open(&dir, name)
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn append(&mut self, records: Vec<ChunkRecord>) -> RagResult<()> {
        check_dimensions(Some(self.schema.dimension), &records)?;
        let mut ids: HashSet<&str> = self.records.iter().map(|r| r.id.as_str()).collect();
        if let Some(dup) = records.iter().find(|r| !ids.insert(r.id.as_str())) {
            return Err(RagError::Store(format!(
                "duplicate id '{}' in table '{}'",
                dup.id, self.name
            )));
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(data_path(&self.dir, &self.name))?;
        let mut writer = BufWriter::new(file);
        for record in &records {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        self.records.extend(records);
        Ok(())
    }
}

impl VectorIndex for DiskTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.schema.dimension)
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn add(&mut self, records: Vec<ChunkRecord>) -> RagResult<()> {
        self.append(records)
    }

    fn search(&self, query: &[f32], limit: usize) -> RagResult<Vec<SearchHit>> {
        rank(&self.records, self.dimension(), self.schema.distance, query, limit)
    }
}
