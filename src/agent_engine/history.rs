use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::RagResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub ts: i64,
    pub role: String,
    pub content: Option<String>,
    pub action: Option<serde_json::Value>,
}

impl HistoryEntry {
    pub fn now(role: &str, content: Option<String>, action: Option<serde_json::Value>) -> Self {
        Self {
            ts: chrono::Utc::now().timestamp_millis(),
            role: role.to_string(),
            content,
            action,
        }
    }
}

pub struct SessionHistory {
    session_id: String,
    entries: Vec<HistoryEntry>,
    file_path: PathBuf,
}

impl SessionHistory {
    pub fn new() -> Self {
        Self::in_dir(&data_dir_or_cwd())
    }

    pub fn in_dir(dir: &Path) -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        let file_path = dir.join(format!("session_{session_id}.jsonl"));
        Self {
            session_id,
            entries: Vec::new(),
            file_path,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    /// Append the latest entry to the JSONL file.
    pub fn flush(&self) -> RagResult<()> {
        if let Some(last) = self.entries.last() {
            let line = serde_json::to_string(last)?;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.file_path)?;
            writeln!(file, "{}", line)?;
            tracing::debug!(path = %self.file_path.display(), "history entry flushed");
        }
        Ok(())
    }

    /// Push and flush; a write failure is logged, never fatal.
    pub fn record(&mut self, entry: HistoryEntry) {
        self.push(entry);
        if let Err(e) = self.flush() {
            tracing::warn!(error = %e, "could not write session history");
        }
    }
}

impl Default for SessionHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// `<data_local_dir>/ragbench/sessions`, falling back to the working directory.
fn data_dir_or_cwd() -> PathBuf {
    if let Some(base) = dirs::data_local_dir() {
        let d = base.join("ragbench").join("sessions");
        if std::fs::create_dir_all(&d).is_ok() {
            return d;
        }
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}
