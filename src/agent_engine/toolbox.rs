//! The two tools the agent can call, and the mapping from raw tool calls to actions.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::agent_engine::state::AgentAction;
use crate::config::AppConfig;
use crate::errors::RagResult;
use crate::llm::types::ToolCall;
use crate::rag::embedder::Embedder;
use crate::rag::pipeline::{render_tool_snippets, retrieve};
use crate::rag::record::SearchHit;
use crate::rag::table::{find_store_dir, DiskTable};

pub const KB_MISSING: &str = "Error: knowledge base directory not found.";
pub const KB_NO_MATCH: &str = "No information in the PDF about this.";

#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub success: bool,
    pub text: String,
}

impl ToolOutput {
    fn ok(text: impl Into<String>) -> Self {
        Self {
            success: true,
            text: text.into(),
        }
    }

    fn failed(text: impl Into<String>) -> Self {
        Self {
            success: false,
            text: text.into(),
        }
    }
}

pub struct Toolbox {
    embedder: Arc<dyn Embedder>,
    search_paths: Vec<PathBuf>,
    table: String,
    top_k: usize,
    snippet_chars: usize,
}

impl Toolbox {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        search_paths: Vec<PathBuf>,
        table: String,
        top_k: usize,
        snippet_chars: usize,
    ) -> Self {
        Self {
            embedder,
            search_paths,
            table,
            top_k,
            snippet_chars,
        }
    }

    pub fn from_config(cfg: &AppConfig, embedder: Arc<dyn Embedder>) -> Self {
        Self::new(
            embedder,
            cfg.store.search_paths.clone(),
            cfg.store.table.clone(),
            cfg.retrieval.agent_top_k,
            cfg.retrieval.agent_snippet_chars,
        )
    }

    pub async fn run(&self, action: &AgentAction) -> ToolOutput {
        match action {
            AgentAction::SearchDocuments { query } => self.search_documents(query).await,
            AgentAction::ComputeStudyHours {
                weeks,
                hours_per_day,
            } => compute_study_hours(*weeks, *hours_per_day),
        }
    }

    pub async fn search_documents(&self, query: &str) -> ToolOutput {
        tracing::info!(query, "search_documents invoked");
        let Some(dir) = find_store_dir(&self.search_paths) else {
            return ToolOutput::failed(KB_MISSING);
        };
        match self.lookup(&dir, query).await {
            Ok(hits) if hits.is_empty() => ToolOutput::ok(KB_NO_MATCH),
            Ok(hits) => ToolOutput::ok(render_tool_snippets(&hits, self.snippet_chars)),
            Err(e) => ToolOutput::failed(format!("Error reading knowledge base: {e}")),
        }
    }

    async fn lookup(&self, dir: &Path, query: &str) -> RagResult<Vec<SearchHit>> {
        let table = DiskTable::open(dir, &self.table)?;
        retrieve(&table, self.embedder.as_ref(), query, self.top_k).await
    }
}

pub fn compute_study_hours(weeks: u32, hours_per_day: f64) -> ToolOutput {
    tracing::info!(weeks, hours_per_day, "compute_study_hours invoked");
    let total = f64::from(weeks) * 7.0 * hours_per_day;
    ToolOutput::ok(format!("Total study time: {} hours.", format_hours(total)))
}

/// Whole numbers keep one decimal (`56.0`), everything else prints as-is.
pub fn format_hours(total: f64) -> String {
    if total.fract() == 0.0 {
        format!("{total:.1}")
    } else {
        format!("{total}")
    }
}

/// Maps a model tool call onto an action, validating its arguments.
pub fn parse_tool_call(tc: &ToolCall) -> Result<AgentAction, String> {
    let args: serde_json::Value = if tc.function.arguments.trim().is_empty() {
        serde_json::json!({})
    } else {
        serde_json::from_str(&tc.function.arguments)
            .map_err(|e| format!("invalid arguments for {}: {e}", tc.function.name))?
    };

    match tc.function.name.as_str() {
        "search_documents" => {
            let query = args["query"]
                .as_str()
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .ok_or("search_documents needs a non-empty 'query'")?;
            Ok(AgentAction::SearchDocuments {
                query: query.to_string(),
            })
        }
        "compute_study_hours" => {
            let weeks = whole_number(&args["weeks"]).ok_or("'weeks' must be a non-negative integer")?;
            let hours_per_day = args["hours_per_day"]
                .as_f64()
                .or_else(|| args["hours_per_day"].as_str().and_then(|s| s.trim().parse().ok()))
                .filter(|h: &f64| h.is_finite() && *h >= 0.0)
                .ok_or("'hours_per_day' must be a non-negative number")?;
            Ok(AgentAction::ComputeStudyHours {
                weeks,
                hours_per_day,
            })
        }
        other => Err(format!("unknown tool: {other}")),
    }
}

/// Accepts `4`, `4.0` or `"4"`.
fn whole_number(value: &serde_json::Value) -> Option<u32> {
    if let Some(n) = value.as_u64() {
        return u32::try_from(n).ok();
    }
    let f = value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))?;
    if f >= 0.0 && f.fract() == 0.0 && f <= f64::from(u32::MAX) {
        Some(f as u32)
    } else {
        None
    }
}
