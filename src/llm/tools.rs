use crate::errors::{RagError, RagResult};
use crate::llm::types::ToolDef;

/// Loads built-in tool definitions from prompts/tools/builtin.json.
/// The JSON is embedded at compile time via include_str!.
pub fn load_builtin_tools() -> RagResult<Vec<ToolDef>> {
    let json = include_str!("../../prompts/tools/builtin.json");
    serde_json::from_str(json).map_err(|e| RagError::Config(format!("Failed to parse builtin tools: {e}")))
}
