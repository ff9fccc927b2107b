use crate::llm::types::ToolCall;

/// Lifecycle states of the study agent for a single goal.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Planning { goal: String },
    Executing { calls: Vec<ToolCall> },
    Evaluating { results: Vec<ActionResult> },
    Done { summary: String },
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentAction {
    SearchDocuments { query: String },
    ComputeStudyHours { weeks: u32, hours_per_day: f64 },
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ActionResult {
    pub tool_call_id: String,
    /// `None` when the call could not be mapped to a known tool.
    pub action: Option<AgentAction>,
    pub success: bool,
    pub output: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LoopConfig {
    /// Model calls allowed per goal.
    pub max_steps: u32,
    /// Failed tool calls tolerated per goal.
    pub max_failures: u32,
}

impl From<&crate::config::AgentConfig> for LoopConfig {
    fn from(cfg: &crate::config::AgentConfig) -> Self {
        Self {
            max_steps: cfg.max_steps,
            max_failures: cfg.max_failures,
        }
    }
}
