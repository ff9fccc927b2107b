use std::sync::Arc;

use crate::agent_engine::history::{HistoryEntry, SessionHistory};
use crate::agent_engine::loop_control::LoopController;
use crate::agent_engine::state::{ActionResult, AgentState, LoopConfig};
use crate::agent_engine::toolbox::{parse_tool_call, Toolbox};
use crate::config::AppConfig;
use crate::errors::{RagError, RagResult};
use crate::llm::provider::{LlmProvider, NullSink};
use crate::llm::registry::ProviderRegistry;
use crate::llm::tools::load_builtin_tools;
use crate::llm::types::{CallConfig, ChatMessage, ToolCall, ToolDef};
use crate::rag::embedder::Embedder;

pub struct AgentEngine {
    state: AgentState,
    loop_ctrl: LoopController,
    history: Option<SessionHistory>,
    provider: Arc<dyn LlmProvider>,
    call_cfg: CallConfig,
    tools: Vec<ToolDef>,
    toolbox: Toolbox,
    system_prompt: String,

    // Conversation context, reset per goal.
    conv_messages: Vec<ChatMessage>,
}

impl AgentEngine {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        call_cfg: CallConfig,
        toolbox: Toolbox,
        system_prompt: String,
        loop_config: LoopConfig,
        history: Option<SessionHistory>,
    ) -> RagResult<Self> {
        Ok(Self {
            state: AgentState::Idle,
            loop_ctrl: LoopController::new(loop_config),
            history,
            provider,
            call_cfg,
            tools: load_builtin_tools()?,
            toolbox,
            system_prompt,
            conv_messages: Vec::new(),
        })
    }

    /// Engine on the `tools` role, searching the configured store.
    pub fn from_config(
        cfg: &AppConfig,
        registry: &ProviderRegistry,
        embedder: Arc<dyn Embedder>,
    ) -> RagResult<Self> {
        let (provider, call_cfg) = registry.call_config_for_role("tools")?;
        let history = cfg.agent.record_history.then(SessionHistory::new);
        if let Some(h) = &history {
            tracing::info!(session = h.session_id(), path = %h.path().display(), "recording agent session");
        }
        Self::new(
            provider,
            call_cfg,
            Toolbox::from_config(cfg, embedder),
            cfg.prompts.agent_system().to_string(),
            LoopConfig::from(&cfg.agent),
            history,
        )
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    /// Runs one goal to completion and returns the model's final answer.
    pub async fn run_goal(&mut self, goal: &str) -> RagResult<String> {
        tracing::info!(goal = %goal, "goal received → Planning");
        self.loop_ctrl.reset();
        self.conv_messages = vec![
            ChatMessage::system(self.system_prompt.clone()),
            ChatMessage::user(goal),
        ];
        self.record(HistoryEntry::now("user", Some(goal.to_string()), None));
        self.state = AgentState::Planning {
            goal: goal.to_string(),
        };

        loop {
            match self.state.clone() {
                AgentState::Planning { goal } => {
                    if let Some(reason) = self.loop_ctrl.should_stop() {
                        tracing::warn!(reason = %reason, "loop controller triggered stop");
                        self.state = AgentState::Error { message: reason };
                        continue;
                    }
                    self.plan(&goal).await;
                }

                AgentState::Executing { calls } => {
                    let mut results = Vec::with_capacity(calls.len());
                    for tc in &calls {
                        results.push(self.execute(tc).await);
                    }
                    self.state = AgentState::Evaluating { results };
                }

                AgentState::Evaluating { results } => {
                    for result in results.iter().filter(|r| !r.success) {
                        self.loop_ctrl.record_failure();
                        tracing::warn!(tool_call = %result.tool_call_id, output = %result.output, "tool call failed");
                    }
                    tracing::info!("Evaluating → Planning");
                    self.state = AgentState::Planning {
                        goal: goal.to_string(),
                    };
                }

                AgentState::Done { summary } => {
                    self.record(HistoryEntry::now("assistant", Some(summary.clone()), None));
                    self.state = AgentState::Idle;
                    return Ok(summary);
                }

                AgentState::Error { message } => {
                    self.record(HistoryEntry::now("error", Some(message.clone()), None));
                    self.state = AgentState::Idle;
                    return Err(RagError::Agent(message));
                }

                AgentState::Idle => {
                    return Err(RagError::Agent("agent left the run without an answer".into()));
                }
            }
        }
    }

    /// Planning: call the model with the full conversation.
    async fn plan(&mut self, goal: &str) {
        self.loop_ctrl.record_step();
        tracing::info!(
            goal = %goal,
            step = self.loop_ctrl.steps(),
            messages = self.conv_messages.len(),
            "Planning → calling LLM"
        );

        match self
            .provider
            .chat(self.conv_messages.clone(), self.tools.clone(), &self.call_cfg, &NullSink)
            .await
        {
            Ok(response) if response.tool_calls.is_empty() => {
                tracing::info!("content-only response → Done");
                self.state = AgentState::Done {
                    summary: response.content.trim().to_string(),
                };
            }
            Ok(response) => {
                tracing::info!(
                    tools = ?response.tool_calls.iter().map(|tc| tc.function.name.as_str()).collect::<Vec<_>>(),
                    "Planning → Executing"
                );
                self.conv_messages.push(ChatMessage::assistant(
                    response.content.clone(),
                    response.tool_calls.clone(),
                ));
                self.state = AgentState::Executing {
                    calls: response.tool_calls,
                };
            }
            Err(e) => {
                tracing::error!(error = %e, "LLM call failed");
                self.state = AgentState::Error {
                    message: e.to_string(),
                };
            }
        }
    }

    /// Executes one tool call and appends its result to the conversation.
    async fn execute(&mut self, tc: &ToolCall) -> ActionResult {
        let (action, success, output) = match parse_tool_call(tc) {
            Ok(action) => {
                tracing::info!(?action, "Executing");
                let out = self.toolbox.run(&action).await;
                (Some(action), out.success, out.text)
            }
            Err(e) => {
                tracing::warn!(tool = %tc.function.name, error = %e, "rejected tool call");
                (None, false, format!("Error: {e}"))
            }
        };

        self.conv_messages
            .push(ChatMessage::tool(tc.id.clone(), output.clone()));

        let result = ActionResult {
            tool_call_id: tc.id.clone(),
            action,
            success,
            output,
            timestamp: chrono::Utc::now(),
        };
        let action_json = serde_json::to_value(&result).ok();
        self.record(HistoryEntry::now("tool", None, action_json));
        result
    }

    fn record(&mut self, entry: HistoryEntry) {
        if let Some(history) = self.history.as_mut() {
            history.record(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::index::Distance;
    use crate::rag::record::ChunkRecord;
    use crate::rag::table::DiskTable;
    use crate::testing::{test_call_config, FakeEmbedder, ScriptedProvider};

    fn engine(provider: Arc<ScriptedProvider>, toolbox: Toolbox, max_steps: u32) -> AgentEngine {
        AgentEngine::new(
            provider,
            test_call_config(),
            toolbox,
            "system".into(),
            LoopConfig {
                max_steps,
                max_failures: 2,
            },
            None,
        )
        .unwrap()
    }

    fn empty_toolbox() -> Toolbox {
        Toolbox::new(Arc::new(FakeEmbedder::new(8)), Vec::new(), "documents".into(), 3, 300)
    }

    #[tokio::test]
    async fn direct_answer_needs_no_tools() {
        let provider = Arc::new(ScriptedProvider::new().reply_text("  Hello!  "));
        let mut agent = engine(provider.clone(), empty_toolbox(), 8);
        assert_eq!(agent.run_goal("hi").await.unwrap(), "Hello!");
        assert!(matches!(agent.state(), AgentState::Idle));

        let convs = provider.conversations();
        assert_eq!(convs.len(), 1);
        assert_eq!(convs[0][0].role, "system");
        assert_eq!(convs[0][1].content, "hi");
    }

    #[tokio::test]
    async fn tool_result_is_fed_back_before_the_answer() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .reply_tool("call_1", "compute_study_hours", r#"{"weeks":4,"hours_per_day":2}"#)
                .reply_text("You will study 56 hours."),
        );
        let mut agent = engine(provider.clone(), empty_toolbox(), 8);
        let answer = agent.run_goal("4 weeks at 2h a day?").await.unwrap();
        assert_eq!(answer, "You will study 56 hours.");

        let second = &provider.conversations()[1];
        let assistant = &second[2];
        assert_eq!(assistant.role, "assistant");
        assert_eq!(assistant.tool_calls.as_ref().map(Vec::len), Some(1));
        let tool = &second[3];
        assert_eq!(tool.role, "tool");
        assert_eq!(tool.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(tool.content, "Total study time: 56.0 hours.");
    }

    #[tokio::test]
    async fn every_call_of_a_turn_is_executed_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("vector_data");
        let embedder = Arc::new(FakeEmbedder::new(16));
        let text = "prompt engineering module";
        DiskTable::create(
            &dir,
            "documents",
            vec![ChunkRecord::new(0, text.into(), "course.pdf".into(), embedder.vector_for(text))],
            Distance::L2,
        )
        .unwrap();

        let provider = Arc::new(
            ScriptedProvider::new()
                .reply_tool_calls(&[
                    ("a", "search_documents", r#"{"query":"prompt engineering"}"#),
                    ("b", "compute_study_hours", r#"{"weeks":1,"hours_per_day":1.5}"#),
                ])
                .reply_text("done"),
        );
        let toolbox = Toolbox::new(embedder, vec![dir], "documents".into(), 3, 300);
        let mut agent = engine(provider.clone(), toolbox, 8);
        agent.run_goal("plan").await.unwrap();

        let second = &provider.conversations()[1];
        let tools: Vec<(&str, &str)> = second
            .iter()
            .filter(|m| m.role == "tool")
            .map(|m| (m.tool_call_id.as_deref().unwrap_or(""), m.content.as_str()))
            .collect();
        assert_eq!(
            tools,
            vec![
                ("a", "- prompt engineering module..."),
                ("b", "Total study time: 10.5 hours."),
            ]
        );
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_to_the_model() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .reply_tool("x", "delete_everything", "{}")
                .reply_text("Sorry, I cannot do that."),
        );
        let mut agent = engine(provider.clone(), empty_toolbox(), 8);
        let answer = agent.run_goal("go").await.unwrap();
        assert_eq!(answer, "Sorry, I cannot do that.");
        let tool_msg = &provider.conversations()[1][3];
        assert_eq!(tool_msg.content, "Error: unknown tool: delete_everything");
    }

    #[tokio::test]
    async fn repeated_failures_stop_the_run() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .reply_tool("1", "search_documents", r#"{"query":"a"}"#)
                .reply_tool("2", "search_documents", r#"{"query":"b"}"#)
                .reply_text("never reached"),
        );
        let mut agent = engine(provider.clone(), empty_toolbox(), 8);
        let err = agent.run_goal("search").await.unwrap_err();
        assert!(matches!(err, RagError::Agent(_)));
        assert!(err.to_string().contains("2 tool calls failed"));
        assert_eq!(provider.conversations().len(), 2);
    }

    #[tokio::test]
    async fn step_budget_and_provider_errors_end_the_run() {
        let looping = Arc::new(
            ScriptedProvider::new()
                .reply_tool("1", "compute_study_hours", r#"{"weeks":1,"hours_per_day":1}"#)
                .reply_tool("2", "compute_study_hours", r#"{"weeks":1,"hours_per_day":1}"#),
        );
        let mut agent = engine(looping, empty_toolbox(), 2);
        let err = agent.run_goal("loop").await.unwrap_err();
        assert!(err.to_string().contains("2 model calls"));

        let failing = Arc::new(ScriptedProvider::new().reply_error("503 Service Unavailable"));
        let mut agent = engine(failing, empty_toolbox(), 8);
        let err = agent.run_goal("hi").await.unwrap_err();
        assert!(err.to_string().contains("503"));
        assert!(matches!(agent.state(), AgentState::Idle));
    }
}
