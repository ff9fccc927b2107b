//! In-process fakes for the embedding and chat endpoints.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::{RagError, RagResult};
use crate::llm::provider::{ChunkSink, LlmProvider};
use crate::llm::types::{
    CallConfig, ChatMessage, FunctionCall, LlmResponse, StreamChunk, StreamChunkKind, ToolCall,
    ToolDef,
};
use crate::rag::embedder::Embedder;

/// Deterministic bag-of-bytes embedder. Inputs containing `FAIL` error out.
pub(crate) struct FakeEmbedder {
    dim: usize,
    short_marker: Option<String>,
    calls: AtomicUsize,
}

impl FakeEmbedder {
    pub(crate) fn new(dim: usize) -> Self {
        Self {
            dim,
            short_marker: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Inputs containing `marker` get a vector one element too short.
    pub(crate) fn with_short_vectors_for(mut self, marker: &str) -> Self {
        self.short_marker = Some(marker.to_string());
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dim];
        for b in text.to_lowercase().bytes() {
            v[b as usize % self.dim] += 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, inputs: &[String]) -> RagResult<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut out = Vec::with_capacity(inputs.len());
        for text in inputs {
            if text.contains("FAIL") {
                return Err(RagError::Embedding("429 Too Many Requests".into()));
            }
            let mut v = self.vector_for(text);
            if self.short_marker.as_deref().is_some_and(|m| text.contains(m)) {
                v.pop();
            }
            out.push(v);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        self.dim
    }
}

/// Replays queued responses and records every conversation it was sent.
pub(crate) struct ScriptedProvider {
    replies: Mutex<VecDeque<RagResult<LlmResponse>>>,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedProvider {
    pub(crate) fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn reply_text(self, text: &str) -> Self {
        self.push(Ok(LlmResponse {
            content: text.to_string(),
            ..LlmResponse::default()
        }))
    }

    pub(crate) fn reply_tool(self, id: &str, name: &str, arguments: &str) -> Self {
        self.reply_tool_calls(&[(id, name, arguments)])
    }

    /// One assistant turn carrying several tool calls, as `(id, name, arguments)`.
    pub(crate) fn reply_tool_calls(self, calls: &[(&str, &str, &str)]) -> Self {
        let tool_calls = calls
            .iter()
            .map(|(id, name, arguments)| ToolCall {
                id: id.to_string(),
                call_type: "function".to_string(),
                function: FunctionCall {
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                },
            })
            .collect();
        self.push(Ok(LlmResponse {
            tool_calls,
            ..LlmResponse::default()
        }))
    }

    pub(crate) fn reply_error(self, message: &str) -> Self {
        self.push(Err(RagError::LlmProvider(message.to_string())))
    }

    fn push(self, reply: RagResult<LlmResponse>) -> Self {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(reply);
        }
        self
    }

    pub(crate) fn conversations(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        _tools: Vec<ToolDef>,
        _cfg: &CallConfig,
        sink: &dyn ChunkSink,
    ) -> RagResult<LlmResponse> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(messages);
        }
        let next = self
            .replies
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or_else(|| Err(RagError::LlmProvider("script exhausted".into())));
        if let Ok(resp) = &next {
            if !resp.content.is_empty() {
                sink.emit(&StreamChunk {
                    kind: StreamChunkKind::Content,
                    content: resp.content.clone(),
                });
            }
        }
        next
    }

    async fn list_models(&self) -> RagResult<Vec<String>> {
        Ok(vec!["models/scripted-1".into(), "models/scripted-embed".into()])
    }
}

/// Collects content chunks for assertions.
#[derive(Default)]
pub(crate) struct CollectSink {
    pub(crate) text: Mutex<String>,
}

impl ChunkSink for CollectSink {
    fn emit(&self, chunk: &StreamChunk) {
        if chunk.kind == StreamChunkKind::Content {
            if let Ok(mut t) = self.text.lock() {
                t.push_str(&chunk.content);
            }
        }
    }
}

pub(crate) fn test_call_config() -> CallConfig {
    CallConfig {
        model: "scripted-1".into(),
        stream: false,
        temperature: 0.0,
        response_format: None,
    }
}
