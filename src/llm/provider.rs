use std::io::Write;

use async_trait::async_trait;

use crate::errors::RagResult;
use crate::llm::types::{CallConfig, ChatMessage, LlmResponse, StreamChunk, StreamChunkKind, ToolDef};

/// Unified LLM provider trait. New providers implement this and register in config.toml.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns the provider's identifier (matches config.toml key).
    fn name(&self) -> &str;

    /// Runs one chat completion. Streamed chunks are forwarded to `sink` as they
    /// arrive; the accumulated response is returned either way.
    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDef>,
        cfg: &CallConfig,
        sink: &dyn ChunkSink,
    ) -> RagResult<LlmResponse>;

    /// Model identifiers advertised by the provider.
    async fn list_models(&self) -> RagResult<Vec<String>>;
}

/// Receives incremental output from a chat call.
pub trait ChunkSink: Send + Sync {
    fn emit(&self, chunk: &StreamChunk);
}

/// Drops every chunk.
pub struct NullSink;

impl ChunkSink for NullSink {
    fn emit(&self, _chunk: &StreamChunk) {}
}

/// Prints answer text to stdout as it streams in.
pub struct StdoutSink;

impl ChunkSink for StdoutSink {
    fn emit(&self, chunk: &StreamChunk) {
        let mut out = std::io::stdout().lock();
        match chunk.kind {
            StreamChunkKind::Content => {
                let _ = out.write_all(chunk.content.as_bytes());
                let _ = out.flush();
            }
            StreamChunkKind::Done => {
                let _ = out.write_all(b"\n");
                let _ = out.flush();
            }
            _ => {}
        }
    }
}
