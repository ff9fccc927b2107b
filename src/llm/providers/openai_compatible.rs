use std::collections::BTreeMap;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;

use crate::errors::{RagError, RagResult};
use crate::llm::provider::{ChunkSink, LlmProvider};
use crate::llm::sse_parser;
use crate::llm::types::{
    CallConfig, ChatMessage, FunctionCall, LlmResponse, StreamChunk, StreamChunkKind, ToolCall,
    ToolDef,
};

/// Tool call accumulator entry: (id, type, name, accumulated_arguments).
type ToolCallBuilder = (String, String, String, String);

pub struct OpenAiCompatibleProvider {
    id: String,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: String, api_base: String, api_key: String) -> Self {
        Self {
            id,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn ensure_key(&self) -> RagResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(RagError::LlmProvider(format!(
                "no API key for provider '{}' (set RAGBENCH_{}_API_KEY or its api_key_env)",
                self.id,
                self.id.to_uppercase()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDef>,
        cfg: &CallConfig,
        sink: &dyn ChunkSink,
    ) -> RagResult<LlmResponse> {
        self.ensure_key()?;
        let mut body = serde_json::json!({
            "model": cfg.model,
            "messages": &messages,
            "stream": cfg.stream,
            "temperature": cfg.temperature,
        });

        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(&tools)?;
            body["tool_choice"] = serde_json::json!("auto");
        }
        if let Some(format) = &cfg.response_format {
            body["response_format"] = format.clone();
        }

        tracing::debug!(
            provider = %self.id,
            model = %cfg.model,
            stream = cfg.stream,
            messages = messages.len(),
            tools = tools.len(),
            "sending LLM request"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(RagError::LlmProvider(format!("{}: {}", status, err_body)));
        }

        if cfg.stream {
            self.handle_stream(response, sink).await
        } else {
            self.handle_json(response, sink).await
        }
    }

    async fn list_models(&self) -> RagResult<Vec<String>> {
        self.ensure_key()?;
        let response = self
            .client
            .get(format!("{}/models", self.api_base))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(RagError::LlmProvider(format!("{}: {}", status, err_body)));
        }
        let listing: ModelList = response.json().await?;
        Ok(listing.data.into_iter().map(|m| m.id).collect())
    }
}

impl OpenAiCompatibleProvider {
    /// Handle SSE streaming response.
    /// Forwards chunks to the sink and accumulates the full response to return.
    async fn handle_stream(
        &self,
        response: reqwest::Response,
        sink: &dyn ChunkSink,
    ) -> RagResult<LlmResponse> {
        let mut byte_stream = response.bytes_stream();
        let mut pending: Vec<u8> = Vec::new();

        let mut resp_content = String::new();
        let mut resp_reasoning = String::new();
        let mut tc_builders: BTreeMap<usize, ToolCallBuilder> = BTreeMap::new();
        let mut done_emitted = false;

        'stream: while let Some(result) = byte_stream.next().await {
            let bytes = result?;
            pending.extend_from_slice(&bytes);

            // Only complete lines are decoded so multi-byte characters split across
            // network frames stay intact.
            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = pending.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw).trim().to_string();
                if line.is_empty() {
                    continue;
                }

                match sse_parser::parse_sse_line(&line) {
                    Ok(Some(chunk)) => {
                        let is_done = matches!(chunk.kind, StreamChunkKind::Done);
                        match &chunk.kind {
                            StreamChunkKind::Reasoning => resp_reasoning.push_str(&chunk.content),
                            StreamChunkKind::Content => resp_content.push_str(&chunk.content),
                            StreamChunkKind::ToolCall => {
                                merge_tool_call_deltas(&chunk.content, &mut tc_builders)
                            }
                            _ => {}
                        }

                        sink.emit(&chunk);

                        if is_done {
                            done_emitted = true;
                            break 'stream;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::debug!("SSE parse skipped: {e}");
                    }
                }
            }
        }

        // Fallback Done in case stream ended without [DONE] marker
        if !done_emitted {
            sink.emit(&StreamChunk {
                kind: StreamChunkKind::Done,
                content: String::new(),
            });
        }

        let tool_calls = build_tool_calls(tc_builders);

        tracing::info!(
            content_len = resp_content.len(),
            reasoning_len = resp_reasoning.len(),
            tool_calls = tool_calls.len(),
            tools = ?tool_calls.iter().map(|tc| tc.function.name.as_str()).collect::<Vec<_>>(),
            "LLM stream complete"
        );

        Ok(LlmResponse {
            content: resp_content,
            reasoning: resp_reasoning,
            tool_calls,
        })
    }

    /// Handle a non-streaming JSON response.
    async fn handle_json(
        &self,
        response: reqwest::Response,
        sink: &dyn ChunkSink,
    ) -> RagResult<LlmResponse> {
        let json: serde_json::Value = response.json().await?;
        let parsed = parse_completion(&json);

        tracing::info!(
            content_len = parsed.content.len(),
            tool_calls = parsed.tool_calls.len(),
            "LLM JSON response received"
        );

        if !parsed.content.is_empty() {
            sink.emit(&StreamChunk {
                kind: StreamChunkKind::Content,
                content: parsed.content.clone(),
            });
        }
        sink.emit(&StreamChunk {
            kind: StreamChunkKind::Done,
            content: String::new(),
        });

        Ok(parsed)
    }
}

/// Extracts content and tool calls from a non-streaming completion body.
fn parse_completion(json: &serde_json::Value) -> LlmResponse {
    let message = &json["choices"][0]["message"];
    let content = message["content"].as_str().unwrap_or("").to_string();

    let tool_calls: Vec<ToolCall> = message["tool_calls"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .enumerate()
                .map(|(i, tc)| ToolCall {
                    id: tc["id"]
                        .as_str()
                        .filter(|id| !id.is_empty())
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("call_{i}")),
                    call_type: tc["type"].as_str().unwrap_or("function").to_string(),
                    function: FunctionCall {
                        name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                        arguments: tc["function"]["arguments"]
                            .as_str()
                            .unwrap_or("{}")
                            .to_string(),
                    },
                })
                .collect()
        })
        .unwrap_or_default();

    LlmResponse {
        content,
        reasoning: String::new(),
        tool_calls,
    }
}

/// Merge streaming tool-call delta fragments into the accumulator map (keyed by delta index).
fn merge_tool_call_deltas(chunk_content: &str, builders: &mut BTreeMap<usize, ToolCallBuilder>) {
    let Ok(deltas) = serde_json::from_str::<Vec<serde_json::Value>>(chunk_content) else {
        return;
    };
    for delta in deltas {
        let idx = delta["index"].as_u64().unwrap_or(0) as usize;
        let entry = builders.entry(idx).or_default();

        if let Some(id) = delta["id"].as_str() {
            if !id.is_empty() {
                entry.0 = id.to_string();
            }
        }
        if let Some(t) = delta["type"].as_str() {
            if !t.is_empty() {
                entry.1 = t.to_string();
            }
        }
        if let Some(name) = delta["function"]["name"].as_str() {
            if !name.is_empty() {
                entry.2.push_str(name);
            }
        }
        if let Some(args) = delta["function"]["arguments"].as_str() {
            entry.3.push_str(args);
        }
    }
}

/// Convert accumulated tool-call builders into typed `ToolCall` structs.
fn build_tool_calls(builders: BTreeMap<usize, ToolCallBuilder>) -> Vec<ToolCall> {
    builders
        .into_iter()
        .filter(|(_, (_, _, name, _))| !name.is_empty())
        .map(|(idx, (id, call_type, name, arguments))| ToolCall {
            id: if id.is_empty() { format!("call_{idx}") } else { id },
            call_type: if call_type.is_empty() {
                "function".to_string()
            } else {
                call_type
            },
            function: FunctionCall { name, arguments },
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streamed_tool_call_fragments_are_merged() {
        let mut builders = BTreeMap::new();
        merge_tool_call_deltas(
            r#"[{"index":0,"id":"call_a","type":"function","function":{"name":"compute_study_hours","arguments":"{\"weeks\":"}}]"#,
            &mut builders,
        );
        merge_tool_call_deltas(
            r#"[{"index":0,"function":{"arguments":"4,\"hours_per_day\":2}"}}]"#,
            &mut builders,
        );
        merge_tool_call_deltas(
            r#"[{"index":1,"function":{"name":"search_documents","arguments":"{}"}}]"#,
            &mut builders,
        );

        let calls = build_tool_calls(builders);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].function.arguments, r#"{"weeks":4,"hours_per_day":2}"#);
        assert_eq!(calls[1].id, "call_1");
        assert_eq!(calls[1].call_type, "function");
    }

    #[test]
    fn json_completion_with_tool_calls() {
        let body = serde_json::json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "",
                        "type": "function",
                        "function": {"name": "search_documents", "arguments": "{\"query\":\"RAG\"}"}
                    }]
                }
            }]
        });
        let parsed = parse_completion(&body);
        assert!(parsed.content.is_empty());
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].id, "call_0");
        assert_eq!(parsed.tool_calls[0].function.name, "search_documents");
    }

    #[test]
    fn json_completion_plain_content() {
        let body = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "56 hours"}}]
        });
        let parsed = parse_completion(&body);
        assert_eq!(parsed.content, "56 hours");
        assert!(parsed.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        let provider = OpenAiCompatibleProvider::new(
            "gemini".into(),
            "https://example.invalid/v1".into(),
            String::new(),
        );
        let err = provider.list_models().await.unwrap_err();
        assert!(err.to_string().contains("RAGBENCH_GEMINI_API_KEY"));
    }
}
