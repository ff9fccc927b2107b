//! Embedding client for OpenAI-compatible `/embeddings` endpoints, plus the
//! serial, throttled ingestion loop used when indexing a document.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::config::{resolve_api_key, AppConfig, EmbeddingConfig};
use crate::errors::{RagError, RagResult};

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds every input, preserving order.
    async fn embed(&self, inputs: &[String]) -> RagResult<Vec<Vec<f32>>>;

    /// Expected vector length.
    fn dimensions(&self) -> usize;

    async fn embed_query(&self, text: &str) -> RagResult<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::Embedding("embedding response was empty".into()))
    }
}

/// What to do when a chunk cannot be embedded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Substitute an all-zero vector and keep going.
    #[default]
    ZeroFill,
    /// Stop ingestion with the error.
    Abort,
}

pub struct OpenAiCompatibleEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimensions: usize,
    max_retries: usize,
}

impl OpenAiCompatibleEmbedder {
    pub fn new(
        api_base: &str,
        api_key: String,
        model: String,
        dimensions: usize,
        timeout: Duration,
        max_retries: usize,
    ) -> RagResult<Self> {
        if api_key.trim().is_empty() {
            return Err(RagError::Config(
                "missing API key for the embedding provider (set GOOGLE_API_KEY or RAGBENCH_<ID>_API_KEY)".into(),
            ));
        }
        if model.trim().is_empty() {
            return Err(RagError::Config("missing embedding model name".into()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", api_base.trim_end_matches('/')),
            api_key,
            model,
            dimensions,
            max_retries,
        })
    }

    pub fn from_config(config: &AppConfig) -> RagResult<Self> {
        let emb = &config.embedding;
        let entry = config.llm.providers.get(&emb.provider).ok_or_else(|| {
            RagError::Config(format!("embedding provider '{}' is not configured", emb.provider))
        })?;
        Self::new(
            &entry.api_base,
            resolve_api_key(&emb.provider, entry),
            emb.model.clone(),
            emb.dimensions,
            Duration::from_secs(emb.timeout_secs.max(1)),
            emb.max_retries,
        )
    }

    async fn send_once(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, Attempt> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: inputs,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                let retryable = e.is_timeout() || e.is_connect() || e.is_request();
                Attempt {
                    error: e.into(),
                    retryable,
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(Attempt {
                error: RagError::Embedding(format!("{status}: {body}")),
                retryable: should_retry(status),
            });
        }

        let body = response.text().await.map_err(|e| Attempt {
            error: e.into(),
            retryable: true,
        })?;
        parse_embeddings(&body, inputs.len()).map_err(|error| Attempt {
            error,
            retryable: false,
        })
    }
}

/// Decodes an `/embeddings` body into vectors ordered by `index`, one per input.
fn parse_embeddings(body: &str, expected: usize) -> RagResult<Vec<Vec<f32>>> {
    let mut parsed: EmbeddingResponse = serde_json::from_str(body)
        .map_err(|e| RagError::Embedding(format!("failed to parse embedding response: {e}")))?;
    parsed.data.sort_by_key(|entry| entry.index);
    if parsed.data.len() != expected {
        return Err(RagError::Embedding(format!(
            "provider returned {} embeddings for {expected} inputs",
            parsed.data.len()
        )));
    }
    Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
}

#[async_trait]
impl Embedder for OpenAiCompatibleEmbedder {
    async fn embed(&self, inputs: &[String]) -> RagResult<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let mut attempt = 0usize;
        loop {
            match self.send_once(inputs).await {
                Ok(vectors) => return Ok(vectors),
                Err(failure) if failure.retryable && attempt < self.max_retries => {
                    attempt += 1;
                    let wait = retry_backoff(attempt);
                    tracing::warn!(
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %failure.error,
                        "embedding request failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(failure) => return Err(failure.error),
            }
        }
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

struct Attempt {
    error: RagError,
    retryable: bool,
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[derive(Debug, Clone)]
pub struct EmbedOptions {
    /// Sleep before each call.
    pub request_delay: Duration,
    pub on_failure: FailurePolicy,
    /// Log progress every N chunks; 0 disables progress logs.
    pub progress_every: usize,
}

impl EmbedOptions {
    pub fn from_config(cfg: &EmbeddingConfig) -> Self {
        Self {
            request_delay: Duration::from_millis(cfg.request_delay_ms),
            on_failure: cfg.on_failure,
            progress_every: cfg.progress_every,
        }
    }
}

#[derive(Debug, Default)]
pub struct EmbedReport {
    /// One vector per input chunk, same order.
    pub vectors: Vec<Vec<f32>>,
    /// Indices of chunks that were zero-filled.
    pub failed: Vec<usize>,
}

/// Embeds `chunks` one call at a time. Under `ZeroFill`, a failed or malformed
/// response becomes a zero vector of `embedder.dimensions()`.
pub async fn embed_serially(
    embedder: &dyn Embedder,
    chunks: &[String],
    opts: &EmbedOptions,
) -> RagResult<EmbedReport> {
    let total = chunks.len();
    let dimensions = embedder.dimensions();
    let mut report = EmbedReport {
        vectors: Vec::with_capacity(total),
        failed: Vec::new(),
    };
    tracing::info!(total, "embedding chunks");

    for (i, text) in chunks.iter().enumerate() {
        if !opts.request_delay.is_zero() {
            tokio::time::sleep(opts.request_delay).await;
        }
        let outcome = match embedder.embed_query(text).await {
            Ok(vector) if vector.len() == dimensions => Ok(vector),
            Ok(vector) => Err(RagError::Embedding(format!(
                "expected {dimensions} dimensions, got {}",
                vector.len()
            ))),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(vector) => {
                report.vectors.push(vector);
                if opts.progress_every > 0 && i % opts.progress_every == 0 {
                    tracing::info!(done = i, total, "vector generated");
                }
            }
            Err(e) => match opts.on_failure {
                FailurePolicy::ZeroFill => {
                    tracing::warn!(chunk = i, error = %e, "embedding failed, substituting zero vector");
                    report.vectors.push(vec![0.0; dimensions]);
                    report.failed.push(i);
                }
                FailurePolicy::Abort => {
                    return Err(RagError::Embedding(format!("chunk {i}: {e}")));
                }
            },
        }
    }

    tracing::info!(
        total,
        failed = report.failed.len(),
        "embedding finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEmbedder;

    fn opts(policy: FailurePolicy) -> EmbedOptions {
        EmbedOptions {
            request_delay: Duration::ZERO,
            on_failure: policy,
            progress_every: 1,
        }
    }

    fn chunks(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[tokio::test]
    async fn zero_fill_keeps_alignment() {
        let embedder = FakeEmbedder::new(4);
        let report = embed_serially(&embedder, &chunks(&["alpha", "FAIL here", "gamma"]), &opts(FailurePolicy::ZeroFill))
            .await
            .unwrap();
        assert_eq!(report.vectors.len(), 3);
        assert_eq!(report.failed, vec![1]);
        assert_eq!(report.vectors[1], vec![0.0; 4]);
        assert!(report.vectors[0].iter().any(|x| *x != 0.0));
        assert_eq!(embedder.calls(), 3);
    }

    #[tokio::test]
    async fn wrong_length_counts_as_failure() {
        let embedder = FakeEmbedder::new(4).with_short_vectors_for("SHORT");
        let report = embed_serially(&embedder, &chunks(&["SHORT one", "fine"]), &opts(FailurePolicy::ZeroFill))
            .await
            .unwrap();
        assert_eq!(report.failed, vec![0]);
        assert_eq!(report.vectors[0].len(), 4);
    }

    #[tokio::test]
    async fn abort_policy_stops_at_first_failure() {
        let embedder = FakeEmbedder::new(4);
        let err = embed_serially(&embedder, &chunks(&["a", "FAIL", "c"]), &opts(FailurePolicy::Abort))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("chunk 1"));
        assert_eq!(embedder.calls(), 2);
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        let err = OpenAiCompatibleEmbedder::new(
            "https://example.invalid/v1",
            "  ".into(),
            "text-embedding-004".into(),
            768,
            Duration::from_secs(5),
            0,
        )
        .err()
        .unwrap();
        assert!(matches!(err, RagError::Config(_)));
    }

    #[test]
    fn embeddings_are_reordered_by_index() {
        let body = r#"{"object":"list","data":[
            {"object":"embedding","index":1,"embedding":[0.0,1.0]},
            {"object":"embedding","index":0,"embedding":[1.0,0.0]}
        ],"model":"text-embedding-004"}"#;
        let vectors = parse_embeddings(body, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn embedding_count_mismatch_is_an_error() {
        let body = r#"{"data":[{"index":0,"embedding":[1.0]}]}"#;
        let err = parse_embeddings(body, 2).unwrap_err();
        assert!(err.to_string().contains("1 embeddings for 2 inputs"));

        let err = parse_embeddings("<html>quota</html>", 1).unwrap_err();
        assert!(matches!(err, RagError::Embedding(_)));
    }

    #[test]
    fn only_rate_limits_and_server_errors_are_retried() {
        assert!(should_retry(StatusCode::TOO_MANY_REQUESTS));
        assert!(should_retry(StatusCode::SERVICE_UNAVAILABLE));
        assert!(should_retry(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!should_retry(StatusCode::BAD_REQUEST));
        assert!(!should_retry(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(retry_backoff(1), Duration::from_millis(1000));
        assert_eq!(retry_backoff(2), Duration::from_millis(2000));
        assert_eq!(retry_backoff(9), Duration::from_millis(16000));
    }
}
