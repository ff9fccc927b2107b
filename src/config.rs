use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{RagError, RagResult};
use crate::rag::embedder::FailurePolicy;
use crate::rag::index::Distance;

const DEFAULT_RAG_TEMPLATE: &str = include_str!("../prompts/rag_answer.md");
const DEFAULT_AGENT_SYSTEM: &str = include_str!("../prompts/agent_system.md");

const GEMINI_OPENAI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub active_provider: String,
    pub providers: HashMap<String, ProviderEntry>,
    /// Role-to-model mapping. If a role is absent, falls back to active_provider defaults.
    #[serde(default)]
    pub roles: RolesConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let mut providers = HashMap::new();
        providers.insert("gemini".to_string(), ProviderEntry::gemini());
        Self {
            active_provider: "gemini".to_string(),
            providers,
            roles: RolesConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub display_name: String,
    /// OpenAI-compatible base URL; `/chat/completions`, `/embeddings` and `/models` are appended.
    pub api_base: String,
    /// Default chat model for this provider.
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Environment variable holding the key, consulted after `RAGBENCH_<ID>_API_KEY`.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl ProviderEntry {
    fn gemini() -> Self {
        Self {
            display_name: "Google Gemini".to_string(),
            api_base: GEMINI_OPENAI_BASE.to_string(),
            model: "gemini-flash-latest".to_string(),
            temperature: default_temperature(),
            api_key_env: default_api_key_env(),
            api_key: None,
        }
    }
}

/// Maps agent roles to specific provider+model combinations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RolesConfig {
    /// Grounded answer generation, streamed to the terminal.
    pub chat: Option<RoleEntry>,
    /// Tool-calling model driving the agent.
    pub tools: Option<RoleEntry>,
}

impl Default for RolesConfig {
    fn default() -> Self {
        Self {
            chat: None,
            tools: Some(RoleEntry {
                provider: "gemini".to_string(),
                model: "gemini-flash-latest".to_string(),
                stream: false,
                temperature: Some(0.0),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleEntry {
    /// Must match a key under [llm.providers.*].
    pub provider: String,
    pub model: String,
    #[serde(default = "default_true")]
    pub stream: bool,
    /// Overrides the provider-level temperature for this role.
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Key under [llm.providers.*] whose base URL and credentials are reused.
    pub provider: String,
    pub model: String,
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    /// Pause before every embedding call, keeps free-tier quotas happy.
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub max_retries: usize,
    #[serde(default)]
    pub on_failure: FailurePolicy,
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: "text-embedding-004".to_string(),
            dimensions: default_dimensions(),
            request_delay_ms: default_request_delay_ms(),
            timeout_secs: default_timeout_secs(),
            max_retries: 0,
            on_failure: FailurePolicy::default(),
            progress_every: default_progress_every(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub pdf_path: PathBuf,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub chunk_overlap: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            pdf_path: PathBuf::from("document.pdf"),
            chunk_size: default_chunk_size(),
            chunk_overlap: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding persistent tables.
    pub path: PathBuf,
    pub table: String,
    /// Directories probed in order by the agent's search tool.
    #[serde(default = "default_search_paths")]
    pub search_paths: Vec<PathBuf>,
    #[serde(default)]
    pub distance: Distance,
    /// Name of the ephemeral in-memory collection.
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_insert_batch_size")]
    pub insert_batch_size: usize,
    #[serde(default = "default_insert_pause_ms")]
    pub insert_pause_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./vector_data"),
            table: "documents".to_string(),
            search_paths: default_search_paths(),
            distance: Distance::default(),
            collection: default_collection(),
            insert_batch_size: default_insert_batch_size(),
            insert_pause_ms: default_insert_pause_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    #[serde(default = "default_search_top_k")]
    pub search_top_k: usize,
    #[serde(default = "default_ask_top_k")]
    pub ask_top_k: usize,
    #[serde(default = "default_agent_top_k")]
    pub agent_top_k: usize,
    #[serde(default = "default_search_preview_chars")]
    pub search_preview_chars: usize,
    #[serde(default = "default_ask_debug_chars")]
    pub ask_debug_chars: usize,
    #[serde(default = "default_agent_snippet_chars")]
    pub agent_snippet_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            search_top_k: default_search_top_k(),
            ask_top_k: default_ask_top_k(),
            agent_top_k: default_agent_top_k(),
            search_preview_chars: default_search_preview_chars(),
            ask_debug_chars: default_ask_debug_chars(),
            agent_snippet_chars: default_agent_snippet_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    /// Append each session to a JSONL file under the user data dir.
    #[serde(default = "default_true")]
    pub record_history: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_failures: default_max_failures(),
            record_history: true,
        }
    }
}

/// Prompt overrides; unset fields fall back to the templates under `prompts/`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptsConfig {
    /// Must contain `{context}` and `{question}` placeholders.
    pub rag_template: Option<String>,
    pub agent_system: Option<String>,
}

impl PromptsConfig {
    pub fn rag_template(&self) -> &str {
        self.rag_template.as_deref().unwrap_or(DEFAULT_RAG_TEMPLATE)
    }

    pub fn agent_system(&self) -> &str {
        self.agent_system.as_deref().unwrap_or(DEFAULT_AGENT_SYSTEM)
    }
}

fn default_temperature() -> f64 {
    0.1
}

fn default_api_key_env() -> Option<String> {
    Some("GOOGLE_API_KEY".to_string())
}

fn default_true() -> bool {
    true
}

fn default_dimensions() -> usize {
    768
}

fn default_request_delay_ms() -> u64 {
    1000
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_progress_every() -> usize {
    5
}

fn default_chunk_size() -> usize {
    500
}

fn default_search_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("../vector_data"), PathBuf::from("./vector_data")]
}

fn default_collection() -> String {
    "my_documents".to_string()
}

fn default_insert_batch_size() -> usize {
    10
}

fn default_insert_pause_ms() -> u64 {
    200
}

fn default_search_top_k() -> usize {
    3
}

fn default_ask_top_k() -> usize {
    10
}

fn default_agent_top_k() -> usize {
    3
}

fn default_search_preview_chars() -> usize {
    200
}

fn default_ask_debug_chars() -> usize {
    100
}

fn default_agent_snippet_chars() -> usize {
    300
}

fn default_max_steps() -> u32 {
    8
}

fn default_max_failures() -> u32 {
    3
}

/// Returns the first existing config file: explicit path, next to the executable, working directory.
pub fn resolve_config_path(explicit: Option<&Path>) -> RagResult<Option<PathBuf>> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(Some(path.to_path_buf()));
        }
        return Err(RagError::Config(format!(
            "config file {} does not exist",
            path.display()
        )));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(Some(candidate));
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(Some(candidate));
    }

    Ok(None)
}

pub fn load_config(explicit: Option<&Path>) -> RagResult<AppConfig> {
    let Some(path) = resolve_config_path(explicit)? else {
        tracing::info!("no config.toml found; using built-in defaults");
        return Ok(AppConfig::default());
    };
    let content = std::fs::read_to_string(&path)?;
    let config = parse_config(&content)?;
    tracing::info!(path = %path.display(), provider = %config.llm.active_provider, "config loaded");
    Ok(config)
}

pub fn parse_config(content: &str) -> RagResult<AppConfig> {
    let config: AppConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

pub fn save_config(config: &AppConfig, path: &Path) -> RagResult<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}

impl AppConfig {
    pub fn validate(&self) -> RagResult<()> {
        if !self.llm.providers.contains_key(&self.llm.active_provider) {
            return Err(RagError::Config(format!(
                "active provider '{}' is not defined under [llm.providers]",
                self.llm.active_provider
            )));
        }
        if !self.llm.providers.contains_key(&self.embedding.provider) {
            return Err(RagError::Config(format!(
                "embedding provider '{}' is not defined under [llm.providers]",
                self.embedding.provider
            )));
        }
        if self.embedding.dimensions == 0 {
            return Err(RagError::Config("embedding.dimensions must be positive".into()));
        }
        if self.ingest.chunk_size == 0 {
            return Err(RagError::Config("ingest.chunk_size must be positive".into()));
        }
        if self.ingest.chunk_overlap >= self.ingest.chunk_size {
            return Err(RagError::Config(format!(
                "ingest.chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.ingest.chunk_overlap, self.ingest.chunk_size
            )));
        }
        for (key, k) in [
            ("search_top_k", self.retrieval.search_top_k),
            ("ask_top_k", self.retrieval.ask_top_k),
            ("agent_top_k", self.retrieval.agent_top_k),
        ] {
            if k == 0 {
                return Err(RagError::Config(format!("retrieval.{key} must be positive")));
            }
        }
        if self.agent.max_steps == 0 {
            return Err(RagError::Config("agent.max_steps must be at least 1".into()));
        }
        let template = self.prompts.rag_template();
        if !template.contains("{context}") || !template.contains("{question}") {
            return Err(RagError::Config(
                "prompts.rag_template needs {context} and {question} placeholders".into(),
            ));
        }
        Ok(())
    }

    /// Copy with every inline API key masked, for printing.
    pub fn redacted(&self) -> AppConfig {
        let mut copy = self.clone();
        for entry in copy.llm.providers.values_mut() {
            if entry.api_key.is_some() {
                entry.api_key = Some("********".to_string());
            }
        }
        copy
    }
}

/// API key lookup: `RAGBENCH_<ID>_API_KEY`, then `api_key_env`, then the inline value.
pub fn resolve_api_key(id: &str, entry: &ProviderEntry) -> String {
    let scoped = format!("RAGBENCH_{}_API_KEY", id.to_uppercase());
    if let Ok(key) = std::env::var(&scoped) {
        if !key.trim().is_empty() {
            return key;
        }
    }
    if let Some(var) = &entry.api_key_env {
        if let Ok(key) = std::env::var(var) {
            if !key.trim().is_empty() {
                return key;
            }
        }
    }
    entry.api_key.clone().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.llm.active_provider, "gemini");
        assert_eq!(cfg.embedding.model, "text-embedding-004");
        assert_eq!(cfg.embedding.dimensions, 768);
        assert_eq!(cfg.embedding.request_delay_ms, 1000);
        assert_eq!(cfg.ingest.chunk_size, 500);
        assert_eq!(cfg.ingest.chunk_overlap, 0);
        assert_eq!(cfg.retrieval.search_top_k, 3);
        assert_eq!(cfg.retrieval.ask_top_k, 10);
        assert_eq!(cfg.store.insert_batch_size, 10);
    }

    #[test]
    fn partial_sections_keep_field_defaults() {
        let cfg = parse_config(
            r#"
            [ingest]
            pdf_path = "notes.pdf"

            [store]
            path = "/tmp/vectors"
            table = "notes"
            distance = "cosine"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.ingest.pdf_path, PathBuf::from("notes.pdf"));
        assert_eq!(cfg.ingest.chunk_size, 500);
        assert_eq!(cfg.store.table, "notes");
        assert_eq!(cfg.store.distance, Distance::Cosine);
        assert_eq!(cfg.store.search_paths.len(), 2);
    }

    #[test]
    fn single_key_sections_parse() {
        let cfg = parse_config("[ingest]\nchunk_size = 300\n").unwrap();
        assert_eq!(cfg.ingest.chunk_size, 300);
        assert_eq!(cfg.ingest.pdf_path, PathBuf::from("document.pdf"));

        let cfg = parse_config("[store]\ndistance = \"cosine\"\n").unwrap();
        assert_eq!(cfg.store.distance, Distance::Cosine);
        assert_eq!(cfg.store.path, PathBuf::from("./vector_data"));
        assert_eq!(cfg.store.table, "documents");

        let cfg = parse_config("[embedding]\nmax_retries = 2\n[llm]\n[agent]\nmax_failures = 1\n").unwrap();
        assert_eq!(cfg.embedding.model, "text-embedding-004");
        assert_eq!(cfg.embedding.max_retries, 2);
        assert_eq!(cfg.llm.active_provider, "gemini");
        assert!(cfg.llm.providers.contains_key("gemini"));
        assert_eq!(cfg.agent.max_steps, 8);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        for content in [
            "[ingest]\nchunk_size = 100\nchunk_overlap = 100\n",
            "[ingest]\nchunk_size = 0\n",
            "[agent]\nmax_steps = 0\n",
            "[retrieval]\nsearch_top_k = 0\n",
            "[retrieval]\nask_top_k = 0\n",
            "[retrieval]\nagent_top_k = 0\n",
        ] {
            let err = parse_config(content).unwrap_err();
            assert!(matches!(err, RagError::Config(_)), "{content}: {err}");
        }
        assert!(parse_config("[ingest]\nchunk_size = 100\nchunk_overlap = 99\n").is_ok());
    }

    #[test]
    fn unknown_embedding_provider_is_rejected() {
        let err = parse_config(
            r#"
            [embedding]
            provider = "nope"
            model = "m"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
    }

    #[test]
    fn rag_template_without_placeholders_is_rejected() {
        let err = parse_config(
            r#"
            [prompts]
            rag_template = "answer please"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("{context}"));
    }

    #[test]
    fn scoped_env_key_wins_over_inline_key() {
        let entry = ProviderEntry {
            api_key_env: Some("RAGBENCH_TEST_UNSET_VAR".into()),
            api_key: Some("inline".into()),
            ..ProviderEntry::gemini()
        };
        assert_eq!(resolve_api_key("scopedtest", &entry), "inline");

        std::env::set_var("RAGBENCH_SCOPEDTEST_API_KEY", "from-env");
        assert_eq!(resolve_api_key("scopedtest", &entry), "from-env");
        std::env::remove_var("RAGBENCH_SCOPEDTEST_API_KEY");
    }

    #[test]
    fn redacted_masks_inline_keys() {
        let mut cfg = AppConfig::default();
        if let Some(entry) = cfg.llm.providers.get_mut("gemini") {
            entry.api_key = Some("secret".into());
        }
        let shown = toml::to_string_pretty(&cfg.redacted()).unwrap();
        assert!(!shown.contains("secret"));
    }

    #[test]
    fn shipped_sample_matches_defaults() {
        let cfg = parse_config(include_str!("../config.toml")).unwrap();
        let defaults = AppConfig::default();
        assert_eq!(cfg.store.table, defaults.store.table);
        assert_eq!(cfg.store.distance, defaults.store.distance);
        assert_eq!(cfg.embedding.on_failure, FailurePolicy::ZeroFill);
        assert_eq!(cfg.retrieval.agent_snippet_chars, 300);
        assert_eq!(cfg.llm.roles.tools.map(|r| r.stream), Some(false));
    }

    #[test]
    fn save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        save_config(&AppConfig::default(), &path).unwrap();
        let loaded = load_config(Some(&path)).unwrap();
        assert_eq!(loaded.store.table, "documents");
    }
}
