//! One entry point per subcommand. Everything printed here goes to stdout.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::agent_engine::engine::AgentEngine;
use crate::cli::{Command, StoreEngine};
use crate::config::{self, AppConfig};
use crate::course_plan::{parse_course_plan, plan_prompt, CoursePlan};
use crate::errors::{RagError, RagResult};
use crate::llm::provider::{ChunkSink, LlmProvider, NullSink, StdoutSink};
use crate::llm::registry::ProviderRegistry;
use crate::llm::types::{CallConfig, ChatMessage};
use crate::rag::embedder::{Embedder, OpenAiCompatibleEmbedder};
use crate::rag::index::VectorIndex;
use crate::rag::memory::{MemoryClient, MemoryCollection};
use crate::rag::pipeline::{
    ingest_pdf, preview, render_context, render_debug_listing, render_prompt, render_search_hits,
    retrieve,
};
use crate::rag::record::SearchHit;
use crate::rag::similarity::{cosine_similarity, similarity_bar};
use crate::rag::table::{reset_dir, table_exists, DiskTable};
use crate::repl::{self, LineHandler};

pub const NO_CONTEXT_ANSWER: &str = "I have no information in my database about this topic.";

pub const DEFAULT_PHRASES: [&str; 5] = [
    "The dog barks in the park",
    "A canine makes noise in the garden",
    "I love programming in Python",
    "Artificial intelligence is the future",
    "Today I am going to eat pizza",
];

pub async fn dispatch(command: Command, cfg: &AppConfig, config_path: Option<&Path>) -> RagResult<()> {
    match command {
        Command::Index {
            pdf,
            keep,
            no_search,
        } => index(cfg, pdf, keep, no_search).await,
        Command::Search { engine, pdf } => search(cfg, engine, pdf).await,
        Command::Ask => ask(cfg).await,
        Command::Agent => agent(cfg).await,
        Command::Compare { phrases } => compare(cfg, phrases).await,
        Command::Models => models(cfg).await,
        Command::Plan { topic } => plan(cfg, &topic).await,
        Command::Config { write } => show_config(cfg, write, config_path),
    }
}

fn embedder(cfg: &AppConfig) -> RagResult<Arc<dyn Embedder>> {
    Ok(Arc::new(OpenAiCompatibleEmbedder::from_config(cfg)?))
}

/// Ingests the PDF into the on-disk table, then optionally searches it.
pub async fn index(cfg: &AppConfig, pdf: Option<PathBuf>, keep: bool, no_search: bool) -> RagResult<()> {
    let pdf = pdf.unwrap_or_else(|| cfg.ingest.pdf_path.clone());
    if !pdf.exists() {
        return Err(RagError::Pdf(format!("input PDF not found: {}", pdf.display())));
    }
    let embedder = embedder(cfg)?;
    let store_dir = &cfg.store.path;
    println!("--- Indexing {} into {} ---", pdf.display(), store_dir.display());

    let table = build_table(cfg, embedder.as_ref(), &pdf, keep).await?;
    println!(
        "Table '{}' ready with {} rows ({} dimensions).",
        table.name(),
        table.len(),
        table.schema().dimension
    );

    if no_search {
        return Ok(());
    }
    let mut handler = SearchLoop::new(Box::new(table), embedder, cfg.retrieval.search_top_k)
        .with_preview(cfg.retrieval.search_preview_chars);
    repl::run_stdin("Search (or 'salir'): ", &mut handler).await
}

async fn build_table(cfg: &AppConfig, embedder: &dyn Embedder, pdf: &Path, keep: bool) -> RagResult<DiskTable> {
    let store_dir = &cfg.store.path;
    let existing = if keep && table_exists(store_dir, &cfg.store.table) {
        Some(DiskTable::open(store_dir, &cfg.store.table)?)
    } else {
        None
    };
    let first_id = existing.as_ref().map_or(0, |table| table.len());

    let output = ingest_pdf(cfg, embedder, pdf, first_id).await?;
    if output.records.is_empty() {
        return Err(RagError::Pdf(format!("no text could be extracted from {}", pdf.display())));
    }
    println!(
        "{} chunks embedded, {} replaced by zero vectors.",
        output.records.len(),
        output.failed.len()
    );

    if let Some(mut table) = existing {
        table.add(output.records)?;
        return Ok(table);
    }
    if !keep && reset_dir(store_dir)? {
        println!("Store directory '{}' cleared.", store_dir.display());
    }
    DiskTable::create(store_dir, &cfg.store.table, output.records, cfg.store.distance)
}

/// Interactive search over either store.
pub async fn search(cfg: &AppConfig, engine: StoreEngine, pdf: Option<PathBuf>) -> RagResult<()> {
    let embedder = embedder(cfg)?;
    let mut handler = match engine {
        StoreEngine::Disk => {
            let table = DiskTable::open(&cfg.store.path, &cfg.store.table)?;
            println!(
                "--- Searching table '{}' ({} rows) ---",
                table.name(),
                table.len()
            );
            SearchLoop::new(Box::new(table), embedder, cfg.retrieval.search_top_k)
                .with_preview(cfg.retrieval.search_preview_chars)
        }
        StoreEngine::Memory => {
            let pdf = pdf.unwrap_or_else(|| cfg.ingest.pdf_path.clone());
            let collection = load_memory_collection(cfg, embedder.as_ref(), &pdf).await?;
            println!(
                "--- Searching in-memory collection '{}' ({} rows) ---",
                collection.name(),
                collection.len()
            );
            SearchLoop::new(Box::new(collection), embedder, cfg.retrieval.search_top_k)
        }
    };
    repl::run_stdin("Search (or 'salir'): ", &mut handler).await
}

async fn load_memory_collection(
    cfg: &AppConfig,
    embedder: &dyn Embedder,
    pdf: &Path,
) -> RagResult<MemoryCollection> {
    let output = ingest_pdf(cfg, embedder, pdf, 0).await?;
    let mut client = MemoryClient::new();
    let mut collection = client.create_collection(&cfg.store.collection, cfg.store.distance)?;
    let inserted = collection
        .add_batched(
            output.records,
            cfg.store.insert_batch_size,
            Duration::from_millis(cfg.store.insert_pause_ms),
        )
        .await?;
    println!("{inserted} chunks loaded, {} zero-filled.", output.failed.len());
    Ok(collection)
}

pub struct SearchLoop {
    index: Box<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
    preview_chars: Option<usize>,
}

impl SearchLoop {
    pub fn new(index: Box<dyn VectorIndex>, embedder: Arc<dyn Embedder>, top_k: usize) -> Self {
        Self {
            index,
            embedder,
            top_k,
            preview_chars: None,
        }
    }

    pub fn with_preview(mut self, chars: usize) -> Self {
        self.preview_chars = Some(chars);
        self
    }

    pub async fn render(&self, query: &str) -> RagResult<String> {
        let hits = retrieve(self.index.as_ref(), self.embedder.as_ref(), query, self.top_k).await?;
        if hits.is_empty() {
            return Ok("No results.".to_string());
        }
        Ok(render_search_hits(&hits, self.preview_chars))
    }
}

#[async_trait]
impl LineHandler for SearchLoop {
    async fn handle(&mut self, line: &str) -> RagResult<()> {
        print!("{}", self.render(line).await?);
        Ok(())
    }
}

/// Grounded question answering over the on-disk table.
pub async fn ask(cfg: &AppConfig) -> RagResult<()> {
    let registry = ProviderRegistry::from_config(cfg);
    let (provider, call_cfg) = registry.call_config_for_role("chat")?;
    let mut handler = AskLoop {
        cfg: cfg.clone(),
        embedder: embedder(cfg)?,
        provider,
        call_cfg,
    };
    println!("--- RAG assistant (store: {}) ---", cfg.store.path.display());
    repl::run_stdin("Ask the expert (or 'salir'): ", &mut handler).await
}

struct AskLoop {
    cfg: AppConfig,
    embedder: Arc<dyn Embedder>,
    provider: Arc<dyn LlmProvider>,
    call_cfg: CallConfig,
}

#[async_trait]
impl LineHandler for AskLoop {
    async fn handle(&mut self, line: &str) -> RagResult<()> {
        println!("Searching the database...");
        let table = match DiskTable::open(&self.cfg.store.path, &self.cfg.store.table) {
            Ok(table) if !table.is_empty() => table,
            other => {
                if let Err(e) = other {
                    tracing::debug!(error = %e, "table unavailable");
                }
                println!("Error: the vector store is missing or empty. Run `ragbench index` first.");
                return Ok(());
            }
        };
        let hits = retrieve(&table, self.embedder.as_ref(), line, self.cfg.retrieval.ask_top_k).await?;

        println!("\n--- DEBUG: what the model is reading ---");
        print!("{}", render_debug_listing(&hits, self.cfg.retrieval.ask_debug_chars));
        println!("----------------------------------------\n");

        if hits.is_empty() {
            println!("{NO_CONTEXT_ANSWER}");
            return Ok(());
        }
        println!("Generating answer...");
        println!("\n{}", "=".repeat(50));
        println!("GENERATED ANSWER:");
        println!("{}", "=".repeat(50));
        answer_question(
            self.provider.as_ref(),
            &self.call_cfg,
            self.cfg.prompts.rag_template(),
            line,
            &hits,
            &StdoutSink,
        )
        .await?;
        println!("{}", "-".repeat(50));
        Ok(())
    }
}

/// Answers `question` from `hits` only. No hits means no model call.
pub async fn answer_question(
    provider: &dyn LlmProvider,
    call_cfg: &CallConfig,
    template: &str,
    question: &str,
    hits: &[SearchHit],
    sink: &dyn ChunkSink,
) -> RagResult<String> {
    if hits.is_empty() {
        return Ok(NO_CONTEXT_ANSWER.to_string());
    }
    let prompt = render_prompt(template, &render_context(hits), question);
    let response = provider
        .chat(vec![ChatMessage::user(prompt)], Vec::new(), call_cfg, sink)
        .await?;
    Ok(response.content)
}

/// Chat with the study agent.
pub async fn agent(cfg: &AppConfig) -> RagResult<()> {
    let registry = ProviderRegistry::from_config(cfg);
    let engine = AgentEngine::from_config(cfg, &registry, embedder(cfg)?)?;
    let mut handler = AgentLoop { engine };
    println!("--- Study agent (tools: search_documents, compute_study_hours) ---");
    repl::run_stdin("You: ", &mut handler).await
}

struct AgentLoop {
    engine: AgentEngine,
}

#[async_trait]
impl LineHandler for AgentLoop {
    async fn handle(&mut self, line: &str) -> RagResult<()> {
        let answer = self.engine.run_goal(line).await?;
        println!("Agent: {answer}");
        Ok(())
    }
}

/// Embeds phrases and scores each against the first.
pub async fn compare(cfg: &AppConfig, phrases: Vec<String>) -> RagResult<()> {
    let phrases = if phrases.is_empty() {
        DEFAULT_PHRASES.iter().map(|p| p.to_string()).collect()
    } else {
        phrases
    };
    let embedder = embedder(cfg)?;
    println!("--- Computing embeddings ---");
    let mut vectors = Vec::with_capacity(phrases.len());
    for phrase in &phrases {
        let vector = embedder.embed_query(phrase).await?;
        println!(
            "'{}...' -> vector of {} dimensions",
            preview(phrase, 20),
            vector.len()
        );
        vectors.push(vector);
    }
    print!("{}", render_comparison(&phrases, &vectors));
    Ok(())
}

pub fn render_comparison(phrases: &[String], vectors: &[Vec<f32>]) -> String {
    let (Some(base_phrase), Some(base)) = (phrases.first(), vectors.first()) else {
        return String::new();
    };
    let mut out = format!("\n--- Similarity ---\n\nComparing everything against: '{base_phrase}'\n\n");
    for (phrase, vector) in phrases.iter().zip(vectors) {
        let score = cosine_similarity(base, vector);
        out.push_str(&format!("{} {:.4} | {}\n", similarity_bar(score), score, phrase));
    }
    out
}

/// Lists model ids of the active provider.
pub async fn models(cfg: &AppConfig) -> RagResult<()> {
    let registry = ProviderRegistry::from_config(cfg);
    let provider = registry.get_active()?;
    println!("--- Models available from '{}' ---", provider.name());
    for id in provider.list_models().await? {
        println!("ID: {id}");
    }
    Ok(())
}

/// Asks the chat role for a JSON course plan and prints it.
pub async fn plan(cfg: &AppConfig, topic: &str) -> RagResult<()> {
    let registry = ProviderRegistry::from_config(cfg);
    let (provider, call_cfg) = registry.call_config_for_role("chat")?;
    println!("--- Designing a study plan for: {topic} ---");
    let plan = request_plan(provider.as_ref(), call_cfg, topic).await?;
    println!("\n--- Generated plan ---");
    print!("{}", plan.render());
    Ok(())
}

pub async fn request_plan(provider: &dyn LlmProvider, mut call_cfg: CallConfig, topic: &str) -> RagResult<CoursePlan> {
    call_cfg.stream = false;
    call_cfg.response_format = Some(serde_json::json!({"type": "json_object"}));
    let response = provider
        .chat(vec![ChatMessage::user(plan_prompt(topic))], Vec::new(), &call_cfg, &NullSink)
        .await?;
    parse_course_plan(&response.content)
}

/// Prints the effective configuration; `write` saves the defaults when no file exists.
pub fn show_config(cfg: &AppConfig, write: bool, explicit: Option<&Path>) -> RagResult<()> {
    if write {
        let target = explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("config.toml"));
        if target.exists() {
            println!("{} already exists; leaving it untouched.", target.display());
        } else {
            config::save_config(&AppConfig::default(), &target)?;
            println!("Default configuration written to {}.", target.display());
        }
        return Ok(());
    }
    print!("{}", toml::to_string_pretty(&cfg.redacted())?);
    Ok(())
}
