//! Ingestion (PDF → chunks → vectors → records) and the text renderers used by
//! the interactive commands and the agent's search tool.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::config::AppConfig;
use crate::errors::RagResult;
use crate::ingest::{extract_text, FixedWidthChunker};
use crate::rag::embedder::{embed_serially, EmbedOptions, Embedder};
use crate::rag::index::VectorIndex;
use crate::rag::record::{ChunkRecord, SearchHit};

#[derive(Debug, Default)]
pub struct IngestOutput {
    pub records: Vec<ChunkRecord>,
    /// Chunk ordinals that were stored with a zero vector.
    pub failed: Vec<usize>,
}

/// Extracts, chunks and embeds `pdf`. Every chunk yields one record, failed or not.
/// Record ids start at `id_<first_id>`.
pub async fn ingest_pdf(
    cfg: &AppConfig,
    embedder: &dyn Embedder,
    pdf: &Path,
    first_id: usize,
) -> RagResult<IngestOutput> {
    let text = extract_text(pdf)?;
    let chunker = FixedWidthChunker::new(cfg.ingest.chunk_size, cfg.ingest.chunk_overlap)?;
    let chunks = chunker.split(&text);
    tracing::info!(pdf = %pdf.display(), chars = text.chars().count(), chunks = chunks.len(), "document chunked");
    embed_chunks(cfg, embedder, chunks, &pdf.display().to_string(), first_id).await
}

/// Embeds already-split chunks and turns them into records tagged with `source`.
pub async fn embed_chunks(
    cfg: &AppConfig,
    embedder: &dyn Embedder,
    chunks: Vec<String>,
    source: &str,
    first_id: usize,
) -> RagResult<IngestOutput> {
    let report = embed_serially(embedder, &chunks, &EmbedOptions::from_config(&cfg.embedding)).await?;
    let records = chunks
        .into_iter()
        .zip(report.vectors)
        .enumerate()
        .map(|(i, (text, vector))| ChunkRecord::new(first_id + i, text, source.to_string(), vector))
        .collect();
    Ok(IngestOutput {
        records,
        failed: report.failed,
    })
}

/// Embeds `query` and returns the `k` nearest records.
pub async fn retrieve(
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    query: &str,
    k: usize,
) -> RagResult<Vec<SearchHit>> {
    let vector = embedder.embed_query(query).await?;
    let hits = index.search(&vector, k)?;
    tracing::debug!(index = index.name(), query, hits = hits.len(), "retrieved");
    Ok(hits)
}

/// First `max` characters of `text`, never splitting a character.
pub fn preview(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

fn newline_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*[\r\n]+\s*").expect("static pattern"))
}

/// Collapses line breaks (and the whitespace around them) into single spaces.
pub fn flatten(text: &str) -> String {
    newline_run().replace_all(text, " ").into_owned()
}

/// Search results as printed by the search loop. `preview_chars = None` prints full text.
pub fn render_search_hits(hits: &[SearchHit], preview_chars: Option<usize>) -> String {
    let mut out = String::new();
    for (i, hit) in hits.iter().enumerate() {
        out.push_str(&format!("\n--- RESULT #{} (dist: {:.4}) ---\n", i + 1, hit.distance));
        let flat = flatten(&hit.record.text);
        match preview_chars {
            Some(max) => out.push_str(&format!("...{}...\n", preview(&flat, max))),
            None => out.push_str(&format!("{flat}\n")),
        }
    }
    out
}

/// Context block handed to the answer template.
pub fn render_context(hits: &[SearchHit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| format!("\nFragment {}: {}\n", i, hit.record.text))
        .collect()
}

/// Short listing of what the model is about to read.
pub fn render_debug_listing(hits: &[SearchHit], max_chars: usize) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| format!("[{}] {}...\n", i, flatten(preview(&hit.record.text, max_chars))))
        .collect()
}

/// Output of the agent's document search tool.
pub fn render_tool_snippets(hits: &[SearchHit], max_chars: usize) -> String {
    hits.iter()
        .map(|hit| format!("- {}...", preview(&hit.record.text, max_chars)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Fills the `{context}` and `{question}` placeholders.
pub fn render_prompt(template: &str, context: &str, question: &str) -> String {
    template
        .replace("{question}", question)
        .replace("{context}", context)
}
