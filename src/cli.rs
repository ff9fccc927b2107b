use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "ragbench",
    version,
    about = "Index a PDF into a local vector store, search it, ask grounded questions or talk to a study agent"
)]
pub struct Cli {
    /// Path to config.toml (defaults: next to the executable, then the working directory)
    #[arg(long, global = true, env = "RAGBENCH_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Chunk and embed the PDF into a fresh on-disk table, then search it
    Index {
        /// PDF to ingest (defaults to ingest.pdf_path)
        #[arg(long)]
        pdf: Option<PathBuf>,

        /// Keep the existing store directory and append to the table
        #[arg(long, default_value_t = false)]
        keep: bool,

        /// Exit after indexing instead of entering the search loop
        #[arg(long, default_value_t = false)]
        no_search: bool,
    },
    /// Interactive similarity search
    Search {
        /// Which vector store to query
        #[arg(long, value_enum, default_value_t = StoreEngine::Disk)]
        engine: StoreEngine,

        /// PDF to load into the in-memory collection (defaults to ingest.pdf_path)
        #[arg(long)]
        pdf: Option<PathBuf>,
    },
    /// Ask questions answered only from the indexed document
    Ask,
    /// Chat with the tool-calling study agent
    Agent,
    /// Embed a few phrases and print their cosine similarity to the first one
    Compare {
        /// Phrases to compare (defaults to a built-in set)
        phrases: Vec<String>,
    },
    /// List the model ids exposed by the active provider
    Models,
    /// Generate a structured study plan for a topic
    Plan {
        /// Topic of the course
        topic: String,
    },
    /// Print the effective configuration
    Config {
        /// Write the defaults to config.toml when no file exists yet
        #[arg(long, default_value_t = false)]
        write: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreEngine {
    /// Persistent table under store.path
    Disk,
    /// Ephemeral collection rebuilt from the PDF
    Memory,
}
