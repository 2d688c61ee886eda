//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Shesha: a recursive-language-model execution engine for answering
/// questions over document collections.
#[derive(Parser, Debug)]
#[command(name = "shesha")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Answer a question over a set of documents.
    #[command(after_help = r#"Examples:
  shesha ask --docs ./notes --question "Who is Carthoris's father?"
  shesha ask --docs a.txt b.txt --question "Summarize the disagreement" --model gpt-5.2-2025-12-11
  shesha ask --docs ./corpus --question "..." --max-iterations 10 --format json
"#)]
    Ask {
        /// Files or directories to load as documents. Directories are
        /// read one level deep, in sorted filename order.
        #[arg(long, required = true, num_args = 1..)]
        docs: Vec<PathBuf>,

        /// The question to answer.
        #[arg(long)]
        question: String,

        /// Driver model id. Falls back to `EngineConfig`/environment default.
        #[arg(long)]
        model: Option<String>,

        /// Overrides the iteration budget for this query.
        #[arg(long)]
        max_iterations: Option<usize>,

        /// Output format.
        #[arg(long, default_value = "text")]
        format: String,
    },
}
