//! CLI layer for Shesha.
//!
//! Provides the command-line interface using clap, with a single `ask`
//! command that loads documents, runs one query, and prints the result.

pub mod ask;
pub mod parser;

pub use ask::AskParams;
pub use parser::{Cli, Commands};

/// Executes the parsed CLI command.
///
/// # Errors
///
/// Returns an error if the command fails to execute.
pub async fn execute(cli: &Cli) -> anyhow::Result<String> {
    match &cli.command {
        Commands::Ask { docs, question, model, max_iterations, format } => {
            let params = AskParams {
                docs: docs.clone(),
                question: question.clone(),
                model: model.clone(),
                max_iterations: *max_iterations,
                format: format.clone(),
            };
            ask::execute(&params).await
        }
    }
}
