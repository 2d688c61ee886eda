//! Shesha CLI entry point.

use std::io::Write;

use clap::Parser;
use shesha::cli::{Cli, execute};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match execute(&cli).await {
        Ok(output) => {
            let _ = std::io::stdout().write_all(output.as_bytes());
            Ok(())
        }
        Err(err) => {
            let _ = writeln!(std::io::stderr(), "error: {err:#}");
            std::process::exit(1);
        }
    }
}
