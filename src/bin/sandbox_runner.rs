//! Sandbox Runner entry point: the child-process side of the Executor
//! wire protocol. Reads framed commands from its own stdin and writes
//! framed responses to its own stdout. Never invoked directly; spawned
//! by the Executor's [`shesha::executor::pool::Pool`].

use shesha::config::{DEFAULT_MAX_FRAME_BYTES, DEFAULT_MAX_OUTPUT_CHARS};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    shesha::sandbox::run(stdin, stdout, DEFAULT_MAX_FRAME_BYTES, DEFAULT_MAX_OUTPUT_CHARS).await?;
    Ok(())
}
