//! One sandbox child process and the framed request/response exchange
//! with it, including the nested sub-LLM callback round trip.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::process::{Child, ChildStdin, ChildStdout, Command as ProcessCommand};
use tracing::{debug, warn};

use crate::core::capture::{CaptureRecord, SubCallRecord};
use crate::core::query::TokenUsage;
use crate::error::SandboxError;
use crate::gateway::SubLlmGateway;
use crate::wire::frame::{read_frame, write_frame};
use crate::wire::message::{Command, Response};

/// A spawned sandbox child, owning its process handle and framed stdio.
pub struct SandboxChild {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    max_frame_bytes: u32,
}

impl SandboxChild {
    /// Spawns a fresh sandbox child running `binary_path`.
    pub fn spawn(binary_path: &str, max_frame_bytes: u32) -> Result<Self, SandboxError> {
        let mut child = ProcessCommand::new(binary_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::Spawn(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::Spawn("child stdin was not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Spawn("child stdout was not piped".to_string()))?;

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            max_frame_bytes,
        })
    }

    /// Health check; returns `Ok(())` on a well-formed `Response::Ok`.
    pub async fn ping(&mut self) -> Result<(), SandboxError> {
        self.send(&Command::Ping).await?;
        match self.recv().await? {
            Response::Ok => Ok(()),
            other => Err(SandboxError::Framing(format!("unexpected ping reply: {other:?}"))),
        }
    }

    /// Loads documents into the child's namespace.
    pub async fn load_documents(&mut self, docs: Vec<String>) -> Result<usize, SandboxError> {
        self.send(&Command::LoadDocuments { docs }).await?;
        match self.recv().await? {
            Response::Loaded { loaded } => Ok(loaded),
            other => Err(SandboxError::Framing(format!(
                "unexpected load_documents reply: {other:?}"
            ))),
        }
    }

    /// Runs one code block, servicing any nested `llm_query` callbacks
    /// through `gateway` until the exec resolves or `timeout` elapses.
    /// Returns the capture alongside a record of every sub-LLM call
    /// serviced along the way (for trace recording) and their combined
    /// token usage.
    pub async fn exec(
        &mut self,
        code: &str,
        timeout: Duration,
        gateway: &SubLlmGateway,
    ) -> Result<(CaptureRecord, Vec<SubCallRecord>, TokenUsage), SandboxError> {
        self.send(&Command::Exec {
            code: code.to_string(),
            exec_timeout_s: timeout.as_secs(),
        })
        .await?;

        let deadline = tokio::time::Instant::now() + timeout;
        let mut subcall_records = Vec::new();
        let mut usage = TokenUsage::default();
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let response = tokio::time::timeout(remaining, self.recv())
                .await
                .map_err(|_| SandboxError::Timeout(timeout))??;

            match response {
                Response::Capture(capture) => return Ok((capture, subcall_records, usage)),
                Response::SubcallRequest(request) => {
                    debug!(calls = request.calls.len(), "servicing nested sub-LLM request");
                    let (subcall_response, call_usage, records) = gateway.handle(request).await;
                    usage.merge(&call_usage);
                    subcall_records.extend(records);
                    self.send(&Command::SubcallResponse {
                        response: subcall_response,
                    })
                    .await?;
                }
                other => {
                    return Err(SandboxError::Framing(format!(
                        "unexpected response during exec: {other:?}"
                    )));
                }
            }
        }
    }

    /// Clears the namespace, keeping the child warm for reuse.
    pub async fn reset(&mut self) -> Result<(), SandboxError> {
        self.send(&Command::Reset).await?;
        match self.recv().await? {
            Response::Reset => Ok(()),
            other => Err(SandboxError::Framing(format!("unexpected reset reply: {other:?}"))),
        }
    }

    /// Requests a clean shutdown. Does not wait for process exit; callers
    /// that need that should follow with `kill`/`wait`.
    pub async fn shutdown(&mut self) -> Result<(), SandboxError> {
        self.send(&Command::Shutdown).await
    }

    /// Forcibly terminates the child process.
    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!(error = %e, "failed to kill sandbox child");
        }
    }

    async fn send(&mut self, command: &Command) -> Result<(), SandboxError> {
        let payload = serde_json::to_vec(command)
            .map_err(|e| SandboxError::Framing(format!("failed to encode command: {e}")))?;
        write_frame(&mut self.stdin, &payload, self.max_frame_bytes).await
    }

    async fn recv(&mut self) -> Result<Response, SandboxError> {
        let payload = read_frame(&mut self.stdout, self.max_frame_bytes).await?;
        serde_json::from_slice(&payload)
            .map_err(|e| SandboxError::Framing(format!("invalid response payload: {e}")))
    }
}
