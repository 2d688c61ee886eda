//! Sandbox Runner: the child-process side of the wire protocol. Reads
//! framed [`Command`]s from stdin, dispatches them against a
//! [`SandboxRepl`], and writes framed [`Response`]s to stdout —
//! including the nested `subcall_request`/`subcall_response` round
//! trip issued mid-`exec` when sandbox code calls `llm_query`. Only one
//! exec is ever in flight per runner, so it is safe for `run_exec` to
//! borrow stdin directly while the outer loop waits on it.

pub mod repl;

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::SandboxError;
use crate::wire::frame::{read_frame, write_frame};
use crate::wire::message::{Command, Response, SubCallRequest, SubCallResponse};
use repl::{SandboxRepl, SubcallSink};

/// One pending nested sub-LLM request: the payload to send upstream,
/// and where to deliver the eventual answer.
struct PendingSubcall {
    request: SubCallRequest,
    reply: oneshot::Sender<SubCallResponse>,
}

/// Bridges blocking Python-thread sub-LLM calls to the async runner
/// loop via a channel, so the nested frame round-trip can happen
/// without the exec thread touching the stdio streams directly.
struct ChannelSink {
    tx: mpsc::Sender<PendingSubcall>,
}

impl SubcallSink for ChannelSink {
    fn call(&self, request: SubCallRequest) -> SubCallResponse {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .blocking_send(PendingSubcall {
                request,
                reply: reply_tx,
            })
            .is_err()
        {
            return SubCallResponse { results: Vec::new() };
        }
        reply_rx
            .blocking_recv()
            .unwrap_or(SubCallResponse { results: Vec::new() })
    }
}

/// Runs the Sandbox Runner's main loop against `stdin`/`stdout`,
/// returning once `shutdown` is received or the connection closes.
pub async fn run<R, W>(
    mut stdin: R,
    mut stdout: W,
    max_frame_bytes: u32,
    max_output_chars: usize,
) -> Result<(), SandboxError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (subcall_tx, mut subcall_rx) = mpsc::channel::<PendingSubcall>(8);
    let sink = Arc::new(ChannelSink { tx: subcall_tx });
    let repl = Arc::new(
        tokio::task::spawn_blocking({
            let sink = Arc::clone(&sink) as Arc<dyn SubcallSink>;
            move || SandboxRepl::new(sink, max_output_chars)
        })
        .await
        .map_err(|e| SandboxError::Framing(format!("interpreter init panicked: {e}")))??,
    );

    info!("sandbox runner ready");

    loop {
        let frame = match read_frame(&mut stdin, max_frame_bytes).await {
            Ok(frame) => frame,
            Err(SandboxError::ChildDied(_)) => {
                debug!("parent closed connection, shutting down");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let command: Command = serde_json::from_slice(&frame)
            .map_err(|e| SandboxError::Framing(format!("invalid command payload: {e}")))?;

        match command {
            Command::Ping => {
                send(&mut stdout, &Response::Ok, max_frame_bytes).await?;
            }
            Command::LoadDocuments { docs } => {
                let repl = Arc::clone(&repl);
                let loaded = tokio::task::spawn_blocking(move || repl.load_documents(&docs))
                    .await
                    .map_err(|e| SandboxError::Framing(format!("load_documents panicked: {e}")))??;
                send(&mut stdout, &Response::Loaded { loaded }, max_frame_bytes).await?;
            }
            Command::Exec { code, exec_timeout_s } => {
                let response = run_exec(
                    &repl,
                    &mut subcall_rx,
                    &mut stdin,
                    &mut stdout,
                    code,
                    exec_timeout_s,
                    max_frame_bytes,
                )
                .await?;
                send(&mut stdout, &response, max_frame_bytes).await?;
            }
            Command::Reset => {
                let repl = Arc::clone(&repl);
                tokio::task::spawn_blocking(move || repl.reset())
                    .await
                    .map_err(|e| SandboxError::Framing(format!("reset panicked: {e}")))??;
                send(&mut stdout, &Response::Reset, max_frame_bytes).await?;
            }
            Command::Shutdown => {
                info!("shutdown received");
                return Ok(());
            }
            Command::SubcallResponse { .. } => {
                warn!("unexpected unsolicited subcall_response command, ignoring");
            }
        }
    }
}

/// Runs one `exec`, ferrying any nested sub-LLM requests it raises back
/// out over `stdout` and reading the matching `SubcallResponse` command
/// back from `stdin` before letting the blocking exec continue.
#[allow(clippy::too_many_arguments)]
async fn run_exec<R, W>(
    repl: &Arc<SandboxRepl>,
    subcall_rx: &mut mpsc::Receiver<PendingSubcall>,
    stdin: &mut R,
    stdout: &mut W,
    code: String,
    exec_timeout_s: u64,
    max_frame_bytes: u32,
) -> Result<Response, SandboxError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let repl_for_exec = Arc::clone(repl);
    let mut exec_task = tokio::task::spawn_blocking(move || {
        repl_for_exec.exec(&code, std::time::Duration::from_secs(exec_timeout_s))
    });

    loop {
        tokio::select! {
            result = &mut exec_task => {
                let outcome = result
                    .map_err(|e| SandboxError::Framing(format!("exec panicked: {e}")))??;
                return Ok(Response::Capture(outcome.capture));
            }
            Some(pending) = subcall_rx.recv() => {
                send(stdout, &Response::SubcallRequest(pending.request), max_frame_bytes).await?;

                let frame = read_frame(stdin, max_frame_bytes).await?;
                let command: Command = serde_json::from_slice(&frame)
                    .map_err(|e| SandboxError::Framing(format!("invalid subcall response: {e}")))?;
                let Command::SubcallResponse { response } = command else {
                    return Err(SandboxError::Framing(
                        "expected subcall_response while exec was pending".to_string(),
                    ));
                };
                let _ = pending.reply.send(response);
            }
        }
    }
}

async fn send<W: AsyncWrite + Unpin>(
    stdout: &mut W,
    response: &Response,
    max_frame_bytes: u32,
) -> Result<(), SandboxError> {
    let payload = serde_json::to_vec(response)
        .map_err(|e| SandboxError::Framing(format!("failed to encode response: {e}")))?;
    write_frame(stdout, &payload, max_frame_bytes).await
}
