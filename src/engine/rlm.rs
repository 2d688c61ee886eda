//! The driver loop itself: message assembly, driver round-trips, code
//! execution, `FINAL`/`FINAL_VAR` resolution, executor-death recovery,
//! and trace emission. [`run`] is the only entry point; it always
//! returns a [`QueryResult`] with a terminal state tag, never a bare
//! `Result::Err`, so callers never have to handle a hard query failure
//! separately from a graceful one.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::warn;

use crate::config::EngineConfig;
use crate::core::capture::{CaptureRecord, SubCallRecord};
use crate::core::query::{CancelSignal, TokenUsage};
use crate::core::trace::{QueryId, Step, TraceHandle};
use crate::core::{Query, QueryResult, TerminalState};
use crate::engine::{parsing, prompts};
use crate::error::{EngineError, SandboxError};
use crate::executor::Executor;
use crate::executor::pool::Pool;
use crate::gateway::SubLlmGateway;
use crate::gateway::envelope;
use crate::llm::message::{ChatMessage, ChatRequest, Role};
use crate::llm::provider::LlmProvider;
use crate::storage::TraceStorage;
use crate::verify;

/// Runs `query` to completion against the given collaborators.
///
/// 1. Opens a trace and assembles the envelope token, sub-LLM gateway,
///    and executor for this query.
/// 2. Builds the fixed system/first-user/priming-assistant messages.
/// 3. Drives up to `max_iterations` rounds, executing code blocks and
///    resolving `FINAL`/`FINAL_VAR` as they appear.
/// 4. On exhaustion, offers the driver one best-effort grace round.
/// 5. Runs the Citation Verifier over a resolved answer.
pub async fn run(
    pool: &Pool,
    provider: &Arc<dyn LlmProvider>,
    storage: &dyn TraceStorage,
    config: &EngineConfig,
    query: Query,
) -> QueryResult {
    let started = Instant::now();
    let query_id = generate_query_id();
    let trace = open_trace(storage, &query_id).await;

    let outcome = drive(pool, provider, storage, config, &query, &trace).await;
    let duration = started.elapsed();

    match outcome {
        Ok(resolution) => {
            let verification = if query.options.effective_verify_citations(config) {
                Some(verify::verify(&resolution.answer, &query.documents))
            } else {
                None
            };
            record_step(
                storage,
                &trace,
                Step::Verification {
                    index: resolution.final_index,
                    ts_ms: now_ms(),
                    available: verification.is_some(),
                },
            )
            .await;
            QueryResult {
                answer: resolution.answer,
                usage: resolution.usage,
                duration,
                trace,
                verification,
                terminal: resolution.terminal,
            }
        }
        Err(err) => {
            warn!(error = %err, "query ended without a resolved answer");
            QueryResult {
                answer: String::new(),
                usage: TokenUsage::default(),
                duration,
                trace,
                verification: None,
                terminal: terminal_state_for(&err),
            }
        }
    }
}

const fn terminal_state_for(err: &EngineError) -> TerminalState {
    match err {
        EngineError::Protocol(_) | EngineError::Timeout | EngineError::Internal(_) => {
            TerminalState::ExecutorFailed
        }
        EngineError::Provider(_) => TerminalState::ProviderFailed,
        EngineError::Cancelled => TerminalState::Cancelled,
        EngineError::BudgetExhausted { .. } => TerminalState::BudgetExhausted,
    }
}

/// A resolved (or best-effort) answer plus the bookkeeping the caller
/// needs to finish the query: accumulated usage and the terminal tag
/// to report (`Ok` or `BudgetExhausted`).
struct Resolution {
    answer: String,
    usage: TokenUsage,
    terminal: TerminalState,
    /// The trace step index to use for the `Verification` step appended
    /// in `run` after citation verification runs.
    final_index: u64,
}

async fn drive(
    pool: &Pool,
    provider: &Arc<dyn LlmProvider>,
    storage: &dyn TraceStorage,
    config: &EngineConfig,
    query: &Query,
    trace: &TraceHandle,
) -> Result<Resolution, EngineError> {
    let mut index: u64 = 0;

    let envelope_token = envelope::generate_token();
    let sub_model = query
        .options
        .sub_model_id
        .clone()
        .or_else(|| config.sub_model.clone())
        .unwrap_or_else(|| query.model_id.clone());
    let gateway = SubLlmGateway::new(
        Arc::clone(provider),
        sub_model,
        config.max_concurrency,
        query.options.effective_max_subcall_chars(config),
        envelope_token.clone(),
    );

    let docs: Vec<String> = query.documents.iter().map(|d| d.content.clone()).collect();
    let exec_timeout = query.options.effective_exec_timeout(config);
    let mut executor = Executor::acquire(pool, docs.clone(), exec_timeout)
        .await
        .map_err(EngineError::Protocol)?;

    let mut messages = vec![
        prompts::build_system_message(&envelope_token, query.documents.len(), query.total_chars()),
        prompts::build_first_user_message(&query.question),
        prompts::build_priming_assistant_message(&query.documents),
    ];

    let mut usage = TokenUsage::default();
    let cancel = query.options.cancel_signal.clone().unwrap_or_default();
    let max_iterations = query.options.effective_max_iterations(config);

    for iteration in 1..=max_iterations {
        if cancel.is_cancelled() {
            executor.destroy().await;
            record_step(storage, trace, Step::Cancelled { index, ts_ms: now_ms() }).await;
            return Err(EngineError::Cancelled);
        }

        record_step(
            storage,
            trace,
            Step::IterationStart { index, iteration, ts_ms: now_ms() },
        )
        .await;
        index += 1;

        let ctx = RoundCtx {
            pool,
            storage,
            trace,
            gateway: &gateway,
            docs: &docs,
            exec_timeout,
            question: &query.question,
            envelope_token: &envelope_token,
            model_id: &query.model_id,
            cancel: &cancel,
        };
        let (new_executor, answer) =
            run_round(ctx, provider, executor, &mut messages, &mut usage, &mut index).await?;
        executor = new_executor;

        if let Some(answer) = answer {
            record_step(
                storage,
                trace,
                Step::FinalAnswer { index, ts_ms: now_ms(), answer_len: answer.chars().count() },
            )
            .await;
            index += 1;
            executor.release().await;
            return Ok(Resolution { answer, usage, terminal: TerminalState::Ok, final_index: index });
        }
    }

    messages.push(prompts::build_budget_exhausted_message(max_iterations));
    let ctx = RoundCtx {
        pool,
        storage,
        trace,
        gateway: &gateway,
        docs: &docs,
        exec_timeout,
        question: &query.question,
        envelope_token: &envelope_token,
        model_id: &query.model_id,
        cancel: &cancel,
    };
    let (executor, grace) = run_round(ctx, provider, executor, &mut messages, &mut usage, &mut index).await?;

    match grace {
        Some(answer) => {
            record_step(
                storage,
                trace,
                Step::FinalAnswer { index, ts_ms: now_ms(), answer_len: answer.chars().count() },
            )
            .await;
            index += 1;
            executor.release().await;
            Ok(Resolution { answer, usage, terminal: TerminalState::Ok, final_index: index })
        }
        None => {
            executor.release().await;
            let best_effort = messages
                .iter()
                .rev()
                .find(|m| m.role == Role::Assistant)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Ok(Resolution {
                answer: best_effort,
                usage,
                terminal: TerminalState::BudgetExhausted,
                final_index: index,
            })
        }
    }
}

/// Collaborators one driver round needs, bundled to keep `run_round`'s
/// parameter list manageable.
struct RoundCtx<'a> {
    pool: &'a Pool,
    storage: &'a dyn TraceStorage,
    trace: &'a TraceHandle,
    gateway: &'a SubLlmGateway,
    docs: &'a [String],
    exec_timeout: Duration,
    question: &'a str,
    envelope_token: &'a str,
    model_id: &'a str,
    cancel: &'a CancelSignal,
}

/// Runs one driver request/response round: sends `messages`, parses the
/// response for code blocks and `FINAL`, executes blocks in order, and
/// returns the resolved answer if this round produced one. `executor`
/// is threaded through by value since a protocol failure mid-round may
/// replace it with a freshly reacquired one.
async fn run_round(
    ctx: RoundCtx<'_>,
    provider: &Arc<dyn LlmProvider>,
    mut executor: Executor,
    messages: &mut Vec<ChatMessage>,
    usage: &mut TokenUsage,
    index: &mut u64,
) -> Result<(Executor, Option<String>), EngineError> {
    record_step(
        ctx.storage,
        ctx.trace,
        Step::DriverRequest { index: *index, ts_ms: now_ms(), message_count: messages.len() },
    )
    .await;
    *index += 1;

    let request = ChatRequest {
        model: ctx.model_id.to_string(),
        messages: messages.clone(),
        temperature: None,
        max_tokens: None,
        json_mode: false,
        stream: false,
    };
    let response = match provider.chat(&request).await {
        Ok(response) => response,
        Err(e) => {
            executor.destroy().await;
            return Err(EngineError::Provider(e));
        }
    };
    usage.record(ctx.model_id, &response.usage);

    record_step(
        ctx.storage,
        ctx.trace,
        Step::DriverResponse {
            index: *index,
            ts_ms: now_ms(),
            content_len: response.content.chars().count(),
            prompt_tokens: response.usage.prompt_tokens,
            completion_tokens: response.usage.completion_tokens,
        },
    )
    .await;
    *index += 1;

    messages.push(crate::llm::message::assistant_message(&response.content));

    let code_blocks = parsing::extract_code_blocks(&response.content);
    let mut final_answer = None;

    for code in &code_blocks {
        if ctx.cancel.is_cancelled() {
            executor.destroy().await;
            return Err(EngineError::Cancelled);
        }

        record_step(
            ctx.storage,
            ctx.trace,
            Step::CodeExecuted { index: *index, ts_ms: now_ms(), code_len: code.chars().count() },
        )
        .await;
        *index += 1;

        let (new_executor, capture) = exec_with_recovery(
            executor,
            ctx.pool,
            ctx.docs,
            ctx.exec_timeout,
            code,
            ctx.gateway,
            ctx.storage,
            ctx.trace,
            index,
            usage,
            ctx.cancel,
        )
        .await?;
        executor = new_executor;

        record_step(
            ctx.storage,
            ctx.trace,
            Step::CodeOutput {
                index: *index,
                ts_ms: now_ms(),
                output_len: capture.untruncated_len,
                truncated: capture.truncated,
                raised: capture.raised(),
            },
        )
        .await;
        *index += 1;

        messages.push(prompts::build_code_feedback_message(ctx.question, &capture, ctx.envelope_token));

        if final_answer.is_none() {
            final_answer.clone_from(&capture.final_answer);
        }
    }

    if final_answer.is_none() {
        if let Some(identifier) = parsing::extract_bare_final_identifier(&response.content) {
            let (new_executor, answer) = resolve_bare_final(
                executor,
                ctx.pool,
                ctx.docs,
                ctx.exec_timeout,
                &identifier,
                ctx.gateway,
                ctx.storage,
                ctx.trace,
                index,
                usage,
                ctx.cancel,
            )
            .await?;
            executor = new_executor;
            final_answer = Some(answer);
        } else if code_blocks.is_empty() {
            messages.push(prompts::build_no_code_nudge_message());
        }
    }

    Ok((executor, final_answer))
}

/// The outcome of racing one `Executor::exec` call against cancellation.
enum ExecAttempt {
    /// The exec future resolved on its own.
    Done(Result<(CaptureRecord, Vec<SubCallRecord>, TokenUsage), SandboxError>),
    /// `cancel` fired before the exec future resolved.
    Cancelled,
}

/// Runs `executor.exec(code, gateway)`, racing it against `cancel` so a
/// cancellation mid-exec (including during a nested sub-LLM call) is
/// observed promptly instead of waiting out the full `exec_timeout`.
async fn run_exec(
    executor: &mut Executor,
    code: &str,
    gateway: &SubLlmGateway,
    cancel: &CancelSignal,
) -> ExecAttempt {
    tokio::select! {
        result = executor.exec(code, gateway) => ExecAttempt::Done(result),
        () = cancel.cancelled() => ExecAttempt::Cancelled,
    }
}

/// Appends one `SubcallRequest`/`SubcallResponse` pair per sub-LLM call
/// serviced during an exec, in call order.
async fn record_subcalls(storage: &dyn TraceStorage, trace: &TraceHandle, index: &mut u64, records: &[SubCallRecord]) {
    for record in records {
        record_step(
            storage,
            trace,
            Step::SubcallRequest {
                index: *index,
                ts_ms: now_ms(),
                model: record.model.clone(),
                content_len: record.content_len,
                size_exceeded: record.size_exceeded,
            },
        )
        .await;
        *index += 1;

        record_step(
            storage,
            trace,
            Step::SubcallResponse {
                index: *index,
                ts_ms: now_ms(),
                content_len: record.response.as_ref().map_or(0, |r| r.chars().count()),
                prompt_tokens: record.prompt_tokens,
                completion_tokens: record.completion_tokens,
            },
        )
        .await;
        *index += 1;
    }
}

/// Executes one code block, recovering from a dead sandbox child once
/// by destroying it and re-acquiring a fresh executor from the pool. A
/// timeout is treated as non-recoverable; any other protocol failure
/// gets one destroy-and-retry attempt before ending the query.
/// Cancellation is raced against both the original and the retried exec,
/// destroying whichever executor is live when it fires.
#[allow(clippy::too_many_arguments)]
async fn exec_with_recovery(
    mut executor: Executor,
    pool: &Pool,
    docs: &[String],
    exec_timeout: Duration,
    code: &str,
    gateway: &SubLlmGateway,
    storage: &dyn TraceStorage,
    trace: &TraceHandle,
    index: &mut u64,
    usage: &mut TokenUsage,
    cancel: &CancelSignal,
) -> Result<(Executor, CaptureRecord), EngineError> {
    match run_exec(&mut executor, code, gateway, cancel).await {
        ExecAttempt::Cancelled => {
            executor.destroy().await;
            Err(EngineError::Cancelled)
        }
        ExecAttempt::Done(Ok((capture, subcalls, call_usage))) => {
            record_subcalls(storage, trace, index, &subcalls).await;
            usage.merge(&call_usage);
            Ok((executor, capture))
        }
        ExecAttempt::Done(Err(SandboxError::Timeout(_))) => {
            executor.destroy().await;
            Err(EngineError::Timeout)
        }
        ExecAttempt::Done(Err(e)) => {
            warn!(error = %e, "sandbox protocol failure, attempting recovery");
            executor.destroy().await;
            record_step(
                storage,
                trace,
                Step::ExecutorReacquired { index: *index, ts_ms: now_ms(), iteration: 0 },
            )
            .await;
            *index += 1;

            let mut fresh = crate::executor::reacquire(pool, docs.to_vec(), exec_timeout)
                .await
                .map_err(EngineError::Protocol)?;
            match run_exec(&mut fresh, code, gateway, cancel).await {
                ExecAttempt::Cancelled => {
                    fresh.destroy().await;
                    Err(EngineError::Cancelled)
                }
                ExecAttempt::Done(Ok((capture, subcalls, call_usage))) => {
                    record_subcalls(storage, trace, index, &subcalls).await;
                    usage.merge(&call_usage);
                    Ok((fresh, capture))
                }
                ExecAttempt::Done(Err(e2)) => {
                    fresh.destroy().await;
                    Err(EngineError::Protocol(e2))
                }
            }
        }
    }
}

/// Resolves a bare `FINAL(identifier)` fallback by running a synthetic
/// `FINAL_VAR("identifier")` block against the live namespace. If the
/// identifier is not bound, the identifier text itself becomes the
/// fallback answer.
#[allow(clippy::too_many_arguments)]
async fn resolve_bare_final(
    executor: Executor,
    pool: &Pool,
    docs: &[String],
    exec_timeout: Duration,
    identifier: &str,
    gateway: &SubLlmGateway,
    storage: &dyn TraceStorage,
    trace: &TraceHandle,
    index: &mut u64,
    usage: &mut TokenUsage,
    cancel: &CancelSignal,
) -> Result<(Executor, String), EngineError> {
    let synthetic = format!("FINAL_VAR({identifier:?})");
    let (executor, capture) = exec_with_recovery(
        executor,
        pool,
        docs,
        exec_timeout,
        &synthetic,
        gateway,
        storage,
        trace,
        index,
        usage,
        cancel,
    )
    .await?;
    Ok((executor, capture.final_answer.unwrap_or_else(|| identifier.to_string())))
}

async fn open_trace(storage: &dyn TraceStorage, query_id: &QueryId) -> TraceHandle {
    match storage.open_trace(query_id).await {
        Ok(handle) => handle,
        Err(e) => {
            warn!(error = %e, "failed to open trace, continuing without persistence");
            TraceHandle { query_id: query_id.clone() }
        }
    }
}

async fn record_step(storage: &dyn TraceStorage, trace: &TraceHandle, step: Step) {
    if let Err(e) = storage.append_step(trace, step).await {
        warn!(error = %e, "failed to append trace step");
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

fn generate_query_id() -> QueryId {
    use rand::RngCore;
    use rand::rngs::OsRng;
    let mut suffix = [0_u8; 4];
    OsRng.fill_bytes(&mut suffix);
    let suffix_hex: String = suffix.iter().map(|b| format!("{b:02x}")).collect();
    format!("q-{}-{suffix_hex}", now_ms())
}
