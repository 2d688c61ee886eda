//! End-to-end engine scenarios against a real, spawned sandbox-runner
//! child process and a scripted mock driver provider. These exercise
//! the full `Engine::query` path (driver round-trip, sandbox exec,
//! trace persistence, citation verification) rather than any single
//! module in isolation.

#![allow(clippy::panic)]

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures_util::Stream;

use shesha::config::EngineConfig;
use shesha::core::{Document, Query, Step, TerminalState};
use shesha::error::AgentError;
use shesha::executor::pool::Pool;
use shesha::llm::message::{ChatRequest, ChatResponse, TokenUsage};
use shesha::llm::provider::LlmProvider;
use shesha::storage::{SqliteTraceStorage, TraceStorage};
use shesha::Engine;

/// Path to the sibling sandbox-runner binary Cargo just built for us.
fn sandbox_runner_bin() -> String {
    env!("CARGO_BIN_EXE_shesha-sandbox-runner").to_string()
}

fn test_config() -> EngineConfig {
    EngineConfig::builder()
        .api_key("unused-in-these-tests")
        .pool_size(1)
        .max_iterations(5)
        .build()
        .unwrap_or_else(|e| panic!("config should build: {e}"))
}

fn test_storage() -> Arc<SqliteTraceStorage> {
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir should succeed: {e}"));
    let path = dir.path().join("traces.db");
    // Leak the tempdir so the database file outlives this function; each
    // test gets its own directory and process exit cleans it up.
    let storage = SqliteTraceStorage::open(path).unwrap_or_else(|e| panic!("open should succeed: {e}"));
    std::mem::forget(dir);
    Arc::new(storage)
}

/// A driver provider that replays a fixed script of responses in order,
/// one per call, and panics if asked for more than it was given.
struct ScriptedProvider {
    responses: Vec<String>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: responses.into_iter().map(str::to_string).collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn chat(&self, _request: &ChatRequest) -> Result<ChatResponse, AgentError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        let content = self
            .responses
            .get(index)
            .unwrap_or_else(|| panic!("scripted provider exhausted after {index} calls"))
            .clone();
        Ok(ChatResponse {
            content,
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
            finish_reason: Some("stop".to_string()),
        })
    }

    async fn chat_stream(
        &self,
        _request: &ChatRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<String, AgentError>> + Send>>, AgentError> {
        unreachable!("streaming is not exercised by these scenarios")
    }
}

/// Scenario 1: single-document lookup. A short document names the
/// answer directly; the driver reads `context[0]` and calls `FINAL`.
#[tokio::test]
async fn scenario_single_document_lookup() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        "```repl\nFINAL(context[0])\n```",
    ]));
    let pool = Pool::new(sandbox_runner_bin(), 1, 8 * 1024 * 1024);
    let engine = Engine::new(pool, provider, test_storage(), test_config());

    let mut doc = String::new();
    doc.push_str("Carthoris is the son of John Carter. ");
    doc.push_str(&"filler text padding out the document. ".repeat(100));

    let query = Query::new(
        "Who is Carthoris's father?",
        vec![Document::new("doc-0", doc)],
        "driver-model",
    );

    let result = engine.query(query).await;
    assert_eq!(result.terminal, TerminalState::Ok);
    assert!(result.answer.contains("John Carter"));
}

/// Scenario 3: iteration-0 guard. The driver's first response is a bare
/// `FINAL(...)` with no code block; the engine must not accept it and
/// must re-prompt, so a second scripted response is required before the
/// query resolves.
#[tokio::test]
async fn scenario_iteration_zero_final_is_rejected_and_reprompted() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        "FINAL(\"42\")",
        "```repl\nFINAL('42')\n```",
    ]));
    let pool = Pool::new(sandbox_runner_bin(), 1, 8 * 1024 * 1024);
    let engine = Engine::new(pool, provider, test_storage(), test_config());

    let query = Query::new(
        "What is the answer?",
        vec![Document::new("doc-0", "the answer is 42")],
        "driver-model",
    );

    let result = engine.query(query).await;
    assert_eq!(result.terminal, TerminalState::Ok);
    assert_eq!(result.answer, "42");
}

/// Scenario 6: citation verification. The final answer cites a document
/// that exists (with a quote that matches) and one that does not. The
/// trace records exactly one `verification` step once the query ends.
#[tokio::test]
async fn scenario_citation_verification_flags_missing_document() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        r#"```repl
FINAL('Doc 2 says "the quick brown fox jumps over the lazy dog", per Doc 7.')
```"#,
    ]));
    let pool = Pool::new(sandbox_runner_bin(), 1, 8 * 1024 * 1024);
    let storage = test_storage();
    let engine = Engine::new(pool, provider, Arc::clone(&storage) as Arc<dyn TraceStorage>, test_config());

    let query = Query::new(
        "Summarize the documents and cite your sources.",
        vec![
            Document::new("0", "Carthoris is the son of John Carter."),
            Document::new("1", "Some other content entirely."),
            Document::new("2", "The quick brown fox jumps over the lazy dog."),
        ],
        "driver-model",
    );

    let result = engine.query(query).await;
    assert_eq!(result.terminal, TerminalState::Ok);
    let verification = result
        .verification
        .unwrap_or_else(|| panic!("citation verification should have run"));
    assert!(!verification.all_valid());
    let doc7 = verification
        .citations
        .iter()
        .find(|c| c.doc_index == 7)
        .unwrap_or_else(|| panic!("doc 7 citation should be present"));
    assert!(!doc7.valid);
    let doc2 = verification
        .citations
        .iter()
        .find(|c| c.doc_index == 2)
        .unwrap_or_else(|| panic!("doc 2 citation should be present"));
    assert!(doc2.valid);

    let steps = storage
        .read_trace(&result.trace.query_id)
        .await
        .unwrap_or_else(|e| panic!("read_trace should succeed: {e}"));
    let verification_steps = steps
        .iter()
        .filter(|s| matches!(s, Step::Verification { available: true, .. }))
        .count();
    assert_eq!(verification_steps, 1);
}

/// Scenario 2 (sub-LLM delegation): a code block calls `llm_query` once
/// before resolving `FINAL`. The trace records a matched
/// `subcall_request`/`subcall_response` pair for the nested call.
#[tokio::test]
async fn scenario_subcall_is_recorded_in_the_trace() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        "```repl\nresult = llm_query('summarize the context')\nFINAL(result)\n```",
        "a scripted sub-llm summary",
    ]));
    let pool = Pool::new(sandbox_runner_bin(), 1, 8 * 1024 * 1024);
    let storage = test_storage();
    let engine = Engine::new(pool, provider, Arc::clone(&storage) as Arc<dyn TraceStorage>, test_config());

    let query = Query::new(
        "Summarize the document.",
        vec![Document::new("0", "some document content")],
        "driver-model",
    );

    let result = engine.query(query).await;
    assert_eq!(result.terminal, TerminalState::Ok);
    assert_eq!(result.answer, "a scripted sub-llm summary");

    let steps = storage
        .read_trace(&result.trace.query_id)
        .await
        .unwrap_or_else(|e| panic!("read_trace should succeed: {e}"));
    let requests = steps.iter().filter(|s| matches!(s, Step::SubcallRequest { .. })).count();
    let responses = steps.iter().filter(|s| matches!(s, Step::SubcallResponse { .. })).count();
    assert_eq!(requests, 1);
    assert_eq!(responses, 1);
    if let Some(Step::SubcallResponse { content_len, .. }) =
        steps.iter().find(|s| matches!(s, Step::SubcallResponse { .. }))
    {
        assert_eq!(*content_len, "a scripted sub-llm summary".chars().count());
    }
}

/// Budget exhaustion: a driver that never emits `FINAL` runs out the
/// iteration budget and the query still resolves, degrading to a
/// best-effort answer rather than propagating an error.
#[tokio::test]
async fn scenario_budget_exhausted_degrades_gracefully() {
    let responses = vec!["```repl\nx = 1\n```"; 6];
    let provider = Arc::new(ScriptedProvider::new(responses));
    let pool = Pool::new(sandbox_runner_bin(), 1, 8 * 1024 * 1024);
    let config = EngineConfig::builder()
        .api_key("unused-in-these-tests")
        .pool_size(1)
        .max_iterations(2)
        .build()
        .unwrap_or_else(|e| panic!("config should build: {e}"));
    let engine = Engine::new(pool, provider, test_storage(), config);

    let query = Query::new(
        "Never resolves.",
        vec![Document::new("0", "irrelevant content")],
        "driver-model",
    );

    let result = engine.query(query).await;
    assert_eq!(result.terminal, TerminalState::BudgetExhausted);
}
