//! Query input/output types: what a caller hands the engine and what it
//! gets back.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::EngineConfig;
use crate::core::document::Document;
use crate::core::trace::TraceHandle;
use crate::core::verification::Verification;
use crate::llm::message::TokenUsage as ModelTokenUsage;

/// A cooperative cancellation flag, observable both by polling and by
/// awaiting, so a long-running future can be raced against it instead
/// of only checked between suspension points.
///
/// Cloning shares the underlying flag; any clone can request cancellation
/// and every clone observes it.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<CancelInner>);

#[derive(Debug, Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: tokio::sync::Notify,
}

impl CancelSignal {
    /// Creates a fresh, unset signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Observable by every clone of this signal,
    /// including any task currently awaiting `cancelled()`.
    pub fn cancel(&self) {
        self.0.flag.store(true, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.flag.load(Ordering::SeqCst)
    }

    /// Resolves once cancellation is requested, or immediately if it
    /// already has been. Intended for racing against an in-flight
    /// operation with `tokio::select!` so cancellation latency is
    /// bounded by the select rather than by the operation's own timeout.
    pub async fn cancelled(&self) {
        let notified = self.0.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Per-query tunables layered on top of [`EngineConfig`]'s process-wide
/// defaults. Any field left `None` falls back to the config value.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Overrides `EngineConfig::max_iterations` for this query.
    pub max_iterations: Option<usize>,
    /// Overrides `EngineConfig::max_subcall_chars` for this query.
    pub max_subcall_chars: Option<usize>,
    /// Overrides `EngineConfig::exec_timeout` for this query, in seconds.
    pub exec_timeout_s: Option<u64>,
    /// Overrides `EngineConfig::verify_citations` for this query.
    pub verify_citations: Option<bool>,
    /// Model id used for sub-LLM calls; defaults to the driver model.
    pub sub_model_id: Option<String>,
    /// Cooperative cancellation signal, checked between suspension points.
    pub cancel_signal: Option<CancelSignal>,
}

impl QueryOptions {
    /// Resolves the effective iteration budget against engine defaults.
    #[must_use]
    pub fn effective_max_iterations(&self, config: &EngineConfig) -> usize {
        self.max_iterations.unwrap_or(config.max_iterations)
    }

    /// Resolves the effective per-subcall character ceiling.
    #[must_use]
    pub fn effective_max_subcall_chars(&self, config: &EngineConfig) -> usize {
        self.max_subcall_chars.unwrap_or(config.max_subcall_chars)
    }

    /// Resolves the effective per-exec wall-clock timeout.
    #[must_use]
    pub fn effective_exec_timeout(&self, config: &EngineConfig) -> Duration {
        self.exec_timeout_s
            .map_or(config.exec_timeout, Duration::from_secs)
    }

    /// Resolves whether the Citation Verifier runs for this query.
    #[must_use]
    pub fn effective_verify_citations(&self, config: &EngineConfig) -> bool {
        self.verify_citations.unwrap_or(config.verify_citations)
    }
}

/// A natural-language question over an ordered document collection.
#[derive(Debug, Clone)]
pub struct Query {
    /// The question text.
    pub question: String,
    /// Ordered, immutable documents the engine reasons over.
    pub documents: Vec<Document>,
    /// Model id used for the driver conversation.
    pub model_id: String,
    /// Per-query tunable overrides.
    pub options: QueryOptions,
}

impl Query {
    /// Creates a query with default options.
    #[must_use]
    pub fn new(question: impl Into<String>, documents: Vec<Document>, model_id: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            documents,
            model_id: model_id.into(),
            options: QueryOptions::default(),
        }
    }

    /// Total character count across all documents.
    #[must_use]
    pub fn total_chars(&self) -> usize {
        self.documents.iter().map(Document::char_len).sum()
    }
}

/// Token usage aggregated across the whole query, with a per-model
/// breakdown (driver model plus any sub-models used).
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    /// Combined usage across every model call this query made.
    pub total: ModelTokenUsage,
    /// Usage broken down by model id.
    pub per_model: HashMap<String, ModelTokenUsage>,
}

impl TokenUsage {
    /// Folds one model call's usage into the aggregate.
    pub fn record(&mut self, model_id: &str, usage: &ModelTokenUsage) {
        self.total.prompt_tokens += usage.prompt_tokens;
        self.total.completion_tokens += usage.completion_tokens;
        self.total.total_tokens += usage.total_tokens;

        let entry = self.per_model.entry(model_id.to_string()).or_default();
        entry.prompt_tokens += usage.prompt_tokens;
        entry.completion_tokens += usage.completion_tokens;
        entry.total_tokens += usage.total_tokens;
    }

    /// Folds another aggregate (e.g. the usage from a batch of sub-LLM
    /// calls serviced mid-exec) into this one.
    pub fn merge(&mut self, other: &Self) {
        self.total.prompt_tokens += other.total.prompt_tokens;
        self.total.completion_tokens += other.total.completion_tokens;
        self.total.total_tokens += other.total.total_tokens;

        for (model_id, model_usage) in &other.per_model {
            let entry = self.per_model.entry(model_id.clone()).or_default();
            entry.prompt_tokens += model_usage.prompt_tokens;
            entry.completion_tokens += model_usage.completion_tokens;
            entry.total_tokens += model_usage.total_tokens;
        }
    }
}

/// The terminal state a query ended in, per §6's `QueryResult.terminal` tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    /// The driver emitted a resolved `FINAL(...)` and the loop ended normally.
    Ok,
    /// The cooperative cancel signal was observed.
    Cancelled,
    /// The iteration budget was exhausted without a resolved answer.
    BudgetExhausted,
    /// A protocol or timeout failure with no pool to recover from.
    ExecutorFailed,
    /// The driver or sub-LLM provider failed after retries were exhausted.
    ProviderFailed,
}

impl TerminalState {
    /// The string tag this state serializes to in `QueryResult`/CLI output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Cancelled => "cancelled",
            Self::BudgetExhausted => "budget_exhausted",
            Self::ExecutorFailed => "executor_failed",
            Self::ProviderFailed => "provider_failed",
        }
    }
}

/// The result of a completed (or terminated) query.
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// The final answer text. Empty for `cancelled`; may be a best-effort
    /// partial answer for `budget_exhausted`.
    pub answer: String,
    /// Aggregated token usage across driver and sub-LLM calls.
    pub usage: TokenUsage,
    /// Wall-clock duration of the whole query.
    pub duration: Duration,
    /// Handle to the persisted trace for this query.
    pub trace: TraceHandle,
    /// Citation verification result, if verification ran.
    pub verification: Option<Verification>,
    /// The terminal state tag.
    pub terminal: TerminalState,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_signal_shared_across_clones() {
        let signal = CancelSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_cancelled());
        signal.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_immediately_if_already_cancelled() {
        let signal = CancelSignal::new();
        signal.cancel();
        tokio::time::timeout(Duration::from_millis(50), signal.cancelled())
            .await
            .unwrap_or_else(|_| panic!("cancelled() should resolve without waiting once already cancelled"));
    }

    #[tokio::test]
    async fn test_cancelled_wakes_a_waiting_task() {
        let signal = CancelSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });

        // give the spawned task a chance to register as a waiter before
        // cancelling, so this exercises the wake path, not the already-set path.
        tokio::task::yield_now().await;
        signal.cancel();

        tokio::time::timeout(Duration::from_millis(50), handle)
            .await
            .unwrap_or_else(|_| panic!("cancelled() should wake a task blocked on it"))
            .unwrap_or_else(|e| panic!("spawned task should not panic: {e}"));
    }

    #[test]
    fn test_query_total_chars() {
        let query = Query::new(
            "q",
            vec![Document::new("a", "12345"), Document::new("b", "123")],
            "model",
        );
        assert_eq!(query.total_chars(), 8);
    }

    #[test]
    fn test_token_usage_record_accumulates() {
        let mut usage = TokenUsage::default();
        usage.record(
            "driver",
            &ModelTokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
        );
        usage.record(
            "sub",
            &ModelTokenUsage {
                prompt_tokens: 2,
                completion_tokens: 1,
                total_tokens: 3,
            },
        );
        assert_eq!(usage.total.total_tokens, 18);
        assert_eq!(usage.per_model.len(), 2);
    }

    #[test]
    fn test_terminal_state_as_str() {
        assert_eq!(TerminalState::Ok.as_str(), "ok");
        assert_eq!(TerminalState::BudgetExhausted.as_str(), "budget_exhausted");
    }
}
