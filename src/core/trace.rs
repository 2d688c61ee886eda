//! Trace: the ordered, append-only record of everything that happened
//! during a query, written incrementally so partial traces survive a
//! crash mid-query.

use serde::{Deserialize, Serialize};

/// A unique identifier for one query's trace.
pub type QueryId = String;

/// A single typed trace step. Each carries a monotonic index so the
/// sequence can be reconstructed even if steps are read out of order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    /// A new iteration of the driver loop began.
    IterationStart {
        /// Monotonic step index.
        index: u64,
        /// 1-based iteration number.
        iteration: usize,
        /// Unix timestamp in milliseconds.
        ts_ms: u64,
    },
    /// Messages were sent to the driver LLM.
    DriverRequest {
        /// Monotonic step index.
        index: u64,
        /// Unix timestamp in milliseconds.
        ts_ms: u64,
        /// Number of messages in the request.
        message_count: usize,
    },
    /// The driver LLM responded.
    DriverResponse {
        /// Monotonic step index.
        index: u64,
        /// Unix timestamp in milliseconds.
        ts_ms: u64,
        /// Character length of the response content.
        content_len: usize,
        /// Prompt/completion/total token counts.
        prompt_tokens: u32,
        /// Completion tokens consumed.
        completion_tokens: u32,
    },
    /// A code block was sent to the sandbox for execution.
    CodeExecuted {
        /// Monotonic step index.
        index: u64,
        /// Unix timestamp in milliseconds.
        ts_ms: u64,
        /// Character length of the executed code.
        code_len: usize,
    },
    /// A code block's capture (stdout/exception) came back.
    CodeOutput {
        /// Monotonic step index.
        index: u64,
        /// Unix timestamp in milliseconds.
        ts_ms: u64,
        /// Character length of the captured output, pre-truncation.
        output_len: usize,
        /// Whether the output was truncated to the per-block ceiling.
        truncated: bool,
        /// Whether the code raised an exception.
        raised: bool,
    },
    /// Sandbox code invoked `llm_query`/`llm_query_batched`.
    SubcallRequest {
        /// Monotonic step index.
        index: u64,
        /// Unix timestamp in milliseconds.
        ts_ms: u64,
        /// Sub-model identifier used.
        model: String,
        /// Combined instruction+content character length.
        content_len: usize,
        /// Whether the call was rejected for exceeding the size ceiling.
        size_exceeded: bool,
    },
    /// A sub-LLM call's response came back.
    SubcallResponse {
        /// Monotonic step index.
        index: u64,
        /// Unix timestamp in milliseconds.
        ts_ms: u64,
        /// Character length of the response.
        content_len: usize,
        /// Prompt/completion/total token counts.
        prompt_tokens: u32,
        /// Completion tokens consumed.
        completion_tokens: u32,
    },
    /// The executor's sandbox child died and was replaced from the pool.
    ExecutorReacquired {
        /// Monotonic step index.
        index: u64,
        /// Unix timestamp in milliseconds.
        ts_ms: u64,
        /// Iteration the failure was detected in.
        iteration: usize,
    },
    /// The driver emitted a resolved final answer.
    FinalAnswer {
        /// Monotonic step index.
        index: u64,
        /// Unix timestamp in milliseconds.
        ts_ms: u64,
        /// Character length of the final answer.
        answer_len: usize,
    },
    /// Citation verification ran (or was skipped/unavailable).
    Verification {
        /// Monotonic step index.
        index: u64,
        /// Unix timestamp in milliseconds.
        ts_ms: u64,
        /// Whether verification produced a result (`false` if unavailable).
        available: bool,
    },
    /// The query ended in `cancelled`.
    Cancelled {
        /// Monotonic step index.
        index: u64,
        /// Unix timestamp in milliseconds.
        ts_ms: u64,
    },
}

impl Step {
    /// The monotonic index this step was written at.
    #[must_use]
    pub const fn index(&self) -> u64 {
        match self {
            Self::IterationStart { index, .. }
            | Self::DriverRequest { index, .. }
            | Self::DriverResponse { index, .. }
            | Self::CodeExecuted { index, .. }
            | Self::CodeOutput { index, .. }
            | Self::SubcallRequest { index, .. }
            | Self::SubcallResponse { index, .. }
            | Self::ExecutorReacquired { index, .. }
            | Self::FinalAnswer { index, .. }
            | Self::Verification { index, .. }
            | Self::Cancelled { index, .. } => *index,
        }
    }
}

/// A handle to a persisted trace, returned to the caller in [`super::query::QueryResult`].
///
/// The handle is opaque to the engine beyond its id; reading the full
/// step sequence goes through `TraceStorage::read_trace`.
#[derive(Debug, Clone)]
pub struct TraceHandle {
    /// The query id this trace is keyed by.
    pub query_id: QueryId,
}

/// An ordered, in-memory view of a trace's steps, as returned by
/// `TraceStorage::read_trace`.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    /// Steps in the order they were appended.
    pub steps: Vec<Step>,
}

impl Trace {
    /// Returns whether exactly one `final_answer` step is present.
    ///
    /// Per invariant 7: the trace contains exactly one `final_answer`
    /// step if and only if the terminal state is `ok`.
    #[must_use]
    pub fn has_exactly_one_final_answer(&self) -> bool {
        self.steps
            .iter()
            .filter(|s| matches!(s, Step::FinalAnswer { .. }))
            .count()
            == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_index() {
        let step = Step::IterationStart {
            index: 3,
            iteration: 1,
            ts_ms: 0,
        };
        assert_eq!(step.index(), 3);
    }

    #[test]
    fn test_trace_exactly_one_final_answer() {
        let mut trace = Trace::default();
        assert!(!trace.has_exactly_one_final_answer());
        trace.steps.push(Step::FinalAnswer {
            index: 0,
            ts_ms: 0,
            answer_len: 10,
        });
        assert!(trace.has_exactly_one_final_answer());
        trace.steps.push(Step::FinalAnswer {
            index: 1,
            ts_ms: 0,
            answer_len: 5,
        });
        assert!(!trace.has_exactly_one_final_answer());
    }
}
