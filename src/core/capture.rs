//! Per-code-block and per-sub-call records, the unit of feedback that
//! flows from the sandbox back into the driver conversation.

use serde::{Deserialize, Serialize};

/// A raised exception captured from executing a code block: type name,
/// message, and a formatted traceback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedException {
    /// The Python exception type name (e.g. `"ValueError"`).
    pub exception_type: String,
    /// The exception message.
    pub message: String,
    /// A formatted traceback, if one was available.
    pub traceback: String,
}

/// The result of executing one fenced `repl` code block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureRecord {
    /// The verbatim code that was executed.
    pub code: String,
    /// Captured standard output, truncated to the per-block ceiling.
    pub output: String,
    /// The exception raised, if the block failed.
    pub exception: Option<CapturedException>,
    /// Whether `output` was truncated to reach the per-block ceiling.
    pub truncated: bool,
    /// The untruncated output length, in characters.
    pub untruncated_len: usize,
    /// Set when this block called `FINAL(...)`/`FINAL_VAR(...)`, already
    /// resolved against the namespace by the sandbox.
    pub final_answer: Option<String>,
}

impl CaptureRecord {
    /// Whether the code block raised.
    #[must_use]
    pub const fn raised(&self) -> bool {
        self.exception.is_some()
    }
}

/// The result of one `llm_query`/`llm_query_batched` invocation, as
/// recorded in the trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubCallRecord {
    /// The instruction text passed to the sub-LLM.
    pub instruction: String,
    /// Combined instruction+content character length.
    pub content_len: usize,
    /// The sub-model identifier used.
    pub model: String,
    /// Whether this call was rejected for exceeding the character ceiling.
    pub size_exceeded: bool,
    /// The sub-LLM's response text, if the call was not rejected.
    pub response: Option<String>,
    /// Prompt tokens spent on this call (0 if rejected or the provider failed).
    pub prompt_tokens: u32,
    /// Completion tokens spent on this call.
    pub completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raised() {
        let ok = CaptureRecord {
            code: "1+1".to_string(),
            output: "2".to_string(),
            exception: None,
            truncated: false,
            untruncated_len: 1,
            final_answer: None,
        };
        assert!(!ok.raised());

        let failed = CaptureRecord {
            code: "1/0".to_string(),
            output: String::new(),
            exception: Some(CapturedException {
                exception_type: "ZeroDivisionError".to_string(),
                message: "division by zero".to_string(),
                traceback: String::new(),
            }),
            truncated: false,
            untruncated_len: 0,
            final_answer: None,
        };
        assert!(failed.raised());
    }
}
